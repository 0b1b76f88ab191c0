// SPDX-License-Identifier: AGPL-3.0-or-later
// BlockHashDB - Content-Addressed Block Hash Database
// Copyright (C) 2026 Sushanth Reddy Vanagala (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! The versioned settings document.
//!
//! Settings are fixed when a database directory is created and never change
//! afterward, with one exception: the bloom block may be rewritten by a
//! filter rebuild. The document carries an explicit schema version; opening
//! a directory written by a newer engine fails loudly instead of guessing.
//!
//! ## Document shape
//!
//! ```text
//! <settings>
//!   <settings_version>3</settings_version>
//!   <block_size>4096</block_size>
//!   <sector_size>512</sector_size>
//!   <hash_algorithm>md5</hash_algorithm>
//!   <hash_prefix_bits>28</hash_prefix_bits>
//!   <hash_suffix_bytes>3</hash_suffix_bytes>
//!   <max_duplicates>20</max_duplicates>
//!   <bloom_is_used>1</bloom_is_used>
//!   <bloom_m_bits>26</bloom_m_bits>
//!   <bloom_k_functions>2</bloom_k_functions>
//! </settings>
//! ```

use std::path::Path;

use crate::error::{Error, Result};
use crate::hashes::DigestDescriptor;
use crate::xml::{self, XmlWriter};

/// Newest settings schema this engine reads and writes.
pub const CURRENT_SETTINGS_VERSION: u32 = 3;

/// Database-wide parameters, fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub settings_version: u32,
    /// Bytes per hashed block.
    pub block_size: u32,
    /// Minimum alignment for file offsets; divides `block_size`.
    pub sector_size: u32,
    pub hash_algorithm: String,
    /// Leading bits of a hash used as the store key; the trailing key byte
    /// is masked down to this many bits.
    pub hash_prefix_bits: u32,
    /// Trailing bytes of a hash stored in the record to disambiguate
    /// prefix collisions.
    pub hash_suffix_bytes: u32,
    /// Per-hash occurrence cap; excess occurrences are accounted, not stored.
    pub max_duplicates: u32,
    pub bloom_is_used: bool,
    /// log2 of the filter size in bits; also the width of each index window.
    pub bloom_m_bits: u32,
    /// Number of index windows, each setting one bit.
    pub bloom_k_functions: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            settings_version: CURRENT_SETTINGS_VERSION,
            block_size: 4096,
            sector_size: 512,
            hash_algorithm: "md5".to_string(),
            hash_prefix_bits: 28,
            hash_suffix_bytes: 3,
            max_duplicates: 20,
            bloom_is_used: true,
            bloom_m_bits: 26,
            bloom_k_functions: 2,
        }
    }
}

impl Settings {
    /// The digest descriptor implied by `hash_algorithm`.
    pub fn digest(&self) -> Result<DigestDescriptor> {
        DigestDescriptor::from_name(&self.hash_algorithm)
    }

    /// Key bytes in the hash store: `⌈hash_prefix_bits / 8⌉`.
    pub fn prefix_bytes(&self) -> usize {
        ((self.hash_prefix_bits + 7) / 8) as usize
    }

    /// Validate internal consistency. Called at create and open.
    pub fn validate(&self) -> Result<()> {
        let digest = self.digest()?;
        let digest_bits = digest.len() as u32 * 8;

        if self.block_size == 0 || self.sector_size == 0 {
            return Err(Error::precondition("block size and sector size must be nonzero"));
        }
        if self.block_size % self.sector_size != 0 {
            return Err(Error::precondition(format!(
                "sector size {} does not divide block size {}",
                self.sector_size, self.block_size
            )));
        }
        if self.hash_prefix_bits == 0 || self.hash_prefix_bits > digest_bits {
            return Err(Error::precondition(format!(
                "hash prefix bits {} out of range 1..={}",
                self.hash_prefix_bits, digest_bits
            )));
        }
        if self.hash_suffix_bytes as usize > digest.len() {
            return Err(Error::precondition(format!(
                "hash suffix bytes {} exceeds digest length {}",
                self.hash_suffix_bytes,
                digest.len()
            )));
        }
        if self.max_duplicates == 0 {
            return Err(Error::precondition("max duplicates must be nonzero"));
        }
        if self.bloom_is_used {
            // index windows are read from the bits the store preserves
            let stored_bits = self.hash_prefix_bits + 8 * self.hash_suffix_bytes;
            if self.bloom_k_functions == 0 {
                return Err(Error::precondition("bloom k must be nonzero"));
            }
            if !(10..=32).contains(&self.bloom_m_bits) {
                return Err(Error::precondition(format!(
                    "bloom m bits {} out of range 10..=32",
                    self.bloom_m_bits
                )));
            }
            if self.bloom_k_functions * self.bloom_m_bits > stored_bits {
                return Err(Error::precondition(format!(
                    "bloom needs {} hash bits but prefix+suffix carry only {}",
                    self.bloom_k_functions * self.bloom_m_bits,
                    stored_bits
                )));
            }
        }
        Ok(())
    }

    /// Settings compatibility for set-algebra operators: same algorithm
    /// name (which fixes the digest length) and same block size. Sector
    /// size, prefix/suffix tuning and bloom shape may differ; misaligned
    /// offsets surface as soft rejections on the output's insert path.
    pub fn check_compatible(&self, other: &Settings) -> Result<()> {
        if self.hash_algorithm != other.hash_algorithm {
            return Err(Error::Incompatible(format!(
                "hash algorithm '{}' vs '{}'",
                self.hash_algorithm, other.hash_algorithm
            )));
        }
        if self.block_size != other.block_size {
            return Err(Error::Incompatible(format!(
                "block size {} vs {}",
                self.block_size, other.block_size
            )));
        }
        Ok(())
    }

    pub fn to_xml(&self) -> String {
        let mut w = XmlWriter::new();
        self.write_xml(&mut w);
        w.finish()
    }

    pub fn write_xml(&self, w: &mut XmlWriter) {
        w.push("settings");
        w.element("settings_version", self.settings_version);
        w.element("block_size", self.block_size);
        w.element("sector_size", self.sector_size);
        w.element("hash_algorithm", &self.hash_algorithm);
        w.element("hash_prefix_bits", self.hash_prefix_bits);
        w.element("hash_suffix_bytes", self.hash_suffix_bytes);
        w.element("max_duplicates", self.max_duplicates);
        w.element("bloom_is_used", if self.bloom_is_used { 1 } else { 0 });
        w.element("bloom_m_bits", self.bloom_m_bits);
        w.element("bloom_k_functions", self.bloom_k_functions);
        w.pop();
    }

    /// Parse a settings document, enforcing the version gate.
    pub fn from_xml(doc: &str, path: &Path) -> Result<Self> {
        let settings_version = xml::require_u64(doc, "settings_version")? as u32;
        if settings_version > CURRENT_SETTINGS_VERSION {
            return Err(Error::UnsupportedVersion {
                path: path.to_path_buf(),
                found: settings_version,
                supported: CURRENT_SETTINGS_VERSION,
            });
        }
        let settings = Settings {
            settings_version,
            block_size: xml::require_u64(doc, "block_size")? as u32,
            sector_size: xml::require_u64(doc, "sector_size")? as u32,
            hash_algorithm: xml::require_tag(doc, "hash_algorithm")?,
            hash_prefix_bits: xml::require_u64(doc, "hash_prefix_bits")? as u32,
            hash_suffix_bytes: xml::require_u64(doc, "hash_suffix_bytes")? as u32,
            max_duplicates: xml::require_u64(doc, "max_duplicates")? as u32,
            bloom_is_used: xml::require_u64(doc, "bloom_is_used")? != 0,
            bloom_m_bits: xml::require_u64(doc, "bloom_m_bits")? as u32,
            bloom_k_functions: xml::require_u64(doc, "bloom_k_functions")? as u32,
        };
        settings.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_defaults_validate() {
        Settings::default().validate().unwrap();
    }

    #[test]
    fn test_xml_roundtrip() {
        let s = Settings {
            block_size: 8192,
            sector_size: 512,
            hash_algorithm: "sha1".into(),
            max_duplicates: 7,
            ..Settings::default()
        };
        let doc = s.to_xml();
        let parsed = Settings::from_xml(&doc, &PathBuf::from("x")).unwrap();
        assert_eq!(parsed, s);
    }

    #[test]
    fn test_newer_version_refused() {
        let mut s = Settings::default();
        s.settings_version = CURRENT_SETTINGS_VERSION + 1;
        let doc = s.to_xml();
        match Settings::from_xml(&doc, &PathBuf::from("db")) {
            Err(Error::UnsupportedVersion { found, .. }) => {
                assert_eq!(found, CURRENT_SETTINGS_VERSION + 1)
            }
            other => panic!("expected version error, got {:?}", other),
        }
    }

    #[test]
    fn test_sector_must_divide_block() {
        let s = Settings {
            block_size: 4096,
            sector_size: 600,
            ..Settings::default()
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_bloom_windows_must_fit_stored_bits() {
        // 2 windows of 26 bits need 52 bits; prefix 28 + suffix 3*8 = 52: ok
        Settings::default().validate().unwrap();
        // shrink the suffix and the windows no longer fit
        let s = Settings {
            hash_suffix_bytes: 2,
            ..Settings::default()
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_compatibility() {
        let a = Settings::default();
        let mut b = Settings::default();
        a.check_compatible(&b).unwrap();
        // a differing sector size alone stays compatible
        b.sector_size = 256;
        a.check_compatible(&b).unwrap();
        b.block_size = 512;
        b.sector_size = 512;
        assert!(a.check_compatible(&b).is_err());
        b = Settings {
            hash_algorithm: "sha1".into(),
            ..Settings::default()
        };
        assert!(a.check_compatible(&b).is_err());
    }
}
