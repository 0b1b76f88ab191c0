// SPDX-License-Identifier: AGPL-3.0-or-later
// BlockHashDB - Content-Addressed Block Hash Database
// Copyright (C) 2026 Sushanth Reddy Vanagala (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Binary hash newtypes and the runtime digest descriptor.
//!
//! A database is created for one digest algorithm and every hash it stores
//! has that algorithm's length. Rather than being generic over the digest at
//! compile time, the engine carries a [`DigestDescriptor`] of `(name, length)`
//! read from the settings document, and validates lengths at the edges.

use std::fmt;

use crate::error::{Error, Result};

/// Cryptographic digest of one fixed-size data block. Opaque bytes; the
/// length is fixed per database by [`DigestDescriptor`].
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockHash(Vec<u8>);

/// Whole-file digest identifying a source file. Same shape as [`BlockHash`];
/// kept as a distinct type so the two cannot be swapped at a call site.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileHash(Vec<u8>);

macro_rules! hash_impl {
    ($name:ident) => {
        impl $name {
            pub fn new(bytes: Vec<u8>) -> Self {
                Self(bytes)
            }

            /// Parse from a hex string, validating character set and even length.
            pub fn from_hex(s: &str) -> Result<Self> {
                let bytes = hex::decode(s)
                    .map_err(|_| Error::InvalidHash(format!("bad hex '{}'", s)))?;
                if bytes.is_empty() {
                    return Err(Error::InvalidHash("empty hash".into()));
                }
                Ok(Self(bytes))
            }

            pub fn to_hex(&self) -> String {
                hex::encode(&self.0)
            }

            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }

            pub fn len(&self) -> usize {
                self.0.len()
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                // full hashes are noisy in logs; show a prefix
                let h = self.to_hex();
                let cut = h.len().min(16);
                write!(f, "{}({}…)", stringify!($name), &h[..cut])
            }
        }
    };
}

hash_impl!(BlockHash);
hash_impl!(FileHash);

/// Dense nonzero integer naming a source file within one database.
/// Assigned on first sight of a [`FileHash`], monotonic, never reused.
/// Zero is reserved as "absent" in store encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceId(pub u64);

impl SourceId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Runtime digest descriptor: algorithm name and digest length in bytes.
///
/// The descriptor travels with the settings; records carry their length
/// implicitly and validation happens at the parse boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestDescriptor {
    name: String,
    len: usize,
}

impl DigestDescriptor {
    /// Look up a descriptor by algorithm name. Unknown names are a
    /// precondition failure at create time.
    pub fn from_name(name: &str) -> Result<Self> {
        let len = match name {
            "md5" => 16,
            "sha1" => 20,
            "sha256" => 32,
            "sha512" => 64,
            _ => {
                return Err(Error::precondition(format!(
                    "unsupported hash algorithm '{}', expected md5, sha1, sha256 or sha512",
                    name
                )))
            }
        };
        Ok(Self {
            name: name.to_string(),
            len,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Digest length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Parse a block hash in this digest, enforcing the exact length.
    pub fn parse_block_hash(&self, s: &str) -> Result<BlockHash> {
        let h = BlockHash::from_hex(s)?;
        if h.len() != self.len {
            return Err(Error::InvalidHash(format!(
                "'{}' is {} bytes, {} digest is {} bytes",
                s,
                h.len(),
                self.name,
                self.len
            )));
        }
        Ok(h)
    }

    /// Parse a file hash. File hashes share the database digest.
    pub fn parse_file_hash(&self, s: &str) -> Result<FileHash> {
        let h = FileHash::from_hex(s)?;
        if h.len() != self.len {
            return Err(Error::InvalidHash(format!(
                "'{}' is {} bytes, {} digest is {} bytes",
                s,
                h.len(),
                self.name,
                self.len
            )));
        }
        Ok(h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_roundtrip() {
        let h = BlockHash::from_hex("aabbccdd").unwrap();
        assert_eq!(h.as_bytes(), &[0xaa, 0xbb, 0xcc, 0xdd]);
        assert_eq!(h.to_hex(), "aabbccdd");
    }

    #[test]
    fn test_bad_hex_rejected() {
        assert!(BlockHash::from_hex("zz").is_err());
        assert!(BlockHash::from_hex("abc").is_err()); // odd length
        assert!(BlockHash::from_hex("").is_err());
    }

    #[test]
    fn test_ordering_is_bytewise() {
        let a = BlockHash::from_hex("00ff").unwrap();
        let b = BlockHash::from_hex("0100").unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_descriptor_lengths() {
        assert_eq!(DigestDescriptor::from_name("md5").unwrap().len(), 16);
        assert_eq!(DigestDescriptor::from_name("sha1").unwrap().len(), 20);
        assert_eq!(DigestDescriptor::from_name("sha256").unwrap().len(), 32);
        assert!(DigestDescriptor::from_name("crc32").is_err());
    }

    #[test]
    fn test_descriptor_enforces_length() {
        let md5 = DigestDescriptor::from_name("md5").unwrap();
        assert!(md5.parse_block_hash(&"aa".repeat(16)).is_ok());
        assert!(md5.parse_block_hash("aabb").is_err());
        assert!(md5.parse_file_hash(&"cd".repeat(16)).is_ok());
    }
}
