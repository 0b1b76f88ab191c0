// SPDX-License-Identifier: AGPL-3.0-or-later
// BlockHashDB - Content-Addressed Block Hash Database
// Copyright (C) 2026 Sushanth Reddy Vanagala (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Memory-mapped bloom filter in front of the hash store.
//!
//! The filter is a single bit array of `2^m` bits. Block hashes are already
//! uniformly random, so no mixing hash is applied: the `k` index functions
//! are `k` disjoint `m`-bit windows read from the front of the *stored* hash
//! bits (masked prefix followed by suffix). Deriving indexes from the stored
//! bits, not the raw digest tail, keeps a filter rebuilt from the hash store
//! equal to one maintained incrementally, so the no-false-negative guarantee
//! survives rebuilds. Settings validation guarantees `k·m` never exceeds the
//! stored bit count.
//!
//! Bits are write-once; there is no remove. A disabled filter answers every
//! membership test with `true`.
//!
//! ```text
//! file layout
//!   0   8  magic ("BHDBBLM1")
//!   8   4  format version (u32 LE)
//!  12   4  m (log2 of bit count; also the window width)
//!  16   4  k (number of windows)
//!  20  12  reserved
//!  32  ..  bit array, 2^m / 8 bytes
//! ```

use std::fs::OpenOptions;
use std::path::Path;

use memmap2::{Mmap, MmapMut, MmapOptions};
use parking_lot::RwLock;

use blockhash_core::{Error, Result};

const MAGIC: [u8; 8] = *b"BHDBBLM1";
const FORMAT_VERSION: u32 = 1;
const HEADER_SIZE: u64 = 32;

const HDR_OFF_VERSION: usize = 8;
const HDR_OFF_M: usize = 12;
const HDR_OFF_K: usize = 16;

enum Buf {
    Ro(Mmap),
    Rw(MmapMut),
}

impl Buf {
    fn bytes(&self) -> &[u8] {
        match self {
            Buf::Ro(m) => m,
            Buf::Rw(m) => m,
        }
    }
}

struct Active {
    mm: RwLock<Buf>,
    m_bits: u32,
    k: u32,
}

/// Superset oracle over inserted hashes: `test` never returns false for a
/// hash that was added.
pub struct BloomFilter {
    active: Option<Active>,
}

/// Read `width` bits starting at `start_bit` (MSB-first) as an integer.
fn bit_window(bytes: &[u8], start_bit: u32, width: u32) -> u64 {
    let mut v: u64 = 0;
    for i in 0..width {
        let bit = start_bit + i;
        let byte = bytes[(bit / 8) as usize];
        let set = (byte >> (7 - (bit % 8))) & 1;
        v = (v << 1) | u64::from(set);
    }
    v
}

impl BloomFilter {
    /// A filter that stores nothing and answers `true` to every test.
    pub fn disabled() -> Self {
        Self { active: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.active.is_some()
    }

    /// Create a zeroed filter file. Fails if the path exists.
    pub fn create(path: &Path, m_bits: u32, k: u32) -> Result<Self> {
        if !(10..=32).contains(&m_bits) || k == 0 {
            return Err(Error::precondition(format!(
                "bad bloom geometry m={} k={}",
                m_bits, k
            )));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| Error::precondition(format!("cannot create {}: {}", path.display(), e)))?;
        let bytes = (1u64 << m_bits) / 8;
        file.set_len(HEADER_SIZE + bytes)?;
        let mut mm = unsafe { MmapOptions::new().map_mut(&file)? };
        mm[..8].copy_from_slice(&MAGIC);
        mm[HDR_OFF_VERSION..HDR_OFF_VERSION + 4].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        mm[HDR_OFF_M..HDR_OFF_M + 4].copy_from_slice(&m_bits.to_le_bytes());
        mm[HDR_OFF_K..HDR_OFF_K + 4].copy_from_slice(&k.to_le_bytes());
        mm.flush()?;
        tracing::debug!(m_bits, k, path = %path.display(), "created bloom filter");
        Ok(Self {
            active: Some(Active {
                mm: RwLock::new(Buf::Rw(mm)),
                m_bits,
                k,
            }),
        })
    }

    /// Open an existing filter file, validating geometry against settings.
    pub fn open(path: &Path, writable: bool, m_bits: u32, k: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(path)
            .map_err(|e| Error::precondition(format!("cannot open {}: {}", path.display(), e)))?;
        let buf = if writable {
            Buf::Rw(unsafe { MmapOptions::new().map_mut(&file)? })
        } else {
            Buf::Ro(unsafe { MmapOptions::new().map(&file)? })
        };
        let d = buf.bytes();
        if d.len() < HEADER_SIZE as usize || d[..8] != MAGIC {
            return Err(Error::corruption(format!("{} has bad magic", path.display())));
        }
        let version = u32::from_le_bytes(d[HDR_OFF_VERSION..HDR_OFF_VERSION + 4].try_into().unwrap());
        if version != FORMAT_VERSION {
            return Err(Error::corruption(format!(
                "{} has unsupported bloom format {}",
                path.display(),
                version
            )));
        }
        let file_m = u32::from_le_bytes(d[HDR_OFF_M..HDR_OFF_M + 4].try_into().unwrap());
        let file_k = u32::from_le_bytes(d[HDR_OFF_K..HDR_OFF_K + 4].try_into().unwrap());
        if file_m != m_bits || file_k != k {
            return Err(Error::corruption(format!(
                "{} geometry m={} k={} does not match settings m={} k={}",
                path.display(),
                file_m,
                file_k,
                m_bits,
                k
            )));
        }
        if (d.len() as u64) < HEADER_SIZE + (1u64 << m_bits) / 8 {
            return Err(Error::corruption(format!("{} is truncated", path.display())));
        }
        Ok(Self {
            active: Some(Active {
                mm: RwLock::new(buf),
                m_bits,
                k,
            }),
        })
    }

    /// Set all k bits for the stored hash bits. No-op when disabled.
    pub fn add(&self, stored_bits: &[u8]) -> Result<()> {
        let Some(a) = &self.active else {
            return Ok(());
        };
        let mut guard = a.mm.write();
        let Buf::Rw(mm) = &mut *guard else {
            return Err(Error::precondition("bloom filter is open read-only"));
        };
        for w in 0..a.k {
            let idx = bit_window(stored_bits, w * a.m_bits, a.m_bits);
            let off = HEADER_SIZE as usize + (idx / 8) as usize;
            mm[off] |= 1 << (idx % 8);
        }
        Ok(())
    }

    /// False iff any of the k bits is clear. Always true when disabled.
    pub fn test(&self, stored_bits: &[u8]) -> bool {
        let Some(a) = &self.active else {
            return true;
        };
        let guard = a.mm.read();
        let d = guard.bytes();
        for w in 0..a.k {
            let idx = bit_window(stored_bits, w * a.m_bits, a.m_bits);
            let off = HEADER_SIZE as usize + (idx / 8) as usize;
            if d[off] & (1 << (idx % 8)) == 0 {
                return false;
            }
        }
        true
    }

    pub fn flush(&self) -> Result<()> {
        if let Some(a) = &self.active {
            if let Buf::Rw(mm) = &*a.mm.read() {
                mm.flush()?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use tempfile::tempdir;

    #[test]
    fn test_add_then_test() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bloom_filter");
        let bloom = BloomFilter::create(&path, 12, 2).unwrap();

        let a = [0x12, 0x34, 0x56, 0x78];
        let b = [0xfe, 0xdc, 0xba, 0x98];
        bloom.add(&a).unwrap();
        assert!(bloom.test(&a));
        // a fresh filter with one element almost never matches another key
        assert!(!bloom.test(&b));
    }

    #[test]
    fn test_no_false_negatives() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bloom_filter");
        let bloom = BloomFilter::create(&path, 14, 2).unwrap();
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);

        let keys: Vec<[u8; 8]> = (0..2000).map(|_| rng.gen()).collect();
        for k in &keys {
            bloom.add(k).unwrap();
        }
        for k in &keys {
            assert!(bloom.test(k), "false negative for {:02x?}", k);
        }
    }

    #[test]
    fn test_disabled_always_true() {
        let bloom = BloomFilter::disabled();
        assert!(!bloom.is_enabled());
        assert!(bloom.test(&[0u8; 16]));
        bloom.add(&[0u8; 16]).unwrap();
    }

    #[test]
    fn test_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bloom_filter");
        let key = [0xaau8; 8];
        {
            let bloom = BloomFilter::create(&path, 12, 2).unwrap();
            bloom.add(&key).unwrap();
            bloom.flush().unwrap();
        }
        let bloom = BloomFilter::open(&path, false, 12, 2).unwrap();
        assert!(bloom.test(&key));
        assert!(!bloom.test(&[0x55u8; 8]));
    }

    #[test]
    fn test_geometry_mismatch_detected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bloom_filter");
        BloomFilter::create(&path, 12, 2).unwrap();
        assert!(BloomFilter::open(&path, false, 13, 2).is_err());
        assert!(BloomFilter::open(&path, false, 12, 3).is_err());
    }

    #[test]
    fn test_window_extraction() {
        // 0b1010_1010 0b1100_0011 → first 4-bit window 0b1010, second 0b1010,
        // third 0b1100, fourth 0b0011
        let bytes = [0b1010_1010u8, 0b1100_0011];
        assert_eq!(bit_window(&bytes, 0, 4), 0b1010);
        assert_eq!(bit_window(&bytes, 4, 4), 0b1010);
        assert_eq!(bit_window(&bytes, 8, 4), 0b1100);
        assert_eq!(bit_window(&bytes, 12, 4), 0b0011);
        assert_eq!(bit_window(&bytes, 2, 6), 0b101010);
    }
}
