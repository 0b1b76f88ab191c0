// SPDX-License-Identifier: AGPL-3.0-or-later
// BlockHashDB - Content-Addressed Block Hash Database
// Copyright (C) 2026 Sushanth Reddy Vanagala (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Source-ID store: the FileHash ↔ SourceId bijection.
//!
//! Both directions live in one map under tagged keys:
//!
//! ```text
//! 'h' ++ file_hash        → varint source_id
//! 'i' ++ source_id (BE)   → file_hash bytes
//! 'm'                     → varint next_id
//! ```
//!
//! Ids are dense, start at 1, and are never reused. The big-endian id
//! encoding keeps the `'i'` range in numeric order for the sources report.

use std::path::Path;

use blockhash_core::{Error, FileHash, Result, SourceId};

use crate::codec;
use crate::map::{MapMode, MappedMap};

const TAG_HASH: u8 = b'h';
const TAG_ID: u8 = b'i';
const TAG_META: u8 = b'm';

pub struct SourceIdStore {
    map: MappedMap,
}

fn hash_key(file_hash: &[u8]) -> Vec<u8> {
    let mut k = Vec::with_capacity(1 + file_hash.len());
    k.push(TAG_HASH);
    k.extend_from_slice(file_hash);
    k
}

fn id_key(id: u64) -> Vec<u8> {
    let mut k = Vec::with_capacity(9);
    k.push(TAG_ID);
    k.extend_from_slice(&id.to_be_bytes());
    k
}

impl SourceIdStore {
    pub fn create(dir: &Path) -> Result<Self> {
        Ok(Self {
            map: MappedMap::create(dir, false)?,
        })
    }

    pub fn open(dir: &Path, mode: MapMode) -> Result<Self> {
        Ok(Self {
            map: MappedMap::open(dir, mode)?,
        })
    }

    /// Intern a file hash: the existing id when present, otherwise the next
    /// dense id, written in both directions. Returns `(id, newly_assigned)`.
    pub fn insert(&self, file_hash: &FileHash) -> Result<(SourceId, bool)> {
        let hkey = hash_key(file_hash.as_bytes());
        let mut tx = self.map.write_tx()?;
        if let Some(bytes) = tx.get(&hkey)? {
            let mut pos = 0;
            let id = codec::get_varint(&bytes, &mut pos)?;
            return Ok((SourceId(id), false));
        }

        let next = match tx.get(&[TAG_META])? {
            Some(bytes) => {
                let mut pos = 0;
                codec::get_varint(&bytes, &mut pos)?
            }
            None => 1,
        };

        let mut id_val = Vec::new();
        codec::put_varint(&mut id_val, next);
        tx.put(&hkey, &id_val, false)?;
        tx.put(&id_key(next), file_hash.as_bytes(), false)?;
        let mut meta = Vec::new();
        codec::put_varint(&mut meta, next + 1);
        tx.put(&[TAG_META], &meta, false)?;
        tx.commit()?;
        Ok((SourceId(next), true))
    }

    pub fn find_id(&self, file_hash: &FileHash) -> Result<Option<SourceId>> {
        let tx = self.map.read_tx();
        match tx.get(&hash_key(file_hash.as_bytes()))? {
            Some(bytes) => {
                let mut pos = 0;
                Ok(Some(SourceId(codec::get_varint(&bytes, &mut pos)?)))
            }
            None => Ok(None),
        }
    }

    pub fn find_file_hash(&self, id: SourceId) -> Result<Option<FileHash>> {
        let tx = self.map.read_tx();
        Ok(tx.get(&id_key(id.get()))?.map(FileHash::new))
    }

    /// Referential-integrity check for occurrence source ids.
    pub fn contains(&self, id: SourceId) -> Result<bool> {
        Ok(self.find_file_hash(id)?.is_some())
    }

    /// The file hash a stored occurrence refers to; corruption if missing.
    pub fn require_file_hash(&self, id: SourceId) -> Result<FileHash> {
        self.find_file_hash(id)?.ok_or_else(|| {
            Error::corruption(format!("occurrence references unknown source id {}", id))
        })
    }

    /// Visit every `(id, file_hash)` pair in id order.
    pub fn for_each(&self, mut f: impl FnMut(SourceId, FileHash) -> Result<()>) -> Result<()> {
        let tx = self.map.read_tx();
        let mut cur = tx.cursor();
        if !cur.set_range(&[TAG_ID])? {
            return Ok(());
        }
        loop {
            let Some((key, value)) = cur.get_current()? else {
                return Ok(());
            };
            if key.first() != Some(&TAG_ID) {
                return Ok(());
            }
            let id = u64::from_be_bytes(
                key[1..]
                    .try_into()
                    .map_err(|_| Error::corruption("malformed source id key"))?,
            );
            f(SourceId(id), FileHash::new(value))?;
            if !cur.next()? {
                return Ok(());
            }
        }
    }

    /// Number of interned sources.
    pub fn size(&self) -> u64 {
        let tx = self.map.read_tx();
        match tx.get(&[TAG_META]) {
            Ok(Some(bytes)) => {
                let mut pos = 0;
                codec::get_varint(&bytes, &mut pos).map(|n| n - 1).unwrap_or(0)
            }
            _ => 0,
        }
    }

    pub fn flush(&self) -> Result<()> {
        self.map.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fh(fill: u8) -> FileHash {
        FileHash::new(vec![fill; 16])
    }

    #[test]
    fn test_dense_monotonic_assignment() {
        let dir = tempdir().unwrap();
        let store = SourceIdStore::create(&dir.path().join("source_id_store")).unwrap();

        let (a, new_a) = store.insert(&fh(0x01)).unwrap();
        let (b, new_b) = store.insert(&fh(0x02)).unwrap();
        let (a2, new_a2) = store.insert(&fh(0x01)).unwrap();

        assert_eq!(a, SourceId(1));
        assert_eq!(b, SourceId(2));
        assert_eq!(a2, SourceId(1));
        assert!(new_a && new_b && !new_a2);
        assert_eq!(store.size(), 2);
    }

    #[test]
    fn test_bijection_both_directions() {
        let dir = tempdir().unwrap();
        let store = SourceIdStore::create(&dir.path().join("source_id_store")).unwrap();
        let (id, _) = store.insert(&fh(0xee)).unwrap();

        assert_eq!(store.find_id(&fh(0xee)).unwrap(), Some(id));
        assert_eq!(store.find_file_hash(id).unwrap(), Some(fh(0xee)));
        assert_eq!(store.find_id(&fh(0x00)).unwrap(), None);
        assert_eq!(store.find_file_hash(SourceId(99)).unwrap(), None);
        assert!(store.contains(id).unwrap());
        assert!(!store.contains(SourceId(99)).unwrap());
    }

    #[test]
    fn test_for_each_in_id_order() {
        let dir = tempdir().unwrap();
        let store = SourceIdStore::create(&dir.path().join("source_id_store")).unwrap();
        for fill in [0x0au8, 0x05, 0x01] {
            store.insert(&fh(fill)).unwrap();
        }
        let mut seen = Vec::new();
        store
            .for_each(|id, hash| {
                seen.push((id.get(), hash));
                Ok(())
            })
            .unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0], (1, fh(0x0a)));
        assert_eq!(seen[1], (2, fh(0x05)));
        assert_eq!(seen[2], (3, fh(0x01)));
    }
}
