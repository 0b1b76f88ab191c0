// SPDX-License-Identifier: AGPL-3.0-or-later
// BlockHashDB - Content-Addressed Block Hash Database
// Copyright (C) 2026 Sushanth Reddy Vanagala (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Source-name store: SourceId → set of (repository, filename).
//!
//! The record is the sorted set serialized as `varint n` followed by
//! length-prefixed string pairs. Inserts are idempotent on the triple;
//! names are never removed.

use std::path::Path;

use blockhash_core::{Result, SourceId, SourceName};

use crate::codec;
use crate::map::{MapMode, MappedMap};

pub struct SourceNameStore {
    map: MappedMap,
}

fn decode(bytes: &[u8]) -> Result<Vec<SourceName>> {
    let mut pos = 0;
    let n = codec::get_varint(bytes, &mut pos)? as usize;
    let mut names = Vec::with_capacity(n);
    for _ in 0..n {
        let repository_name = codec::get_str(bytes, &mut pos)?;
        let filename = codec::get_str(bytes, &mut pos)?;
        names.push(SourceName {
            repository_name,
            filename,
        });
    }
    codec::expect_end(bytes, pos)?;
    Ok(names)
}

fn encode(names: &[SourceName]) -> Vec<u8> {
    let mut buf = Vec::new();
    codec::put_varint(&mut buf, names.len() as u64);
    for n in names {
        codec::put_str(&mut buf, &n.repository_name);
        codec::put_str(&mut buf, &n.filename);
    }
    buf
}

impl SourceNameStore {
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

    /// Add one name pair to the source's set. Returns false when the pair
    /// was already present.
    pub fn insert(&self, id: SourceId, repository_name: &str, filename: &str) -> Result<bool> {
        let key = id.get().to_be_bytes();
        let name = SourceName::new(repository_name, filename);

        let mut tx = self.map.write_tx()?;
        let mut names = match tx.get(&key)? {
            Some(bytes) => decode(&bytes)?,
            None => Vec::new(),
        };
        match names.binary_search(&name) {
            Ok(_) => Ok(false),
            Err(pos) => {
                names.insert(pos, name);
                tx.put(&key, &encode(&names), false)?;
                tx.commit()?;
                Ok(true)
            }
        }
    }

    /// The source's name set, sorted; empty when none recorded.
    pub fn find(&self, id: SourceId) -> Result<Vec<SourceName>> {
        let tx = self.map.read_tx();
        match tx.get(&id.get().to_be_bytes())? {
            Some(bytes) => decode(&bytes),
            None => Ok(Vec::new()),
        }
    }

    /// Number of sources that have at least one name.
    pub fn size(&self) -> u64 {
        self.map.size()
    }

    pub fn flush(&self) -> Result<()> {
        self.map.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_insert_idempotent_on_triple() {
        let dir = tempdir().unwrap();
        let store = SourceNameStore::create(&dir.path().join("source_name_store")).unwrap();
        let id = SourceId(1);

        assert!(store.insert(id, "repo1", "a.bin").unwrap());
        assert!(store.insert(id, "repo1", "b.bin").unwrap());
        assert!(!store.insert(id, "repo1", "a.bin").unwrap());

        let names = store.find(id).unwrap();
        assert_eq!(
            names,
            vec![
                SourceName::new("repo1", "a.bin"),
                SourceName::new("repo1", "b.bin"),
            ]
        );
        assert_eq!(store.size(), 1);
    }

    #[test]
    fn test_sets_are_per_source() {
        let dir = tempdir().unwrap();
        let store = SourceNameStore::create(&dir.path().join("source_name_store")).unwrap();
        store.insert(SourceId(1), "r", "one").unwrap();
        store.insert(SourceId(2), "r", "two").unwrap();

        assert_eq!(store.find(SourceId(1)).unwrap().len(), 1);
        assert_eq!(store.find(SourceId(2)).unwrap()[0].filename, "two");
        assert!(store.find(SourceId(3)).unwrap().is_empty());
    }
}
