// SPDX-License-Identifier: AGPL-3.0-or-later
// BlockHashDB - Content-Addressed Block Hash Database
// Copyright (C) 2026 Sushanth Reddy Vanagala (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Source-data store: SourceId → (file size, file type, nonprobative count).
//! Last writer wins.

use std::path::Path;

use blockhash_core::{Result, SourceData, SourceId};

use crate::codec;
use crate::map::{MapMode, MappedMap};

pub struct SourceDataStore {
    map: MappedMap,
}

fn decode(bytes: &[u8]) -> Result<SourceData> {
    let mut pos = 0;
    let data = SourceData {
        filesize: codec::get_varint(bytes, &mut pos)?,
        file_type: codec::get_str(bytes, &mut pos)?,
        nonprobative_count: codec::get_varint(bytes, &mut pos)?,
    };
    codec::expect_end(bytes, pos)?;
    Ok(data)
}

fn encode(data: &SourceData) -> Vec<u8> {
    let mut buf = Vec::new();
    codec::put_varint(&mut buf, data.filesize);
    codec::put_str(&mut buf, &data.file_type);
    codec::put_varint(&mut buf, data.nonprobative_count);
    buf
}

impl SourceDataStore {
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

    pub fn insert(&self, id: SourceId, data: &SourceData) -> Result<()> {
        let mut tx = self.map.write_tx()?;
        tx.put(&id.get().to_be_bytes(), &encode(data), false)?;
        tx.commit()
    }

    pub fn find(&self, id: SourceId) -> Result<Option<SourceData>> {
        let tx = self.map.read_tx();
        match tx.get(&id.get().to_be_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

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
    fn test_last_writer_wins() {
        let dir = tempdir().unwrap();
        let store = SourceDataStore::create(&dir.path().join("source_data_store")).unwrap();
        let id = SourceId(1);

        store
            .insert(
                id,
                &SourceData {
                    filesize: 100,
                    file_type: "exe".into(),
                    nonprobative_count: 0,
                },
            )
            .unwrap();
        store
            .insert(
                id,
                &SourceData {
                    filesize: 8000,
                    file_type: "dll".into(),
                    nonprobative_count: 4,
                },
            )
            .unwrap();

        let data = store.find(id).unwrap().unwrap();
        assert_eq!(data.filesize, 8000);
        assert_eq!(data.file_type, "dll");
        assert_eq!(data.nonprobative_count, 4);
        assert_eq!(store.size(), 1);
    }

    #[test]
    fn test_absent_source() {
        let dir = tempdir().unwrap();
        let store = SourceDataStore::create(&dir.path().join("source_data_store")).unwrap();
        assert!(store.find(SourceId(7)).unwrap().is_none());
    }
}
