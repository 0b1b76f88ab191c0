// SPDX-License-Identifier: AGPL-3.0-or-later
// BlockHashDB - Content-Addressed Block Hash Database
// Copyright (C) 2026 Sushanth Reddy Vanagala (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! The manager façade: the only writer surface over the four stores and
//! the bloom filter.
//!
//! One logical mutation (an `insert_hash`, a source write) takes the
//! façade's write mutex, so the source-id write, the hash-store write and
//! the bloom bit-set are atomic with respect to other writers. Readers take
//! snapshot transactions underneath and are never blocked by the mutex.
//!
//! Soft data rejections (wrong digest length, misaligned offset, duplicate
//! occurrence, occurrence cap) are accounted in the caller's [`Changes`]
//! record and do not error.

use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use blockhash_core::{
    BlockHash, Changes, Error, FileHash, Occurrence, Result, Settings, SourceData, SourceId,
    SourceName,
};

use crate::bloom::BloomFilter;
use crate::hash_store::{HashStore, HashStoreIter};
use crate::history;
use crate::layout;
use crate::map::MapMode;
use crate::source_data_store::SourceDataStore;
use crate::source_id_store::SourceIdStore;
use crate::source_name_store::SourceNameStore;

/// Open disposition for an existing database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    ReadWriteModify,
}

/// Entry counts per store, for the size report.
#[derive(Debug, Clone, Serialize)]
pub struct StoreSizes {
    pub hash_store: u64,
    pub source_id_store: u64,
    pub source_name_store: u64,
    pub source_data_store: u64,
}

#[derive(Serialize)]
struct ScanSource {
    source_id: u64,
    file_hash: String,
    filesize: u64,
    file_type: String,
    nonprobative_count: u64,
    names: Vec<SourceName>,
}

#[derive(Serialize)]
struct ScanRecord {
    block_hash: String,
    count: u32,
    offsets: Vec<Occurrence>,
    sources: Vec<ScanSource>,
}

/// An opened block-hash database.
pub struct Database {
    dir: PathBuf,
    settings: Settings,
    digest_len: usize,
    hash_store: HashStore,
    source_id_store: SourceIdStore,
    source_name_store: SourceNameStore,
    source_data_store: SourceDataStore,
    bloom: RwLock<BloomFilter>,
    write_mutex: Mutex<()>,
    writable: bool,
}

impl Database {
    /// Create a new database directory with the given settings and open it
    /// read-write.
    pub fn create(dir: &Path, settings: Settings) -> Result<Self> {
        layout::create_directory(dir, &settings)?;
        let digest_len = settings.digest()?.len();

        let hash_store = HashStore::create(&dir.join(layout::HASH_STORE_DIR), &settings)?;
        let source_id_store = SourceIdStore::create(&dir.join(layout::SOURCE_ID_STORE_DIR))?;
        let source_name_store = SourceNameStore::create(&dir.join(layout::SOURCE_NAME_STORE_DIR))?;
        let source_data_store = SourceDataStore::create(&dir.join(layout::SOURCE_DATA_STORE_DIR))?;
        let bloom = if settings.bloom_is_used {
            BloomFilter::create(
                &dir.join(layout::BLOOM_FILE),
                settings.bloom_m_bits,
                settings.bloom_k_functions,
            )?
        } else {
            BloomFilter::disabled()
        };

        tracing::info!(
            dir = %dir.display(),
            algorithm = %settings.hash_algorithm,
            block_size = settings.block_size,
            "created database"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            settings,
            digest_len,
            hash_store,
            source_id_store,
            source_name_store,
            source_data_store,
            bloom: RwLock::new(bloom),
            write_mutex: Mutex::new(()),
            writable: true,
        })
    }

    /// Open an existing database directory.
    pub fn open(dir: &Path, mode: OpenMode) -> Result<Self> {
        let settings = layout::read_settings(dir)?;
        settings.validate()?;
        let digest_len = settings.digest()?.len();
        let map_mode = match mode {
            OpenMode::ReadOnly => MapMode::ReadOnly,
            OpenMode::ReadWriteModify => MapMode::ReadWrite,
        };
        let writable = mode == OpenMode::ReadWriteModify;

        let hash_store = HashStore::open(&dir.join(layout::HASH_STORE_DIR), map_mode, &settings)?;
        let source_id_store =
            SourceIdStore::open(&dir.join(layout::SOURCE_ID_STORE_DIR), map_mode)?;
        let source_name_store =
            SourceNameStore::open(&dir.join(layout::SOURCE_NAME_STORE_DIR), map_mode)?;
        let source_data_store =
            SourceDataStore::open(&dir.join(layout::SOURCE_DATA_STORE_DIR), map_mode)?;
        let bloom = if settings.bloom_is_used {
            BloomFilter::open(
                &dir.join(layout::BLOOM_FILE),
                writable,
                settings.bloom_m_bits,
                settings.bloom_k_functions,
            )?
        } else {
            BloomFilter::disabled()
        };

        tracing::debug!(dir = %dir.display(), ?mode, "opened database");

        Ok(Self {
            dir: dir.to_path_buf(),
            settings,
            digest_len,
            hash_store,
            source_id_store,
            source_name_store,
            source_data_store,
            bloom: RwLock::new(bloom),
            write_mutex: Mutex::new(()),
            writable,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    // -------------------------------------------------------------------------
    // Write surface
    // -------------------------------------------------------------------------

    /// Soft validations shared by the hash insert paths. True when the
    /// occurrence may proceed; rejections are accounted in `changes`.
    fn occurrence_admissible(
        &self,
        block_hash: &BlockHash,
        file_offset: u64,
        changes: &mut Changes,
    ) -> bool {
        if block_hash.len() != self.digest_len {
            changes.hashes_not_inserted_mismatched_hash_size += 1;
            return false;
        }
        if file_offset % u64::from(self.settings.sector_size) != 0 {
            changes.hashes_not_inserted_invalid_byte_alignment += 1;
            return false;
        }
        true
    }

    /// Record one sighting of `block_hash` inside the file identified by
    /// `file_hash`. The source id is interned on first sight.
    pub fn insert_hash(
        &self,
        block_hash: &BlockHash,
        file_hash: &FileHash,
        file_offset: u64,
        entropy: u64,
        block_label: &str,
        changes: &mut Changes,
    ) -> Result<()> {
        if file_hash.len() != self.digest_len {
            changes.hashes_not_inserted_mismatched_hash_size += 1;
            return Ok(());
        }
        if !self.occurrence_admissible(block_hash, file_offset, changes) {
            return Ok(());
        }

        let _write = self.write_mutex.lock();
        let (source_id, _) = self.source_id_store.insert(file_hash)?;
        let occurrence = Occurrence::new(source_id, file_offset, entropy, block_label);
        self.hash_store
            .insert(&self.bloom.read(), block_hash.as_bytes(), occurrence, changes)
    }

    /// Record one sighting against a source id the caller already holds
    /// (from a prior intern or an earlier scan). An id that does not
    /// resolve in the source-ID store is a soft rejection, accounted as
    /// `hashes_not_inserted_unknown_source_id`.
    pub fn insert_hash_for_source(
        &self,
        block_hash: &BlockHash,
        source_id: SourceId,
        file_offset: u64,
        entropy: u64,
        block_label: &str,
        changes: &mut Changes,
    ) -> Result<()> {
        if !self.occurrence_admissible(block_hash, file_offset, changes) {
            return Ok(());
        }

        let _write = self.write_mutex.lock();
        if !self.source_id_store.contains(source_id)? {
            changes.hashes_not_inserted_unknown_source_id += 1;
            return Ok(());
        }
        let occurrence = Occurrence::new(source_id, file_offset, entropy, block_label);
        self.hash_store
            .insert(&self.bloom.read(), block_hash.as_bytes(), occurrence, changes)
    }

    /// Record source metadata, interning the source id if needed.
    pub fn insert_source_data(&self, file_hash: &FileHash, data: &SourceData) -> Result<SourceId> {
        let _write = self.write_mutex.lock();
        let (id, _) = self.source_id_store.insert(file_hash)?;
        self.source_data_store.insert(id, data)?;
        Ok(id)
    }

    /// Record one (repository, filename) name, interning the source id if
    /// needed. Idempotent on the triple.
    pub fn insert_source_name(
        &self,
        file_hash: &FileHash,
        repository_name: &str,
        filename: &str,
    ) -> Result<SourceId> {
        let _write = self.write_mutex.lock();
        let (id, _) = self.source_id_store.insert(file_hash)?;
        self.source_name_store.insert(id, repository_name, filename)?;
        Ok(id)
    }

    // -------------------------------------------------------------------------
    // Read surface
    // -------------------------------------------------------------------------

    pub fn find(&self, block_hash: &BlockHash) -> Result<Vec<Occurrence>> {
        if block_hash.len() != self.digest_len {
            return Ok(Vec::new());
        }
        self.hash_store.find(&self.bloom.read(), block_hash.as_bytes())
    }

    pub fn find_count(&self, block_hash: &BlockHash) -> Result<u32> {
        Ok(self.find(block_hash)?.len() as u32)
    }

    /// The scan document: the hash's occurrences joined with source data
    /// and names, rendered as one stable JSON object. `None` on a miss.
    pub fn scan(&self, block_hash: &BlockHash) -> Result<Option<String>> {
        let offsets = self.find(block_hash)?;
        if offsets.is_empty() {
            return Ok(None);
        }

        let mut sources: Vec<ScanSource> = Vec::new();
        for occ in &offsets {
            if sources.iter().any(|s| s.source_id == occ.source_id) {
                continue;
            }
            let id = SourceId(occ.source_id);
            let file_hash = self.source_id_store.require_file_hash(id)?;
            let data = self.source_data_store.find(id)?.unwrap_or_default();
            sources.push(ScanSource {
                source_id: occ.source_id,
                file_hash: file_hash.to_hex(),
                filesize: data.filesize,
                file_type: data.file_type,
                nonprobative_count: data.nonprobative_count,
                names: self.source_name_store.find(id)?,
            });
        }

        let record = ScanRecord {
            block_hash: block_hash.to_hex(),
            count: offsets.len() as u32,
            offsets,
            sources,
        };
        Ok(Some(serde_json::to_string(&record).expect("scan record serializes")))
    }

    /// Ordered stream over every stored hash and its occurrences.
    pub fn iterate(&self) -> HashStoreIter<'_> {
        self.hash_store.iter()
    }

    pub fn sizes(&self) -> StoreSizes {
        StoreSizes {
            hash_store: self.hash_store.size(),
            source_id_store: self.source_id_store.size(),
            source_name_store: self.source_name_store.size(),
            source_data_store: self.source_data_store.size(),
        }
    }

    pub fn source_file_hash(&self, id: SourceId) -> Result<FileHash> {
        self.source_id_store.require_file_hash(id)
    }

    pub fn source_id_of(&self, file_hash: &FileHash) -> Result<Option<SourceId>> {
        self.source_id_store.find_id(file_hash)
    }

    pub fn source_data(&self, id: SourceId) -> Result<Option<SourceData>> {
        self.source_data_store.find(id)
    }

    pub fn source_names(&self, id: SourceId) -> Result<Vec<SourceName>> {
        self.source_name_store.find(id)
    }

    /// Visit every source in id order.
    pub fn for_each_source(
        &self,
        f: impl FnMut(SourceId, FileHash) -> Result<()>,
    ) -> Result<()> {
        self.source_id_store.for_each(f)
    }

    /// Check that every occurrence's source id resolves; used by the test
    /// suite and by consistency audits.
    pub fn check_referential_integrity(&self) -> Result<()> {
        let mut it = self.iterate();
        while let Some((hash, occs)) = it.next_record()? {
            for occ in &occs {
                if !self.source_id_store.contains(SourceId(occ.source_id))? {
                    return Err(Error::corruption(format!(
                        "hash {} references unknown source id {}",
                        hash, occ.source_id
                    )));
                }
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Maintenance
    // -------------------------------------------------------------------------

    /// Rebuild the bloom filter from the hash store: delete the file, walk
    /// the store, re-add every key.
    pub fn rebuild_bloom(&self) -> Result<()> {
        if !self.writable {
            return Err(Error::precondition("rebuild_bloom needs a writable database"));
        }
        let _write = self.write_mutex.lock();
        let mut bloom_slot = self.bloom.write();

        let path = self.dir.join(layout::BLOOM_FILE);
        // drop the mapping before unlinking
        *bloom_slot = BloomFilter::disabled();
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        if !self.settings.bloom_is_used {
            tracing::info!("bloom disabled in settings; filter file removed");
            return Ok(());
        }

        let fresh = BloomFilter::create(
            &path,
            self.settings.bloom_m_bits,
            self.settings.bloom_k_functions,
        )?;
        let mut it = self.hash_store.iter();
        let mut added = 0u64;
        while let Some((hash, _)) = it.next_record()? {
            fresh.add(&self.hash_store.stored_bits(hash.as_bytes()))?;
            added += 1;
        }
        fresh.flush()?;
        tracing::info!(added, "bloom filter rebuilt");
        *bloom_slot = fresh;
        Ok(())
    }

    /// Flush all mapped stores to disk.
    pub fn flush(&self) -> Result<()> {
        self.hash_store.flush()?;
        self.source_id_store.flush()?;
        self.source_name_store.flush()?;
        self.source_data_store.flush()?;
        self.bloom.read().flush()
    }

    /// Flush and append this operation's record to the history log.
    /// `input_dirs` names the other databases a set-algebra operator read.
    pub fn finish(&self, command: &str, changes: &Changes, input_dirs: &[&Path]) -> Result<()> {
        self.flush()?;
        if self.writable {
            history::append(&self.dir, command, &self.settings, changes, input_dirs)?;
        }
        Ok(())
    }
}
