// SPDX-License-Identifier: AGPL-3.0-or-later
// BlockHashDB - Content-Addressed Block Hash Database
// Copyright (C) 2026 Sushanth Reddy Vanagala (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! The hash store: prefix-keyed records of suffix sets and occurrences.
//!
//! The map key is the leading `⌈prefix_bits/8⌉` bytes of a block hash with
//! the trailing byte masked down to `prefix_bits`. A short prefix keeps the
//! tree shallow and cache-hot; the record value carries the suffixes (the
//! trailing `suffix_bytes` bytes) that collided into the prefix, and for
//! each suffix an ordered occurrence list:
//!
//! ```text
//! record   varint n_suffixes
//!          per suffix (sorted): bytes suffix
//!                               varint n_occurrences
//!                               per occurrence: varint source_id
//!                                               varint file_offset
//!                                               varint entropy
//!                                               str    block_label
//! ```
//!
//! Two hashes agree here exactly when they agree on (prefix, suffix), which
//! for sane tunings leaves within-prefix collisions astronomically rare.
//! Iteration reconstructs a representative hash from the stored bits, with
//! the unstored middle bytes zero-filled.

use std::path::Path;

use blockhash_core::{BlockHash, Changes, Error, Occurrence, Result, Settings};

use crate::bloom::BloomFilter;
use crate::codec;
use crate::map::{Cursor, MapMode, MappedMap, ReadTx};

/// Sub-byte masks for the final prefix byte, indexed by `prefix_bits % 8`.
static MASKS: [u8; 8] = [0xff, 0x80, 0xc0, 0xe0, 0xf0, 0xf8, 0xfc, 0xfe];

pub struct HashStore {
    map: MappedMap,
    prefix_bytes: usize,
    prefix_mask: u8,
    suffix_bytes: usize,
    digest_len: usize,
    max_duplicates: u32,
}

struct SuffixEntry {
    suffix: Vec<u8>,
    occurrences: Vec<Occurrence>,
}

fn decode_record(bytes: &[u8]) -> Result<Vec<SuffixEntry>> {
    let mut pos = 0;
    let n = codec::get_varint(bytes, &mut pos)? as usize;
    let mut entries = Vec::with_capacity(n);
    for _ in 0..n {
        let suffix = codec::get_bytes(bytes, &mut pos)?;
        let n_occ = codec::get_varint(bytes, &mut pos)? as usize;
        let mut occurrences = Vec::with_capacity(n_occ);
        for _ in 0..n_occ {
            occurrences.push(Occurrence {
                source_id: codec::get_varint(bytes, &mut pos)?,
                file_offset: codec::get_varint(bytes, &mut pos)?,
                entropy: codec::get_varint(bytes, &mut pos)?,
                block_label: codec::get_str(bytes, &mut pos)?,
            });
        }
        entries.push(SuffixEntry { suffix, occurrences });
    }
    codec::expect_end(bytes, pos)?;
    Ok(entries)
}

fn encode_record(entries: &[SuffixEntry]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(entries.len() * 32);
    codec::put_varint(&mut buf, entries.len() as u64);
    for e in entries {
        codec::put_bytes(&mut buf, &e.suffix);
        codec::put_varint(&mut buf, e.occurrences.len() as u64);
        for o in &e.occurrences {
            codec::put_varint(&mut buf, o.source_id);
            codec::put_varint(&mut buf, o.file_offset);
            codec::put_varint(&mut buf, o.entropy);
            codec::put_str(&mut buf, &o.block_label);
        }
    }
    buf
}

impl HashStore {
    pub fn create(dir: &Path, settings: &Settings) -> Result<Self> {
        let map = MappedMap::create(dir, false)?;
        Self::with_map(map, settings)
    }

    pub fn open(dir: &Path, mode: MapMode, settings: &Settings) -> Result<Self> {
        let map = MappedMap::open(dir, mode)?;
        Self::with_map(map, settings)
    }

    fn with_map(map: MappedMap, settings: &Settings) -> Result<Self> {
        let digest = settings.digest()?;
        Ok(Self {
            map,
            prefix_bytes: settings.prefix_bytes(),
            prefix_mask: MASKS[(settings.hash_prefix_bits % 8) as usize],
            suffix_bytes: settings.hash_suffix_bytes as usize,
            digest_len: digest.len(),
            max_duplicates: settings.max_duplicates,
        })
    }

    /// Split a hash into its masked prefix (the map key) and suffix.
    pub fn split(&self, hash: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let prefix_len = hash.len().min(self.prefix_bytes);
        let mut prefix = hash[..prefix_len].to_vec();
        if prefix_len == self.prefix_bytes {
            prefix[prefix_len - 1] &= self.prefix_mask;
        }
        let suffix_start = hash.len().saturating_sub(self.suffix_bytes).max(prefix_len);
        let suffix = hash[suffix_start..].to_vec();
        (prefix, suffix)
    }

    /// The bits of a hash this store preserves, in front-to-back order.
    /// This is the bloom filter's input.
    pub fn stored_bits(&self, hash: &[u8]) -> Vec<u8> {
        let (mut prefix, suffix) = self.split(hash);
        prefix.extend_from_slice(&suffix);
        prefix
    }

    /// Rebuild a representative hash from stored bits; unstored middle
    /// bytes are zero.
    fn reconstruct(&self, prefix: &[u8], suffix: &[u8]) -> BlockHash {
        let mut bytes = vec![0u8; self.digest_len];
        let plen = prefix.len().min(self.digest_len);
        bytes[..plen].copy_from_slice(&prefix[..plen]);
        let sstart = self.digest_len.saturating_sub(suffix.len()).max(plen);
        let slen = suffix.len().min(self.digest_len - sstart);
        bytes[sstart..sstart + slen].copy_from_slice(&suffix[..slen]);
        BlockHash::new(bytes)
    }

    /// Insert one occurrence, maintaining the bloom filter and accounting
    /// every outcome in `changes`. The caller validates digest length,
    /// sector alignment, and source existence before calling.
    pub fn insert(
        &self,
        bloom: &BloomFilter,
        hash: &[u8],
        occurrence: Occurrence,
        changes: &mut Changes,
    ) -> Result<()> {
        let (prefix, suffix) = self.split(hash);
        let stored = self.stored_bits(hash);

        let mut tx = self.map.write_tx()?;

        // a negative bloom answer proves the record is absent, skipping the
        // read probe on the fresh-hash path
        let mut entries = if bloom.test(&stored) {
            match tx.get(&prefix)? {
                Some(bytes) => decode_record(&bytes)?,
                None => Vec::new(),
            }
        } else {
            Vec::new()
        };

        match entries.iter().position(|e| e.suffix == suffix) {
            None => {
                let pos = entries
                    .iter()
                    .position(|e| e.suffix > suffix)
                    .unwrap_or(entries.len());
                entries.insert(
                    pos,
                    SuffixEntry {
                        suffix,
                        occurrences: vec![occurrence],
                    },
                );
                changes.hashes_inserted += 1;
            }
            Some(i) => {
                let entry = &mut entries[i];
                if entry
                    .occurrences
                    .iter()
                    .any(|o| o.source_id == occurrence.source_id && o.file_offset == occurrence.file_offset)
                {
                    changes.hashes_not_inserted_duplicate_element += 1;
                    return Ok(());
                }
                if entry.occurrences.len() as u32 == self.max_duplicates {
                    changes.hashes_not_inserted_exceeds_max_duplicates += 1;
                    return Ok(());
                }
                entry.occurrences.push(occurrence);
                changes.hashes_inserted += 1;
            }
        }

        tx.put(&prefix, &encode_record(&entries), false)?;
        tx.commit()?;
        bloom.add(&stored)?;
        Ok(())
    }

    /// All occurrences recorded for this hash; empty when unknown.
    pub fn find(&self, bloom: &BloomFilter, hash: &[u8]) -> Result<Vec<Occurrence>> {
        let (prefix, suffix) = self.split(hash);
        if !bloom.test(&self.stored_bits(hash)) {
            return Ok(Vec::new());
        }
        let tx = self.map.read_tx();
        let Some(bytes) = tx.get(&prefix)? else {
            return Ok(Vec::new());
        };
        let entries = decode_record(&bytes)?;
        Ok(entries
            .into_iter()
            .find(|e| e.suffix == suffix)
            .map(|e| e.occurrences)
            .unwrap_or_default())
    }

    pub fn find_count(&self, bloom: &BloomFilter, hash: &[u8]) -> Result<u32> {
        Ok(self.find(bloom, hash)?.len() as u32)
    }

    /// Ordered traversal over every stored hash and its occurrence list.
    pub fn iter(&self) -> HashStoreIter<'_> {
        HashStoreIter {
            store: self,
            tx: self.map.read_tx(),
            started: false,
            done: false,
            leaf_key: Vec::new(),
            pending: Vec::new(),
        }
    }

    /// Number of distinct hash prefixes (map entries).
    pub fn size(&self) -> u64 {
        self.map.size()
    }

    pub fn flush(&self) -> Result<()> {
        self.map.flush()
    }
}

/// Streaming iterator over `(hash, occurrences)` in hash order. Holds a
/// read snapshot; concurrent writes are not reflected.
pub struct HashStoreIter<'s> {
    store: &'s HashStore,
    tx: ReadTx<'s>,
    started: bool,
    done: bool,
    leaf_key: Vec<u8>,
    pending: Vec<(BlockHash, Vec<Occurrence>)>,
}

impl<'s> HashStoreIter<'s> {
    /// The next record, or `None` at the end of the store.
    pub fn next_record(&mut self) -> Result<Option<(BlockHash, Vec<Occurrence>)>> {
        loop {
            if let Some(rec) = self.pending.pop() {
                return Ok(Some(rec));
            }
            if self.done {
                return Ok(None);
            }
            let mut cur: Cursor<'_, 's> = self.tx.cursor();
            let positioned = if !self.started {
                self.started = true;
                cur.first()?
            } else if cur.set_range(&self.leaf_key)? {
                // the stored key itself was already emitted; move past it
                let (k, _) = cur.get_current()?.expect("positioned cursor");
                if k == self.leaf_key {
                    cur.next()?
                } else {
                    true
                }
            } else {
                false
            };
            if !positioned {
                self.done = true;
                return Ok(None);
            }
            let (key, value) = cur.get_current()?.expect("positioned cursor");
            self.leaf_key = key.clone();
            let entries = decode_record(&value)?;
            // suffixes are sorted ascending; pop() takes from the back
            for e in entries.into_iter().rev() {
                self.pending
                    .push((self.store.reconstruct(&key, &e.suffix), e.occurrences));
            }
        }
    }
}
