// SPDX-License-Identifier: AGPL-3.0-or-later
// BlockHashDB - Content-Addressed Block Hash Database
// Copyright (C) 2026 Sushanth Reddy Vanagala (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Per-occurrence and per-source record types.

use serde::Serialize;

use crate::hashes::SourceId;

/// One sighting of a block hash inside a source file.
///
/// `file_offset` is a byte offset and must be a multiple of the database's
/// sector size. `entropy` and `block_label` are classifier outputs carried
/// through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Occurrence {
    pub source_id: u64,
    pub file_offset: u64,
    pub entropy: u64,
    pub block_label: String,
}

impl Occurrence {
    pub fn new(source_id: SourceId, file_offset: u64, entropy: u64, block_label: &str) -> Self {
        Self {
            source_id: source_id.get(),
            file_offset,
            entropy,
            block_label: block_label.to_string(),
        }
    }
}

/// Descriptive metadata for one source file. Last writer wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceData {
    pub filesize: u64,
    pub file_type: String,
    pub nonprobative_count: u64,
}

/// One (repository, filename) name for a source. A source owns a set of
/// names; names are never removed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct SourceName {
    pub repository_name: String,
    pub filename: String,
}

impl SourceName {
    pub fn new(repository_name: &str, filename: &str) -> Self {
        Self {
            repository_name: repository_name.to_string(),
            filename: filename.to_string(),
        }
    }
}
