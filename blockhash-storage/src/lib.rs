// SPDX-License-Identifier: AGPL-3.0-or-later
// BlockHashDB - Content-Addressed Block Hash Database
// Copyright (C) 2026 Sushanth Reddy Vanagala (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! # blockhash-storage — The Block-Hash Database Engine
//!
//! The storage engine behind the `blockhash` tool:
//!
//! - [`map`] — the memory-mapped B+tree ordered map every store sits on
//! - [`bloom`] — the negative-lookup filter in front of the hash store
//! - [`hash_store`] — prefix-keyed hash records with per-occurrence metadata
//! - [`source_id_store`], [`source_name_store`], [`source_data_store`] —
//!   the source interning and metadata tables
//! - [`manager`] — the [`manager::Database`] façade (open modes, the single
//!   writer surface, scan and iteration)
//! - [`ops`] — set-algebra operators over whole databases
//! - [`layout`], [`history`] — directory shape and the append-only log
//!
//! Concurrency model: multiple concurrent readers, one writer. The façade
//! serializes writers; readers take snapshot transactions underneath.

pub mod bloom;
pub mod codec;
pub mod hash_store;
pub mod history;
pub mod layout;
pub mod map;
pub mod manager;
pub mod ops;
pub mod source_data_store;
pub mod source_id_store;
pub mod source_name_store;

pub use manager::{Database, OpenMode, StoreSizes};
