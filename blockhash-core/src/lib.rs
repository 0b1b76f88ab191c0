// SPDX-License-Identifier: AGPL-3.0-or-later
// BlockHashDB - Content-Addressed Block Hash Database
// Copyright (C) 2026 Sushanth Reddy Vanagala (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! # blockhash-core — Data Model for BlockHashDB
//!
//! The shared vocabulary of the block-hash database: binary hash newtypes,
//! the versioned settings document, the per-operation change-counter record,
//! the error taxonomy, and the small tagged-document helpers that settings,
//! changes, and history all serialize through.
//!
//! The storage engine lives in `blockhash-storage`; the command-line surface
//! in `blockhash-cli`. This crate has no I/O beyond formatting documents.

pub mod changes;
pub mod error;
pub mod hashes;
pub mod records;
pub mod settings;
pub mod xml;

pub use changes::Changes;
pub use error::{Error, Result};
pub use hashes::{BlockHash, DigestDescriptor, FileHash, SourceId};
pub use records::{Occurrence, SourceData, SourceName};
pub use settings::Settings;
