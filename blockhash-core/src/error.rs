// SPDX-License-Identifier: AGPL-3.0-or-later
// BlockHashDB - Content-Addressed Block Hash Database
// Copyright (C) 2026 Sushanth Reddy Vanagala (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Error taxonomy for the block-hash database.
//!
//! Library code returns tagged errors; only the CLI decides what is fatal
//! and maps failures to stderr + exit code 1. Soft data rejections (bad
//! alignment, duplicate occurrence, over the duplicates cap) are *not*
//! errors: they are accounted in [`crate::Changes`] and the operation
//! proceeds.

use std::path::PathBuf;

/// Errors surfaced by the database engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A caller precondition failed: path exists/absent, bad argument,
    /// wrong open mode. The CLI prints these and exits 1.
    #[error("{0}")]
    Precondition(String),

    /// Two databases with mismatched settings were handed to a set-algebra
    /// operator. Fatal.
    #[error("incompatible databases: {0}")]
    Incompatible(String),

    /// The settings document carries a schema version newer than this
    /// engine understands.
    #[error("database at {path} uses settings version {found}, this build supports up to {supported}")]
    UnsupportedVersion {
        path: PathBuf,
        found: u32,
        supported: u32,
    },

    /// A mapped store or record decoded to something impossible. Treated
    /// as unrecoverable corruption; callers abort rather than guess.
    #[error("corruption: {0}")]
    Corruption(String),

    /// A hex digest string failed to parse or had the wrong length.
    #[error("invalid hash: {0}")]
    InvalidHash(String),

    /// A settings/history document failed to parse.
    #[error("invalid document: {0}")]
    Document(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shorthand for precondition failures built from format strings.
    pub fn precondition(msg: impl Into<String>) -> Self {
        Error::Precondition(msg.into())
    }

    /// Shorthand for corruption reports.
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }
}
