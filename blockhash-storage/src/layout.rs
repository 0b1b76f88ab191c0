// SPDX-License-Identifier: AGPL-3.0-or-later
// BlockHashDB - Content-Addressed Block Hash Database
// Copyright (C) 2026 Sushanth Reddy Vanagala (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Database directory layout.
//!
//! A database is a directory containing exactly:
//!
//! ```text
//! settings.xml        versioned parameters, fixed at creation
//! hash_store/         mapped store (data.mdb + lock.mdb)
//! source_id_store/
//! source_name_store/
//! source_data_store/
//! bloom_filter        mapped bit array (only when bloom is enabled)
//! history.xml         append-only operation log
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use blockhash_core::{Error, Result, Settings};

pub const SETTINGS_FILE: &str = "settings.xml";
pub const HISTORY_FILE: &str = "history.xml";
pub const BLOOM_FILE: &str = "bloom_filter";
pub const HASH_STORE_DIR: &str = "hash_store";
pub const SOURCE_ID_STORE_DIR: &str = "source_id_store";
pub const SOURCE_NAME_STORE_DIR: &str = "source_name_store";
pub const SOURCE_DATA_STORE_DIR: &str = "source_data_store";

/// True when the path may be used as a create target: absent, or an
/// existing empty directory.
pub fn is_creatable(dir: &Path) -> bool {
    match fs::read_dir(dir) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => !dir.exists(),
    }
}

/// Prepare a fresh database directory: validate settings, make the
/// directory, write the settings document and an empty history.
pub fn create_directory(dir: &Path, settings: &Settings) -> Result<()> {
    settings.validate()?;
    if !is_creatable(dir) {
        return Err(Error::precondition(format!(
            "'{}' already exists and is not empty",
            dir.display()
        )));
    }
    fs::create_dir_all(dir)?;
    write_settings(dir, settings)?;
    fs::write(dir.join(HISTORY_FILE), "")?;
    Ok(())
}

/// Read and version-gate the settings document of an existing database.
pub fn read_settings(dir: &Path) -> Result<Settings> {
    let path = dir.join(SETTINGS_FILE);
    let doc = fs::read_to_string(&path).map_err(|_| {
        Error::precondition(format!("'{}' is not a database (no settings.xml)", dir.display()))
    })?;
    Settings::from_xml(&doc, &path)
}

pub fn write_settings(dir: &Path, settings: &Settings) -> Result<()> {
    fs::write(dir.join(SETTINGS_FILE), settings.to_xml())?;
    Ok(())
}

pub fn settings_path(dir: &Path) -> PathBuf {
    dir.join(SETTINGS_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_and_read_back() {
        let tmp = tempdir().unwrap();
        let dir = tmp.path().join("db");
        let settings = Settings::default();
        create_directory(&dir, &settings).unwrap();
        assert_eq!(read_settings(&dir).unwrap(), settings);
        assert!(dir.join(HISTORY_FILE).exists());
    }

    #[test]
    fn test_nonempty_target_refused() {
        let tmp = tempdir().unwrap();
        let dir = tmp.path().join("db");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("stray"), "x").unwrap();
        assert!(create_directory(&dir, &Settings::default()).is_err());
    }

    #[test]
    fn test_empty_dir_is_creatable() {
        let tmp = tempdir().unwrap();
        let dir = tmp.path().join("db");
        std::fs::create_dir_all(&dir).unwrap();
        assert!(is_creatable(&dir));
        create_directory(&dir, &Settings::default()).unwrap();
        assert!(!is_creatable(&dir));
    }

    #[test]
    fn test_not_a_database() {
        let tmp = tempdir().unwrap();
        assert!(read_settings(tmp.path()).is_err());
    }
}
