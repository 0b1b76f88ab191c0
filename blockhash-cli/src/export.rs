// SPDX-License-Identifier: AGPL-3.0-or-later
// BlockHashDB - Content-Addressed Block Hash Database
// Copyright (C) 2026 Sushanth Reddy Vanagala (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! JSON-lines export, in the import format: sources first (in id order),
//! then block hashes in canonical hash order, so an export imported into a
//! fresh directory reproduces the database byte-identically under
//! canonical iteration.

use std::io::Write;

use serde::Serialize;
use serde_json::{json, Value};

use blockhash_core::{Result, SourceId, SourceName};
use blockhash_storage::Database;

use crate::progress::ProgressTracker;

#[derive(Serialize)]
struct SourceLine {
    file_hash: String,
    filesize: u64,
    file_type: String,
    nonprobative_count: u64,
    names: Vec<SourceName>,
}

/// Write the whole database as JSON lines.
pub fn export_lines<W: Write>(db: &Database, out: &mut W) -> Result<()> {
    let mut tracker = ProgressTracker::new("export");

    db.for_each_source(|id, file_hash| {
        let data = db.source_data(id)?.unwrap_or_default();
        let line = SourceLine {
            file_hash: file_hash.to_hex(),
            filesize: data.filesize,
            file_type: data.file_type,
            nonprobative_count: data.nonprobative_count,
            names: db.source_names(id)?,
        };
        writeln!(out, "{}", serde_json::to_string(&line).expect("source line"))?;
        Ok(())
    })?;

    let mut it = db.iterate();
    while let Some((hash, occs)) = it.next_record()? {
        let mut pairs: Vec<Value> = Vec::with_capacity(occs.len() * 2);
        for occ in &occs {
            let file_hash = db.source_file_hash(SourceId(occ.source_id))?;
            pairs.push(Value::String(file_hash.to_hex()));
            pairs.push(json!(occ.file_offset));
        }
        // entropy and label are uniform per hash in the line format; the
        // first occurrence carries them
        let line = json!({
            "block_hash": hash.to_hex(),
            "entropy": occs.first().map(|o| o.entropy).unwrap_or(0),
            "block_label": occs.first().map(|o| o.block_label.clone()).unwrap_or_default(),
            "source_offset_pairs": pairs,
        });
        writeln!(out, "{}", line)?;
        tracker.track();
    }
    tracker.done();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::import_lines;
    use blockhash_core::{Changes, FileHash, Settings, SourceData};
    use blockhash_storage::{Database, OpenMode};
    use std::io::Cursor;
    use tempfile::tempdir;

    /// Canonical view of a database: every record plus its sources.
    fn canonical(db: &Database) -> Vec<String> {
        let mut lines = Vec::new();
        let mut it = db.iterate();
        while let Some((hash, occs)) = it.next_record().unwrap() {
            for occ in occs {
                let fh = db.source_file_hash(SourceId(occ.source_id)).unwrap();
                lines.push(format!(
                    "{} {} {} {} {}",
                    hash.to_hex(),
                    fh.to_hex(),
                    occ.file_offset,
                    occ.entropy,
                    occ.block_label
                ));
            }
        }
        db.for_each_source(|id, fh| {
            let data = db.source_data(id).unwrap().unwrap_or_default();
            let names = db.source_names(id).unwrap();
            lines.push(format!("{} {} {:?} {:?}", id, fh.to_hex(), data, names));
            Ok(())
        })
        .unwrap();
        lines
    }

    #[test]
    fn test_export_import_round_trip() {
        let tmp = tempdir().unwrap();
        let db = Database::create(&tmp.path().join("db"), Settings::default()).unwrap();
        let mut changes = Changes::new();

        let f1 = FileHash::from_hex(&"01".repeat(16)).unwrap();
        let f2 = FileHash::from_hex(&"02".repeat(16)).unwrap();
        db.insert_source_data(
            &f1,
            &SourceData {
                filesize: 8000,
                file_type: "exe".into(),
                nonprobative_count: 4,
            },
        )
        .unwrap();
        db.insert_source_name(&f1, "repo1", "file1").unwrap();
        db.insert_source_name(&f1, "repo2", "file2").unwrap();
        db.insert_source_data(&f2, &SourceData::default()).unwrap();

        for (fill, src, offset) in [
            ("aa", &f1, 0u64),
            ("aa", &f2, 4096),
            ("bb", &f1, 512),
            ("cc", &f2, 1024),
        ] {
            db.insert_hash(
                &blockhash_core::BlockHash::from_hex(&fill.repeat(16)).unwrap(),
                src,
                offset,
                8,
                "W",
                &mut changes,
            )
            .unwrap();
        }

        let mut buf = Vec::new();
        export_lines(&db, &mut buf).unwrap();

        let copy = Database::create(&tmp.path().join("copy"), Settings::default()).unwrap();
        let mut import_changes = Changes::new();
        import_lines(&copy, Cursor::new(&buf), &mut import_changes).unwrap();
        assert_eq!(import_changes.hashes_inserted, changes.hashes_inserted);

        assert_eq!(canonical(&db), canonical(&copy));

        // and a second round trip is byte-identical
        let mut buf2 = Vec::new();
        export_lines(&copy, &mut buf2).unwrap();
        assert_eq!(buf, buf2);
    }

    #[test]
    fn test_round_trip_survives_reopen() {
        let tmp = tempdir().unwrap();
        let dir = tmp.path().join("db");
        let mut buf = Vec::new();
        {
            let db = Database::create(&dir, Settings::default()).unwrap();
            let mut changes = Changes::new();
            db.insert_hash(
                &blockhash_core::BlockHash::from_hex(&"aa".repeat(16)).unwrap(),
                &FileHash::from_hex(&"01".repeat(16)).unwrap(),
                0,
                0,
                "",
                &mut changes,
            )
            .unwrap();
            db.flush().unwrap();
        }
        let db = Database::open(&dir, OpenMode::ReadOnly).unwrap();
        export_lines(&db, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains(&"aa".repeat(16)));
        assert!(text.contains(&"01".repeat(16)));
    }
}
