// SPDX-License-Identifier: AGPL-3.0-or-later
// BlockHashDB - Content-Addressed Block Hash Database
// Copyright (C) 2026 Sushanth Reddy Vanagala (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! JSON-lines import. Lines are one of:
//!
//! ```text
//! {"file_hash":"b9e7...", "filesize":8000, "file_type":"exe",
//!  "nonprobative_count":4, "names":[{"repository_name":"repo1",
//!  "filename":"file1"}]}
//!
//! {"block_hash":"a7df...", "entropy":8, "block_label":"W",
//!  "source_offset_pairs":["b9e7...", 4096]}
//! ```
//!
//! Comment lines start with `#`; empty lines are skipped. A malformed line
//! is reported to stderr with its line number and skipped; one bad line
//! never aborts a bulk import.

use std::io::BufRead;

use serde_json::Value;

use blockhash_core::{Changes, DigestDescriptor, Result, SourceData};
use blockhash_storage::Database;

use crate::progress::ProgressTracker;

fn report_invalid_line(line_number: u64, field: &str, line: &str) {
    eprintln!("Invalid line {} field: {}: '{}'", line_number, field, line);
}

fn read_source_line(
    db: &Database,
    digest: &DigestDescriptor,
    doc: &Value,
    line_number: u64,
    line: &str,
) -> Result<()> {
    let Some(file_hash_hex) = doc.get("file_hash").and_then(Value::as_str) else {
        report_invalid_line(line_number, "source data file_hash", line);
        return Ok(());
    };
    let Ok(file_hash) = digest.parse_file_hash(file_hash_hex) else {
        report_invalid_line(line_number, "source data file_hash", line);
        return Ok(());
    };
    let Some(filesize) = doc.get("filesize").and_then(Value::as_u64) else {
        report_invalid_line(line_number, "source data filesize", line);
        return Ok(());
    };
    let file_type = doc
        .get("file_type")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let nonprobative_count = doc
        .get("nonprobative_count")
        .and_then(Value::as_u64)
        .unwrap_or(0);

    db.insert_source_data(
        &file_hash,
        &SourceData {
            filesize,
            file_type: file_type.to_string(),
            nonprobative_count,
        },
    )?;

    let Some(names) = doc.get("names").and_then(Value::as_array) else {
        report_invalid_line(line_number, "source data names", line);
        return Ok(());
    };
    for name in names {
        let Some(repository_name) = name.get("repository_name").and_then(Value::as_str) else {
            report_invalid_line(line_number, "source data repository_name", line);
            return Ok(());
        };
        let Some(filename) = name.get("filename").and_then(Value::as_str) else {
            report_invalid_line(line_number, "source data filename", line);
            return Ok(());
        };
        db.insert_source_name(&file_hash, repository_name, filename)?;
    }
    Ok(())
}

fn read_block_hash_line(
    db: &Database,
    digest: &DigestDescriptor,
    doc: &Value,
    line_number: u64,
    line: &str,
    changes: &mut Changes,
) -> Result<()> {
    let Some(block_hash_hex) = doc.get("block_hash").and_then(Value::as_str) else {
        report_invalid_line(line_number, "block hash data block_hash", line);
        return Ok(());
    };
    let Ok(block_hash) = digest.parse_block_hash(block_hash_hex) else {
        report_invalid_line(line_number, "block hash data block_hash", line);
        return Ok(());
    };
    let entropy = doc.get("entropy").and_then(Value::as_u64).unwrap_or(0);
    let block_label = doc
        .get("block_label")
        .and_then(Value::as_str)
        .unwrap_or_default();

    let Some(pairs) = doc.get("source_offset_pairs").and_then(Value::as_array) else {
        report_invalid_line(line_number, "block hash data source_offset_pairs", line);
        return Ok(());
    };
    let mut i = 0;
    while i + 1 < pairs.len() {
        let Some(file_hash_hex) = pairs[i].as_str() else {
            report_invalid_line(line_number, "block hash data source_offset_pair source hash", line);
            return Ok(());
        };
        let Ok(file_hash) = digest.parse_file_hash(file_hash_hex) else {
            report_invalid_line(line_number, "block hash data source_offset_pair source hash", line);
            return Ok(());
        };
        let Some(file_offset) = pairs[i + 1].as_u64() else {
            report_invalid_line(line_number, "block hash data source_offset_pair file offset", line);
            return Ok(());
        };
        db.insert_hash(
            &block_hash,
            &file_hash,
            file_offset,
            entropy,
            block_label,
            changes,
        )?;
        i += 2;
    }
    Ok(())
}

/// Import every line of `reader` into `db`, accounting results in `changes`.
pub fn import_lines<R: BufRead>(db: &Database, reader: R, changes: &mut Changes) -> Result<()> {
    let digest = db.settings().digest()?;
    let mut tracker = ProgressTracker::new("import");
    let mut line_number = 0u64;

    for line in reader.lines() {
        let line = line?;
        line_number += 1;
        tracker.track();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let doc: Value = match serde_json::from_str(&line) {
            Ok(Value::Object(map)) => Value::Object(map),
            _ => {
                report_invalid_line(line_number, "DOM parse error", &line);
                continue;
            }
        };
        if doc.get("file_hash").is_some() {
            read_source_line(db, &digest, &doc, line_number, &line)?;
        } else if doc.get("block_hash").is_some() {
            read_block_hash_line(db, &digest, &doc, line_number, &line, changes)?;
        } else {
            report_invalid_line(line_number, "no file_hash or block_hash", &line);
        }
    }
    tracker.done();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockhash_core::{BlockHash, Settings};
    use std::io::Cursor;
    use tempfile::tempdir;

    fn new_db(tmp: &std::path::Path) -> Database {
        Database::create(&tmp.join("db"), Settings::default()).unwrap()
    }

    #[test]
    fn test_block_hash_line_scans_back() {
        let tmp = tempdir().unwrap();
        let db = new_db(tmp.path());
        let mut changes = Changes::new();

        let line = format!(
            "{{\"block_hash\":\"{}\",\"source_offset_pairs\":[\"{}\",4096]}}\n",
            "ab".repeat(16),
            "cd".repeat(16)
        );
        import_lines(&db, Cursor::new(line), &mut changes).unwrap();

        assert_eq!(changes.hashes_inserted, 1);
        let doc = db
            .scan(&BlockHash::from_hex(&"ab".repeat(16)).unwrap())
            .unwrap()
            .unwrap();
        assert!(doc.contains("\"source_id\":1"));
        assert!(doc.contains("\"file_offset\":4096"));
    }

    #[test]
    fn test_source_line() {
        let tmp = tempdir().unwrap();
        let db = new_db(tmp.path());
        let mut changes = Changes::new();

        let line = format!(
            "{{\"file_hash\":\"{}\",\"filesize\":8000,\"file_type\":\"exe\",\
             \"nonprobative_count\":4,\"names\":[{{\"repository_name\":\"repo1\",\
             \"filename\":\"file1\"}}]}}\n",
            "b9".repeat(16)
        );
        import_lines(&db, Cursor::new(line), &mut changes).unwrap();

        assert_eq!(db.sizes().source_id_store, 1);
        assert_eq!(db.sizes().source_data_store, 1);
        assert_eq!(db.sizes().source_name_store, 1);
    }

    #[test]
    fn test_comments_and_blanks_skipped() {
        let tmp = tempdir().unwrap();
        let db = new_db(tmp.path());
        let mut changes = Changes::new();
        let input = "# comment\n\n# another\n";
        import_lines(&db, Cursor::new(input), &mut changes).unwrap();
        assert!(changes.is_empty());
    }

    #[test]
    fn test_malformed_lines_skipped_not_fatal() {
        let tmp = tempdir().unwrap();
        let db = new_db(tmp.path());
        let mut changes = Changes::new();
        let good = format!(
            "{{\"block_hash\":\"{}\",\"source_offset_pairs\":[\"{}\",0]}}",
            "11".repeat(16),
            "cd".repeat(16)
        );
        let input = format!(
            "not json\n{{\"filesize\":1}}\n{{\"block_hash\":\"zz\",\"source_offset_pairs\":[]}}\n{}\n",
            good
        );
        import_lines(&db, Cursor::new(input), &mut changes).unwrap();
        assert_eq!(changes.hashes_inserted, 1);
        assert_eq!(db.sizes().hash_store, 1);
    }
}
