// SPDX-License-Identifier: AGPL-3.0-or-later
// BlockHashDB - Content-Addressed Block Hash Database
// Copyright (C) 2026 Sushanth Reddy Vanagala (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Append-only operation history.
//!
//! Every mutating command appends one `<operation>` block to `history.xml`:
//! the command name, a timestamp, the database settings, copies of the
//! input databases' histories (for the multi-database operators), and the
//! operation's change record. The file is never rewritten.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use blockhash_core::xml::XmlWriter;
use blockhash_core::{Changes, Result, Settings};

use crate::layout::HISTORY_FILE;

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Append one operation record to the database's history.
pub fn append(
    dir: &Path,
    command: &str,
    settings: &Settings,
    changes: &Changes,
    input_dirs: &[&Path],
) -> Result<()> {
    let mut w = XmlWriter::new();
    w.push("operation");
    w.element("command", command);
    w.element("timestamp_s", unix_seconds());
    settings.write_xml(&mut w);
    for input in input_dirs {
        w.push("input_history");
        w.element("database", input.display());
        w.fragment(&read(input)?);
        w.pop();
    }
    changes.write_xml(&mut w);
    w.pop();

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(HISTORY_FILE))?;
    file.write_all(w.finish().as_bytes())?;
    Ok(())
}

/// The raw history document; empty for a database that has none yet.
pub fn read(dir: &Path) -> Result<String> {
    match std::fs::read_to_string(dir.join(HISTORY_FILE)) {
        Ok(doc) => Ok(doc),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_append_accumulates() {
        let tmp = tempdir().unwrap();
        let settings = Settings::default();
        let changes = Changes {
            hashes_inserted: 2,
            ..Changes::new()
        };

        append(tmp.path(), "import", &settings, &changes, &[]).unwrap();
        append(tmp.path(), "import", &settings, &Changes::new(), &[]).unwrap();

        let doc = read(tmp.path()).unwrap();
        assert_eq!(doc.matches("<operation>").count(), 2);
        assert!(doc.contains("<command>import</command>"));
        assert!(doc.contains("<hashes_inserted>2</hashes_inserted>"));
    }

    #[test]
    fn test_inputs_are_merged() {
        let tmp = tempdir().unwrap();
        let a = tmp.path().join("a");
        let out = tmp.path().join("out");
        std::fs::create_dir_all(&a).unwrap();
        std::fs::create_dir_all(&out).unwrap();
        let settings = Settings::default();

        append(&a, "import", &settings, &Changes::new(), &[]).unwrap();
        append(&out, "intersect", &settings, &Changes::new(), &[&a]).unwrap();

        let doc = read(&out).unwrap();
        assert!(doc.contains("<command>intersect</command>"));
        assert!(doc.contains("<input_history>"));
        // the input's own history rides along
        assert!(doc.contains("<command>import</command>"));
    }

    #[test]
    fn test_missing_history_reads_empty() {
        let tmp = tempdir().unwrap();
        assert_eq!(read(&tmp.path().join("nope")).unwrap(), "");
    }
}
