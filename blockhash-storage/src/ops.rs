// SPDX-License-Identifier: AGPL-3.0-or-later
// BlockHashDB - Content-Addressed Block Hash Database
// Copyright (C) 2026 Sushanth Reddy Vanagala (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Set-algebra operators over whole databases.
//!
//! All operators stream their inputs in hash order and write through the
//! output's normal insert path, so source ids are re-interned in the output
//! and every occurrence is re-validated and re-accounted there. Source data
//! and names ride along the first time an operator touches a source.
//!
//! Settings compatibility (same digest, same block geometry) is checked up
//! front and is fatal on mismatch. A cancelled or interrupted run leaves
//! the output well-formed, holding the prefix of the stream processed so
//! far.

use std::collections::HashSet;
use std::path::Path;

use blockhash_core::{BlockHash, Changes, Occurrence, Result, Settings, SourceId};

use crate::layout;
use crate::manager::{Database, OpenMode};

/// Open the operator output at `dir`, creating it with the inputs'
/// settings when the directory is absent or empty.
pub fn open_or_create_output(dir: &Path, settings: &Settings) -> Result<Database> {
    if layout::is_creatable(dir) {
        Database::create(dir, settings.clone())
    } else {
        let db = Database::open(dir, OpenMode::ReadWriteModify)?;
        settings.check_compatible(db.settings())?;
        Ok(db)
    }
}

/// Copy one occurrence from `src` into `dst`, translating the source id
/// through `dst`'s source-ID store and carrying source metadata the first
/// time each source is seen.
fn copy_occurrence(
    src: &Database,
    dst: &Database,
    hash: &BlockHash,
    occ: &Occurrence,
    copied: &mut HashSet<u64>,
    changes: &mut Changes,
) -> Result<()> {
    let id = SourceId(occ.source_id);
    let file_hash = src.source_file_hash(id)?;
    if copied.insert(occ.source_id) {
        if let Some(data) = src.source_data(id)? {
            dst.insert_source_data(&file_hash, &data)?;
        }
        for name in src.source_names(id)? {
            dst.insert_source_name(&file_hash, &name.repository_name, &name.filename)?;
        }
    }
    dst.insert_hash(
        hash,
        &file_hash,
        occ.file_offset,
        occ.entropy,
        &occ.block_label,
        changes,
    )
}

/// Add every occurrence of `a` into `b`.
pub fn add(a: &Database, b: &Database, changes: &mut Changes) -> Result<()> {
    a.settings().check_compatible(b.settings())?;
    let mut copied = HashSet::new();
    let mut it = a.iterate();
    while let Some((hash, occs)) = it.next_record()? {
        for occ in &occs {
            copy_occurrence(a, b, &hash, occ, &mut copied, changes)?;
        }
    }
    Ok(())
}

/// Merge-stream `a` and `b` into `out` in ascending hash order, preferring
/// `a` on ties. Tied keys do not collapse: every occurrence is inserted and
/// deduplicated by `out` if identical.
pub fn add_multiple(a: &Database, b: &Database, out: &Database, changes: &mut Changes) -> Result<()> {
    a.settings().check_compatible(b.settings())?;
    a.settings().check_compatible(out.settings())?;

    let mut copied_a = HashSet::new();
    let mut copied_b = HashSet::new();
    let mut it_a = a.iterate();
    let mut it_b = b.iterate();
    let mut rec_a = it_a.next_record()?;
    let mut rec_b = it_b.next_record()?;

    loop {
        let take_a = match (&rec_a, &rec_b) {
            (None, None) => break,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (Some((ha, _)), Some((hb, _))) => ha <= hb,
        };
        if take_a {
            let (hash, occs) = rec_a.take().expect("checked above");
            for occ in &occs {
                copy_occurrence(a, out, &hash, occ, &mut copied_a, changes)?;
            }
            rec_a = it_a.next_record()?;
        } else {
            let (hash, occs) = rec_b.take().expect("checked above");
            for occ in &occs {
                copy_occurrence(b, out, &hash, occ, &mut copied_b, changes)?;
            }
            rec_b = it_b.next_record()?;
        }
    }
    Ok(())
}

/// Copy the hashes present in both inputs, with occurrences from both
/// sides. The smaller input drives the scan.
pub fn intersect(a: &Database, b: &Database, out: &Database, changes: &mut Changes) -> Result<()> {
    a.settings().check_compatible(b.settings())?;
    a.settings().check_compatible(out.settings())?;

    let (driver, other) = if a.sizes().hash_store <= b.sizes().hash_store {
        (a, b)
    } else {
        (b, a)
    };
    let mut copied_driver = HashSet::new();
    let mut copied_other = HashSet::new();

    let mut it = driver.iterate();
    while let Some((hash, occs)) = it.next_record()? {
        let other_occs = other.find(&hash)?;
        if other_occs.is_empty() {
            continue;
        }
        for occ in &occs {
            copy_occurrence(driver, out, &hash, occ, &mut copied_driver, changes)?;
        }
        for occ in &other_occs {
            copy_occurrence(other, out, &hash, occ, &mut copied_other, changes)?;
        }
    }
    Ok(())
}

/// Copy `a` minus `b`: any hash present in `b` drops as a whole key, not
/// per occurrence.
pub fn subtract(a: &Database, b: &Database, out: &Database, changes: &mut Changes) -> Result<()> {
    a.settings().check_compatible(b.settings())?;
    a.settings().check_compatible(out.settings())?;

    let mut copied = HashSet::new();
    let mut it = a.iterate();
    while let Some((hash, occs)) = it.next_record()? {
        if b.find_count(&hash)? != 0 {
            continue;
        }
        for occ in &occs {
            copy_occurrence(a, out, &hash, occ, &mut copied, changes)?;
        }
    }
    Ok(())
}

/// Copy exactly the hashes whose occurrence count in `a` is 1.
pub fn deduplicate(a: &Database, out: &Database, changes: &mut Changes) -> Result<()> {
    a.settings().check_compatible(out.settings())?;

    let mut copied = HashSet::new();
    let mut it = a.iterate();
    while let Some((hash, occs)) = it.next_record()? {
        if occs.len() != 1 {
            continue;
        }
        copy_occurrence(a, out, &hash, &occs[0], &mut copied, changes)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockhash_core::FileHash;
    use tempfile::tempdir;

    fn settings() -> Settings {
        Settings {
            max_duplicates: 10,
            ..Settings::default()
        }
    }

    fn bh(fill: &str) -> BlockHash {
        BlockHash::from_hex(&fill.repeat(16)).unwrap()
    }

    fn fh(fill: &str) -> FileHash {
        FileHash::from_hex(&fill.repeat(16)).unwrap()
    }

    fn insert(db: &Database, hash: &BlockHash, src: &FileHash, offset: u64) {
        let mut changes = Changes::new();
        db.insert_hash(hash, src, offset, 0, "", &mut changes).unwrap();
        assert_eq!(changes.hashes_inserted, 1);
    }

    /// Collect `(hash_hex, occurrence_count)` for easy comparison.
    fn contents(db: &Database) -> Vec<(String, usize)> {
        let mut out = Vec::new();
        let mut it = db.iterate();
        while let Some((hash, occs)) = it.next_record().unwrap() {
            out.push((hash.to_hex(), occs.len()));
        }
        out
    }

    /// Build the S4 fixture: A={h1→s1, h2→s1}, B={h2→s2, h3→s2}.
    fn s4_fixture(tmp: &Path) -> (Database, Database) {
        let a = Database::create(&tmp.join("a"), settings()).unwrap();
        let b = Database::create(&tmp.join("b"), settings()).unwrap();
        insert(&a, &bh("11"), &fh("aa"), 0);
        insert(&a, &bh("22"), &fh("aa"), 512);
        insert(&b, &bh("22"), &fh("bb"), 0);
        insert(&b, &bh("33"), &fh("bb"), 512);
        (a, b)
    }

    #[test]
    fn test_intersect() {
        let tmp = tempdir().unwrap();
        let (a, b) = s4_fixture(tmp.path());
        let c = Database::create(&tmp.path().join("c"), settings()).unwrap();
        let mut changes = Changes::new();
        intersect(&a, &b, &c, &mut changes).unwrap();

        // the occurrence from each side of h2
        assert_eq!(contents(&c), vec![(("22".repeat(16)), 2)]);
        assert_eq!(changes.hashes_inserted, 2);
        c.check_referential_integrity().unwrap();
    }

    #[test]
    fn test_intersect_is_symmetric() {
        let tmp = tempdir().unwrap();
        let (a, b) = s4_fixture(tmp.path());
        let c1 = Database::create(&tmp.path().join("c1"), settings()).unwrap();
        let c2 = Database::create(&tmp.path().join("c2"), settings()).unwrap();
        let mut ch1 = Changes::new();
        let mut ch2 = Changes::new();
        intersect(&a, &b, &c1, &mut ch1).unwrap();
        intersect(&b, &a, &c2, &mut ch2).unwrap();
        assert_eq!(contents(&c1), contents(&c2));
    }

    #[test]
    fn test_subtract_drops_whole_keys() {
        let tmp = tempdir().unwrap();
        let (a, b) = s4_fixture(tmp.path());
        let c = Database::create(&tmp.path().join("c"), settings()).unwrap();
        let mut changes = Changes::new();
        subtract(&a, &b, &c, &mut changes).unwrap();

        assert_eq!(contents(&c), vec![(("11".repeat(16)), 1)]);
    }

    #[test]
    fn test_add_multiple_merges() {
        let tmp = tempdir().unwrap();
        let (a, b) = s4_fixture(tmp.path());
        let c = Database::create(&tmp.path().join("c"), settings()).unwrap();
        let mut changes = Changes::new();
        add_multiple(&a, &b, &c, &mut changes).unwrap();

        assert_eq!(
            contents(&c),
            vec![
                (("11".repeat(16)), 1),
                (("22".repeat(16)), 2),
                (("33".repeat(16)), 1),
            ]
        );
        // sources from both inputs were carried
        assert_eq!(c.sizes().source_id_store, 2);
    }

    #[test]
    fn test_add_into_self_image_is_idempotent() {
        let tmp = tempdir().unwrap();
        let (a, _b) = s4_fixture(tmp.path());
        let b2 = Database::create(&tmp.path().join("b2"), settings()).unwrap();

        let mut first = Changes::new();
        add(&a, &b2, &mut first).unwrap();
        assert_eq!(first.hashes_inserted, 2);

        let mut second = Changes::new();
        add(&a, &b2, &mut second).unwrap();
        assert_eq!(second.hashes_inserted, 0);
        assert_eq!(second.hashes_not_inserted_duplicate_element, 2);
        assert_eq!(contents(&b2), contents(&a));
    }

    #[test]
    fn test_deduplicate() {
        let tmp = tempdir().unwrap();
        let a = Database::create(&tmp.path().join("a"), settings()).unwrap();
        insert(&a, &bh("11"), &fh("aa"), 0);
        insert(&a, &bh("22"), &fh("aa"), 0);
        insert(&a, &bh("22"), &fh("aa"), 512);

        let b = Database::create(&tmp.path().join("b"), settings()).unwrap();
        let mut changes = Changes::new();
        deduplicate(&a, &b, &mut changes).unwrap();

        assert_eq!(contents(&b), vec![(("11".repeat(16)), 1)]);
    }

    #[test]
    fn test_incompatible_inputs_fatal() {
        let tmp = tempdir().unwrap();
        let a = Database::create(&tmp.path().join("a"), settings()).unwrap();
        let b = Database::create(
            &tmp.path().join("b"),
            Settings {
                hash_algorithm: "sha1".into(),
                ..settings()
            },
        )
        .unwrap();
        let mut changes = Changes::new();
        assert!(add(&a, &b, &mut changes).is_err());
    }

    #[test]
    fn test_output_created_with_input_settings() {
        let tmp = tempdir().unwrap();
        let (a, _b) = s4_fixture(tmp.path());
        let out = open_or_create_output(&tmp.path().join("fresh"), a.settings()).unwrap();
        assert_eq!(out.settings(), a.settings());
        // reopening the same output is fine
        drop(out);
        let out = open_or_create_output(&tmp.path().join("fresh"), a.settings()).unwrap();
        assert!(out.is_writable());
    }
}
