// SPDX-License-Identifier: AGPL-3.0-or-later
// BlockHashDB - Content-Addressed Block Hash Database
// Copyright (C) 2026 Sushanth Reddy Vanagala (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Command implementations. Each mutating command prints its change record
//! to stdout and appends it to the database history; report commands print
//! and touch nothing.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use rand::RngCore;
use serde::Serialize;
use serde_json::json;

use blockhash_core::settings::CURRENT_SETTINGS_VERSION;
use blockhash_core::{BlockHash, Changes, Error, FileHash, Result, Settings, SourceId, SourceName};
use blockhash_storage::{layout, ops, Database, OpenMode};

use crate::export::export_lines;
use crate::import::import_lines;
use crate::progress::ProgressTracker;

fn open_ro(dir: &Path) -> Result<Database> {
    Database::open(dir, OpenMode::ReadOnly)
}

fn open_rw(dir: &Path) -> Result<Database> {
    Database::open(dir, OpenMode::ReadWriteModify)
}

/// `-` means stdin.
fn reader_for(file: &Path) -> Result<Box<dyn BufRead>> {
    if file == Path::new("-") {
        Ok(Box::new(BufReader::new(std::io::stdin())))
    } else {
        let f = File::open(file)
            .map_err(|e| Error::precondition(format!("cannot open '{}': {}", file.display(), e)))?;
        Ok(Box::new(BufReader::new(f)))
    }
}

/// `-` means stdout.
fn writer_for(file: &Path) -> Result<Box<dyn Write>> {
    if file == Path::new("-") {
        Ok(Box::new(BufWriter::new(std::io::stdout())))
    } else {
        let f = File::create(file)
            .map_err(|e| Error::precondition(format!("cannot create '{}': {}", file.display(), e)))?;
        Ok(Box::new(BufWriter::new(f)))
    }
}

/// Operator operands must name distinct databases; aliased mappings would
/// let a writer race its own reader.
fn require_distinct(paths: &[&Path]) -> Result<()> {
    let mut canon: Vec<PathBuf> = Vec::with_capacity(paths.len());
    for p in paths {
        let c = p.canonicalize().unwrap_or_else(|_| p.to_path_buf());
        if canon.contains(&c) {
            return Err(Error::precondition(format!(
                "database paths must be distinct: '{}' repeats",
                p.display()
            )));
        }
        canon.push(c);
    }
    Ok(())
}

// -----------------------------------------------------------------------------
// Creation, import, export
// -----------------------------------------------------------------------------

pub fn create(dir: &Path, settings: Settings) -> Result<()> {
    let db = Database::create(dir, settings)?;
    db.finish("create", &Changes::new(), &[])
}

pub fn import(dir: &Path, file: &Path) -> Result<()> {
    let db = open_rw(dir)?;
    let reader = reader_for(file)?;
    let mut changes = Changes::new();
    import_lines(&db, reader, &mut changes)?;
    print!("{}", changes);
    db.finish("import", &changes, &[])
}

pub fn export(dir: &Path, file: &Path) -> Result<()> {
    let db = open_ro(dir)?;
    let mut writer = writer_for(file)?;
    export_lines(&db, &mut writer)?;
    writer.flush()?;
    Ok(())
}

// -----------------------------------------------------------------------------
// Set-algebra operators
// -----------------------------------------------------------------------------

pub fn add(a: &Path, b: &Path) -> Result<()> {
    require_distinct(&[a, b])?;
    let src = open_ro(a)?;
    let dst = ops::open_or_create_output(b, src.settings())?;
    let mut changes = Changes::new();
    ops::add(&src, &dst, &mut changes)?;
    print!("{}", changes);
    dst.finish("add", &changes, &[a])
}

pub fn add_multiple(a: &Path, b: &Path, c: &Path) -> Result<()> {
    require_distinct(&[a, b, c])?;
    let da = open_ro(a)?;
    let db = open_ro(b)?;
    da.settings().check_compatible(db.settings())?;
    let out = ops::open_or_create_output(c, da.settings())?;
    let mut changes = Changes::new();
    ops::add_multiple(&da, &db, &out, &mut changes)?;
    print!("{}", changes);
    out.finish("add_multiple", &changes, &[a, b])
}

pub fn intersect(a: &Path, b: &Path, c: &Path) -> Result<()> {
    require_distinct(&[a, b, c])?;
    let da = open_ro(a)?;
    let db = open_ro(b)?;
    da.settings().check_compatible(db.settings())?;
    let out = ops::open_or_create_output(c, da.settings())?;
    let mut changes = Changes::new();
    ops::intersect(&da, &db, &out, &mut changes)?;
    print!("{}", changes);
    out.finish("intersect", &changes, &[a, b])
}

pub fn subtract(a: &Path, b: &Path, c: &Path) -> Result<()> {
    require_distinct(&[a, b, c])?;
    let da = open_ro(a)?;
    let db = open_ro(b)?;
    da.settings().check_compatible(db.settings())?;
    let out = ops::open_or_create_output(c, da.settings())?;
    let mut changes = Changes::new();
    ops::subtract(&da, &db, &out, &mut changes)?;
    print!("{}", changes);
    out.finish("subtract", &changes, &[a, b])
}

pub fn deduplicate(a: &Path, b: &Path) -> Result<()> {
    require_distinct(&[a, b])?;
    let src = open_ro(a)?;
    let out = ops::open_or_create_output(b, src.settings())?;
    let mut changes = Changes::new();
    ops::deduplicate(&src, &out, &mut changes)?;
    print!("{}", changes);
    out.finish("deduplicate", &changes, &[a])
}

// -----------------------------------------------------------------------------
// Scanning
// -----------------------------------------------------------------------------

fn print_scan_result(db: &Database, hash: &BlockHash) -> Result<()> {
    match db.scan(hash)? {
        Some(doc) => println!("{}", doc),
        None => println!("{}", json!({"block_hash": hash.to_hex(), "count": 0})),
    }
    Ok(())
}

pub fn scan(dir: &Path, file: &Path) -> Result<()> {
    let db = open_ro(dir)?;
    let digest = db.settings().digest()?;
    let reader = reader_for(file)?;
    let mut line_number = 0u64;
    for line in reader.lines() {
        let line = line?;
        line_number += 1;
        let text = line.trim();
        if text.is_empty() || text.starts_with('#') {
            continue;
        }
        match digest.parse_block_hash(text) {
            Ok(hash) => print_scan_result(&db, &hash)?,
            Err(_) => eprintln!("Invalid hash on line {}: '{}'", line_number, text),
        }
    }
    Ok(())
}

pub fn scan_hash(dir: &Path, hash: &str) -> Result<()> {
    let db = open_ro(dir)?;
    let hash = db.settings().digest()?.parse_block_hash(hash)?;
    print_scan_result(&db, &hash)
}

// -----------------------------------------------------------------------------
// Reports
// -----------------------------------------------------------------------------

pub fn size(dir: &Path) -> Result<()> {
    let db = open_ro(dir)?;
    let sizes = db.sizes();
    println!("hash_store: {}", sizes.hash_store);
    println!("source_id_store: {}", sizes.source_id_store);
    println!("source_name_store: {}", sizes.source_name_store);
    println!("source_data_store: {}", sizes.source_data_store);
    Ok(())
}

#[derive(Serialize)]
struct SourceReportLine {
    source_id: u64,
    file_hash: String,
    filesize: u64,
    file_type: String,
    nonprobative_count: u64,
    names: Vec<SourceName>,
}

pub fn sources(dir: &Path) -> Result<()> {
    let db = open_ro(dir)?;
    db.for_each_source(|id, file_hash| {
        let data = db.source_data(id)?.unwrap_or_default();
        let line = SourceReportLine {
            source_id: id.get(),
            file_hash: file_hash.to_hex(),
            filesize: data.filesize,
            file_type: data.file_type,
            nonprobative_count: data.nonprobative_count,
            names: db.source_names(id)?,
        };
        println!("{}", serde_json::to_string(&line).expect("source line"));
        Ok(())
    })
}

/// Per-key occurrence-count distribution: count → number of hashes.
pub(crate) fn histogram_of(db: &Database) -> Result<BTreeMap<u32, u64>> {
    let mut histogram = BTreeMap::new();
    let mut it = db.iterate();
    while let Some((_, occs)) = it.next_record()? {
        *histogram.entry(occs.len() as u32).or_insert(0u64) += 1;
    }
    Ok(histogram)
}

pub fn histogram(dir: &Path) -> Result<()> {
    let db = open_ro(dir)?;
    let histogram = histogram_of(&db)?;
    let distinct: u64 = histogram.values().sum();
    let total: u64 = histogram.iter().map(|(c, n)| u64::from(*c) * n).sum();
    println!("hash histogram: total={} distinct={}", total, distinct);
    for (count, hashes) in &histogram {
        println!(
            "duplicates={} distinct_hashes={} total={}",
            count,
            hashes,
            u64::from(*count) * hashes
        );
    }
    Ok(())
}

pub fn duplicates(dir: &Path, number: u32) -> Result<()> {
    let db = open_ro(dir)?;
    let mut matched = 0u64;
    let mut it = db.iterate();
    while let Some((hash, occs)) = it.next_record()? {
        if occs.len() as u32 == number {
            println!("{}", hash.to_hex());
            matched += 1;
        }
    }
    tracing::info!(matched, number, "duplicates report complete");
    Ok(())
}

pub fn hash_table(dir: &Path, file_hash: &str) -> Result<()> {
    let db = open_ro(dir)?;
    let file_hash = db.settings().digest()?.parse_file_hash(file_hash)?;
    let Some(id) = db.source_id_of(&file_hash)? else {
        return Err(Error::precondition(format!(
            "source '{}' is not in the database",
            file_hash
        )));
    };
    let mut it = db.iterate();
    while let Some((hash, occs)) = it.next_record()? {
        for occ in occs.iter().filter(|o| o.source_id == id.get()) {
            println!("{}\t{}", hash.to_hex(), occ.file_offset);
        }
    }
    Ok(())
}

// -----------------------------------------------------------------------------
// Identified-blocks reports
// -----------------------------------------------------------------------------

/// Parse one TAB-delimited feature line: `forensic_path  hash  …`.
fn parse_feature_line(line: &str) -> Option<(&str, &str)> {
    let mut fields = line.split('\t');
    let path = fields.next()?;
    let hash = fields.next()?;
    if path.is_empty() || hash.is_empty() {
        return None;
    }
    Some((path, hash))
}

pub fn expand_identified_blocks(dir: &Path, file: &Path) -> Result<()> {
    let db = open_ro(dir)?;
    let digest = db.settings().digest()?;
    let reader = reader_for(file)?;
    let mut line_number = 0u64;
    for line in reader.lines() {
        let line = line?;
        line_number += 1;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((path, hash_hex)) = parse_feature_line(&line) else {
            eprintln!("Invalid feature line {}: '{}'", line_number, line);
            continue;
        };
        let Ok(hash) = digest.parse_block_hash(hash_hex) else {
            eprintln!("Invalid hash on feature line {}: '{}'", line_number, line);
            continue;
        };
        let doc = db
            .scan(&hash)?
            .unwrap_or_else(|| json!({"block_hash": hash.to_hex(), "count": 0}).to_string());
        println!("{}\t{}\t{}", path, hash_hex, doc);
    }
    Ok(())
}

pub fn explain_identified_blocks(dir: &Path, file: &Path, requested_max: Option<u32>) -> Result<()> {
    let db = open_ro(dir)?;
    let digest = db.settings().digest()?;
    // hashes more common than this are noise for explanation purposes
    let max = requested_max.unwrap_or(db.settings().max_duplicates);
    let reader = reader_for(file)?;

    // distinct hashes, in first-seen order
    let mut seen = std::collections::HashSet::new();
    let mut hashes: Vec<BlockHash> = Vec::new();
    let mut line_number = 0u64;
    for line in reader.lines() {
        let line = line?;
        line_number += 1;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((_, hash_hex)) = parse_feature_line(&line) else {
            eprintln!("Invalid feature line {}: '{}'", line_number, line);
            continue;
        };
        match digest.parse_block_hash(hash_hex) {
            Ok(hash) => {
                if seen.insert(hash.clone()) {
                    hashes.push(hash);
                }
            }
            Err(_) => eprintln!("Invalid hash on feature line {}: '{}'", line_number, line),
        }
    }

    println!("# hashes");
    let mut source_ids = std::collections::BTreeSet::new();
    for hash in &hashes {
        let occurrences = db.find(hash)?;
        if occurrences.len() as u32 > max {
            continue;
        }
        for occ in &occurrences {
            source_ids.insert(occ.source_id);
        }
        print_scan_result(&db, hash)?;
    }

    println!("# sources");
    for id in source_ids {
        let id = SourceId(id);
        let data = db.source_data(id)?.unwrap_or_default();
        let line = SourceReportLine {
            source_id: id.get(),
            file_hash: db.source_file_hash(id)?.to_hex(),
            filesize: data.filesize,
            file_type: data.file_type,
            nonprobative_count: data.nonprobative_count,
            names: db.source_names(id)?,
        };
        println!("{}", serde_json::to_string(&line).expect("source line"));
    }
    Ok(())
}

// -----------------------------------------------------------------------------
// Maintenance and synthetic load
// -----------------------------------------------------------------------------

pub fn rebuild_bloom(dir: &Path) -> Result<()> {
    let db = open_rw(dir)?;
    db.rebuild_bloom()?;
    db.finish("rebuild_bloom", &Changes::new(), &[])
}

pub fn upgrade(dir: &Path) -> Result<()> {
    // read_settings enforces the version gate: newer-than-us aborts
    let mut settings = layout::read_settings(dir)?;
    let from = settings.settings_version;
    settings.settings_version = CURRENT_SETTINGS_VERSION;
    layout::write_settings(dir, &settings)?;
    let db = open_rw(dir)?;
    db.finish("upgrade", &Changes::new(), &[])?;
    println!(
        "Upgraded '{}' from settings version {} to {}",
        dir.display(),
        from,
        CURRENT_SETTINGS_VERSION
    );
    Ok(())
}

pub fn add_random(dir: &Path, count: u64) -> Result<()> {
    let db = open_rw(dir)?;
    let digest_len = db.settings().digest()?.len();
    let block_size = u64::from(db.settings().block_size);
    let mut rng = rand::thread_rng();

    let mut file_hash = vec![0u8; digest_len];
    rng.fill_bytes(&mut file_hash);
    let file_hash = FileHash::new(file_hash);

    let mut changes = Changes::new();
    let mut tracker = ProgressTracker::new("add_random");
    for i in 0..count {
        let mut bytes = vec![0u8; digest_len];
        rng.fill_bytes(&mut bytes);
        db.insert_hash(
            &BlockHash::new(bytes),
            &file_hash,
            i * block_size,
            0,
            "",
            &mut changes,
        )?;
        tracker.track();
    }
    tracker.done();
    print!("{}", changes);
    db.finish("add_random", &changes, &[])
}

pub fn scan_random(dir: &Path, count: u64) -> Result<()> {
    let db = open_ro(dir)?;
    let digest_len = db.settings().digest()?.len();
    let mut rng = rand::thread_rng();

    let mut matched = 0u64;
    let mut tracker = ProgressTracker::new("scan_random");
    for _ in 0..count {
        let mut bytes = vec![0u8; digest_len];
        rng.fill_bytes(&mut bytes);
        if db.find_count(&BlockHash::new(bytes))? > 0 {
            matched += 1;
        }
        tracker.track();
    }
    tracker.done();
    println!("{} of {} random hashes matched", matched, count);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn seeded_db(tmp: &Path) -> Database {
        let db = Database::create(&tmp.join("db"), Settings::default()).unwrap();
        let f1 = FileHash::from_hex(&"01".repeat(16)).unwrap();
        let mut changes = Changes::new();
        // h1 once, h2 twice
        db.insert_hash(
            &BlockHash::from_hex(&"11".repeat(16)).unwrap(),
            &f1,
            0,
            0,
            "",
            &mut changes,
        )
        .unwrap();
        for offset in [0u64, 512] {
            db.insert_hash(
                &BlockHash::from_hex(&"22".repeat(16)).unwrap(),
                &f1,
                offset,
                0,
                "",
                &mut changes,
            )
            .unwrap();
        }
        db
    }

    #[test]
    fn test_histogram_counts_per_key() {
        let tmp = tempdir().unwrap();
        let db = seeded_db(tmp.path());
        let histogram = histogram_of(&db).unwrap();
        assert_eq!(histogram.get(&1), Some(&1));
        assert_eq!(histogram.get(&2), Some(&1));
    }

    #[test]
    fn test_upgrade_rewrites_version() {
        let tmp = tempdir().unwrap();
        let dir = tmp.path().join("db");
        {
            let db = Database::create(&dir, Settings::default()).unwrap();
            db.flush().unwrap();
        }
        // age the settings document by one version
        let mut settings = layout::read_settings(&dir).unwrap();
        settings.settings_version = CURRENT_SETTINGS_VERSION - 1;
        layout::write_settings(&dir, &settings).unwrap();

        upgrade(&dir).unwrap();
        assert_eq!(
            layout::read_settings(&dir).unwrap().settings_version,
            CURRENT_SETTINGS_VERSION
        );
        let history = blockhash_storage::history::read(&dir).unwrap();
        assert!(history.contains("<command>upgrade</command>"));
    }

    #[test]
    fn test_require_distinct() {
        let tmp = tempdir().unwrap();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        assert!(require_distinct(&[&a, &b]).is_ok());
        assert!(require_distinct(&[&a, &a]).is_err());
    }

    #[test]
    fn test_parse_feature_line() {
        assert_eq!(
            parse_feature_line("1024\tabcd\t3"),
            Some(("1024", "abcd"))
        );
        assert_eq!(parse_feature_line("no-tabs"), None);
        assert_eq!(parse_feature_line("\tabcd"), None);
    }
}
