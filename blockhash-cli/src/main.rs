// SPDX-License-Identifier: AGPL-3.0-or-later
// BlockHashDB - Content-Addressed Block Hash Database
// Copyright (C) 2026 Sushanth Reddy Vanagala (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! `blockhash` — command-line front end for the block-hash database.
//!
//! The library surface returns tagged errors; this binary is the only
//! place that prints them and decides the exit code: 0 on success, 1 on
//! any fatal precondition failure.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod export;
mod import;
mod progress;
mod server;

#[derive(Parser, Debug)]
#[command(name = "blockhash")]
#[command(about = "Content-addressed block-hash database for digital forensics")]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "snake_case")]
enum Command {
    /// Create a new database directory
    Create {
        dir: PathBuf,
        /// Bytes per hashed block
        #[arg(short = 'b', long, default_value_t = 4096)]
        block_size: u32,
        /// Offset alignment; must divide the block size
        #[arg(long, default_value_t = 512)]
        sector_size: u32,
        /// Digest algorithm: md5, sha1, sha256 or sha512
        #[arg(short = 'a', long, default_value = "md5")]
        algorithm: String,
        /// Per-hash occurrence cap
        #[arg(short = 'm', long, default_value_t = 20)]
        max_duplicates: u32,
        /// Hash-store key width in bits
        #[arg(long, default_value_t = 28)]
        prefix_bits: u32,
        /// Trailing hash bytes kept in the record
        #[arg(long, default_value_t = 3)]
        suffix_bytes: u32,
        /// Disable the bloom filter
        #[arg(long)]
        disable_bloom: bool,
        /// log2 of the bloom filter size in bits
        #[arg(long, default_value_t = 26)]
        bloom_m_bits: u32,
        /// Bloom index functions
        #[arg(long, default_value_t = 2)]
        bloom_k_functions: u32,
    },
    /// Import JSON lines (sources and block hashes); '-' reads stdin
    Import { dir: PathBuf, file: PathBuf },
    /// Export the database as JSON lines; '-' writes stdout
    Export { dir: PathBuf, file: PathBuf },
    /// Add every hash of A into B
    Add { a: PathBuf, b: PathBuf },
    /// Merge A and B into C
    AddMultiple { a: PathBuf, b: PathBuf, c: PathBuf },
    /// Hashes present in both A and B, occurrences from both, into C
    Intersect { a: PathBuf, b: PathBuf, c: PathBuf },
    /// Hashes of A whose key is absent from B, into C
    Subtract { a: PathBuf, b: PathBuf, c: PathBuf },
    /// Hashes of A with exactly one occurrence, into B
    Deduplicate { a: PathBuf, b: PathBuf },
    /// Scan a file of hex hashes; '-' reads stdin
    Scan { dir: PathBuf, file: PathBuf },
    /// Scan one hex hash
    ScanHash { dir: PathBuf, hash: String },
    /// Serve scan queries over TCP
    Server {
        dir: PathBuf,
        #[arg(short, long, default_value_t = 14500)]
        port: u16,
    },
    /// Print per-store entry counts
    Size { dir: PathBuf },
    /// Print one JSON line per source
    Sources { dir: PathBuf },
    /// Distribution of per-hash occurrence counts
    Histogram { dir: PathBuf },
    /// Print hashes whose occurrence count equals NUMBER
    Duplicates { dir: PathBuf, number: u32 },
    /// Print every (hash, offset) recorded for one source file hash
    HashTable { dir: PathBuf, file_hash: String },
    /// Expand a TAB-delimited identified_blocks file with source detail
    ExpandIdentifiedBlocks { dir: PathBuf, file: PathBuf },
    /// Explain the distinct hashes and sources behind an identified_blocks file
    ExplainIdentifiedBlocks {
        dir: PathBuf,
        file: PathBuf,
        /// Skip hashes with more occurrences than this
        /// (default: the database's max_duplicates)
        #[arg(short = 'm', long)]
        max: Option<u32>,
    },
    /// Delete and rebuild the bloom filter from the hash store
    RebuildBloom { dir: PathBuf },
    /// Rewrite the settings document at the current schema version
    Upgrade { dir: PathBuf },
    /// Insert COUNT random hashes under one random source
    AddRandom { dir: PathBuf, count: u64 },
    /// Scan COUNT random hashes and report the match count
    ScanRandom { dir: PathBuf, count: u64 },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> blockhash_core::Result<()> {
    match command {
        Command::Create {
            dir,
            block_size,
            sector_size,
            algorithm,
            max_duplicates,
            prefix_bits,
            suffix_bytes,
            disable_bloom,
            bloom_m_bits,
            bloom_k_functions,
        } => commands::create(
            &dir,
            blockhash_core::Settings {
                block_size,
                sector_size,
                hash_algorithm: algorithm,
                max_duplicates,
                hash_prefix_bits: prefix_bits,
                hash_suffix_bytes: suffix_bytes,
                bloom_is_used: !disable_bloom,
                bloom_m_bits,
                bloom_k_functions,
                ..blockhash_core::Settings::default()
            },
        ),
        Command::Import { dir, file } => commands::import(&dir, &file),
        Command::Export { dir, file } => commands::export(&dir, &file),
        Command::Add { a, b } => commands::add(&a, &b),
        Command::AddMultiple { a, b, c } => commands::add_multiple(&a, &b, &c),
        Command::Intersect { a, b, c } => commands::intersect(&a, &b, &c),
        Command::Subtract { a, b, c } => commands::subtract(&a, &b, &c),
        Command::Deduplicate { a, b } => commands::deduplicate(&a, &b),
        Command::Scan { dir, file } => commands::scan(&dir, &file),
        Command::ScanHash { dir, hash } => commands::scan_hash(&dir, &hash),
        Command::Server { dir, port } => server::run(&dir, port),
        Command::Size { dir } => commands::size(&dir),
        Command::Sources { dir } => commands::sources(&dir),
        Command::Histogram { dir } => commands::histogram(&dir),
        Command::Duplicates { dir, number } => commands::duplicates(&dir, number),
        Command::HashTable { dir, file_hash } => commands::hash_table(&dir, &file_hash),
        Command::ExpandIdentifiedBlocks { dir, file } => {
            commands::expand_identified_blocks(&dir, &file)
        }
        Command::ExplainIdentifiedBlocks { dir, file, max } => {
            commands::explain_identified_blocks(&dir, &file, max)
        }
        Command::RebuildBloom { dir } => commands::rebuild_bloom(&dir),
        Command::Upgrade { dir } => commands::upgrade(&dir),
        Command::AddRandom { dir, count } => commands::add_random(&dir, count),
        Command::ScanRandom { dir, count } => commands::scan_random(&dir, count),
    }
}
