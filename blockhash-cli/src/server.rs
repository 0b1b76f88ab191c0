// SPDX-License-Identifier: AGPL-3.0-or-later
// BlockHashDB - Content-Addressed Block Hash Database
// Copyright (C) 2026 Sushanth Reddy Vanagala (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! TCP scan server.
//!
//! Line-oriented queries: one command byte, a hex block hash, newline.
//! `s` answers with the scan JSON document, `c` with a 4-byte LE count.
//! Every reply is framed as a 4-byte LE length followed by the payload;
//! length zero is the empty-set sentinel (also the answer to an
//! unparseable query). Reads are bounded by a per-connection timeout;
//! a failed connection is logged and dropped while the server continues.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use blockhash_core::{DigestDescriptor, Result};
use blockhash_storage::{Database, OpenMode};

const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Open the database read-only and serve scan queries until killed.
pub fn run(dir: &Path, port: u16) -> Result<()> {
    let db = Database::open(dir, OpenMode::ReadOnly)?;
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        tracing::info!(port, dir = %dir.display(), "scan server listening");
        serve(Arc::new(db), listener).await
    })
}

async fn serve(db: Arc<Database>, listener: TcpListener) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let db = db.clone();
        tokio::spawn(async move {
            tracing::debug!(%peer, "scan connection opened");
            if let Err(e) = handle_connection(db, stream).await {
                tracing::warn!(%peer, error = %e, "scan connection dropped");
            }
        });
    }
}

fn internal(e: blockhash_core::Error) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
}

async fn handle_connection(db: Arc<Database>, stream: TcpStream) -> std::io::Result<()> {
    let digest: DigestDescriptor = db.settings().digest().map_err(internal)?;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        let n = timeout(READ_TIMEOUT, reader.read_line(&mut line))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "read timeout"))??;
        if n == 0 {
            return Ok(()); // clean close
        }
        let query = line.trim_end();
        if query.is_empty() {
            continue;
        }

        // a multi-byte first character is just an unknown command
        let hex_hash = query.get(1..).unwrap_or("");
        let reply: Vec<u8> = match query.as_bytes()[0] {
            b's' => match digest.parse_block_hash(hex_hash) {
                Ok(hash) => db
                    .scan(&hash)
                    .map_err(internal)?
                    .map(String::into_bytes)
                    .unwrap_or_default(),
                Err(_) => {
                    tracing::debug!(query, "unparseable scan query");
                    Vec::new()
                }
            },
            b'c' => match digest.parse_block_hash(hex_hash) {
                Ok(hash) => {
                    let count = db.find_count(&hash).map_err(internal)?;
                    count.to_le_bytes().to_vec()
                }
                Err(_) => Vec::new(),
            },
            _ => {
                tracing::debug!(query, "unknown command byte");
                Vec::new()
            }
        };

        write_half
            .write_all(&(reply.len() as u32).to_le_bytes())
            .await?;
        write_half.write_all(&reply).await?;
        write_half.flush().await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockhash_core::{BlockHash, Changes, FileHash, Settings};
    use tokio::io::AsyncReadExt;
    use tempfile::tempdir;

    async fn read_reply(stream: &mut TcpStream) -> Vec<u8> {
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await.unwrap();
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut payload = vec![0u8; len];
        stream.read_exact(&mut payload).await.unwrap();
        payload
    }

    #[tokio::test]
    async fn test_scan_and_count_queries() {
        let tmp = tempdir().unwrap();
        let db = Database::create(&tmp.path().join("db"), Settings::default()).unwrap();
        let mut changes = Changes::new();
        db.insert_hash(
            &BlockHash::from_hex(&"aa".repeat(16)).unwrap(),
            &FileHash::from_hex(&"f1".repeat(16)).unwrap(),
            0,
            0,
            "",
            &mut changes,
        )
        .unwrap();

        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(Arc::new(db), listener));

        let mut stream = TcpStream::connect(addr).await.unwrap();

        // known hash: scan record
        stream
            .write_all(format!("s{}\n", "aa".repeat(16)).as_bytes())
            .await
            .unwrap();
        let payload = read_reply(&mut stream).await;
        let text = String::from_utf8(payload).unwrap();
        assert!(text.contains(&format!("\"block_hash\":\"{}\"", "aa".repeat(16))));

        // unknown hash: empty-set sentinel
        stream
            .write_all(format!("s{}\n", "bb".repeat(16)).as_bytes())
            .await
            .unwrap();
        assert!(read_reply(&mut stream).await.is_empty());

        // count query
        stream
            .write_all(format!("c{}\n", "aa".repeat(16)).as_bytes())
            .await
            .unwrap();
        let payload = read_reply(&mut stream).await;
        assert_eq!(u32::from_le_bytes(payload.try_into().unwrap()), 1);

        // garbage stays on the connection with a sentinel reply
        stream.write_all(b"xnot-a-query\n").await.unwrap();
        assert!(read_reply(&mut stream).await.is_empty());
    }
}
