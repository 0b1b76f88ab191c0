// SPDX-License-Identifier: AGPL-3.0-or-later
// BlockHashDB - Content-Addressed Block Hash Database
// Copyright (C) 2026 Sushanth Reddy Vanagala (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Record value encoding: LEB128 varints and length-prefixed byte strings.
//!
//! Store records are short and read-heavy, so the encoding favors
//! compactness over alignment. A record that fails to decode exactly to its
//! end is corruption, never a partial success.

use blockhash_core::{Error, Result};

pub fn put_varint(buf: &mut Vec<u8>, mut v: u64) {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

pub fn get_varint(buf: &[u8], pos: &mut usize) -> Result<u64> {
    let mut v: u64 = 0;
    let mut shift = 0u32;
    loop {
        let byte = *buf
            .get(*pos)
            .ok_or_else(|| Error::corruption("truncated varint in record"))?;
        *pos += 1;
        if shift >= 64 {
            return Err(Error::corruption("oversized varint in record"));
        }
        v |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(v);
        }
        shift += 7;
    }
}

pub fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    put_varint(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

pub fn get_bytes(buf: &[u8], pos: &mut usize) -> Result<Vec<u8>> {
    let len = get_varint(buf, pos)? as usize;
    let end = pos
        .checked_add(len)
        .filter(|&e| e <= buf.len())
        .ok_or_else(|| Error::corruption("truncated byte string in record"))?;
    let out = buf[*pos..end].to_vec();
    *pos = end;
    Ok(out)
}

pub fn put_str(buf: &mut Vec<u8>, s: &str) {
    put_bytes(buf, s.as_bytes());
}

pub fn get_str(buf: &[u8], pos: &mut usize) -> Result<String> {
    let bytes = get_bytes(buf, pos)?;
    String::from_utf8(bytes).map_err(|_| Error::corruption("non-utf8 string in record"))
}

/// Decode must land exactly on the record end.
pub fn expect_end(buf: &[u8], pos: usize) -> Result<()> {
    if pos != buf.len() {
        return Err(Error::corruption(format!(
            "record has {} trailing bytes",
            buf.len() - pos
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_roundtrip() {
        for v in [0u64, 1, 127, 128, 300, 16_383, 16_384, u32::MAX as u64, u64::MAX] {
            let mut buf = Vec::new();
            put_varint(&mut buf, v);
            let mut pos = 0;
            assert_eq!(get_varint(&buf, &mut pos).unwrap(), v);
            assert_eq!(pos, buf.len());
        }
    }

    #[test]
    fn test_varint_truncated() {
        let mut pos = 0;
        assert!(get_varint(&[0x80], &mut pos).is_err());
    }

    #[test]
    fn test_bytes_and_str() {
        let mut buf = Vec::new();
        put_str(&mut buf, "repo");
        put_bytes(&mut buf, &[1, 2, 3]);
        let mut pos = 0;
        assert_eq!(get_str(&buf, &mut pos).unwrap(), "repo");
        assert_eq!(get_bytes(&buf, &mut pos).unwrap(), vec![1, 2, 3]);
        expect_end(&buf, pos).unwrap();
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let buf = [0u8, 9u8];
        let mut pos = 0;
        get_varint(&buf, &mut pos).unwrap();
        assert!(expect_end(&buf, pos).is_err());
    }
}
