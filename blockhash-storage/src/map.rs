// SPDX-License-Identifier: AGPL-3.0-or-later
// BlockHashDB - Content-Addressed Block Hash Database
// Copyright (C) 2026 Sushanth Reddy Vanagala (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! # MappedMap — A Memory-Mapped B+tree Ordered Map
//!
//! One store directory holds `data.mdb` (the mapped page file) and
//! `lock.mdb` (writer lock placeholder). The page file is a B+tree over
//! 4 KiB pages:
//!
//! - page 0 is the header (magic, format version, flags, root, allocation
//!   cursor, entry count),
//! - branch pages route by separator keys,
//! - leaf pages hold sorted `(key, value)` cells and chain to the next leaf
//!   for cheap ordered scans,
//! - values too large to inline spill to overflow page chains.
//!
//! ## Slot and page layout
//!
//! ```text
//! header page (page 0)
//!   0   8  magic ("BHDBMAP1")
//!   8   4  format version (u32 LE)
//!  12   4  flags (bit 0: duplicate values per key allowed)
//!  16   8  root page
//!  24   8  next unallocated page
//!  32   8  entry count
//!
//! leaf page      [kind=1][pad][ncells u16][next_leaf u64][pad u32] cells…
//!   leaf cell    key_len u16 | val_len u32 | ovf_page u64 | key | inline val
//! branch page    [kind=2][pad][ncells u16][leftmost u64][pad u32] cells…
//!   branch cell  key_len u16 | child u64 | key
//! overflow page  [kind=3][pad*3][chunk_len u32][next u64] data…
//! ```
//!
//! ## Concurrency
//!
//! Many concurrent readers, one writer, enforced by a `parking_lot::RwLock`
//! over the mapping. A read transaction pins the lock for its lifetime, so
//! cursors observe a consistent tree; the writer grows the backing file
//! *before* mutating so a write never fails midway for space. There is no
//! free list: stores only ever grow, and an overwritten overflow chain is
//! abandoned in place.
//!
//! Structural errors are unrecoverable corruption; callers abort rather
//! than repair.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapMut, MmapOptions};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use blockhash_core::{Error, Result};

pub const PAGE_SIZE: usize = 4096;

const MAGIC: [u8; 8] = *b"BHDBMAP1";
const FORMAT_VERSION: u32 = 1;
const INITIAL_PAGES: u64 = 64;

const DATA_FILE: &str = "data.mdb";
const LOCK_FILE: &str = "lock.mdb";

const HDR_OFF_MAGIC: usize = 0;
const HDR_OFF_VERSION: usize = 8;
const HDR_OFF_FLAGS: usize = 12;
const HDR_OFF_ROOT: usize = 16;
const HDR_OFF_NEXT_PAGE: usize = 24;
const HDR_OFF_ENTRY_COUNT: usize = 32;

const FLAG_DUP: u32 = 1;

const PAGE_LEAF: u8 = 1;
const PAGE_BRANCH: u8 = 2;
const PAGE_OVERFLOW: u8 = 3;

const PAGE_HDR: usize = 16;
const LEAF_CELL_HDR: usize = 2 + 4 + 8;
const BRANCH_CELL_HDR: usize = 2 + 8;
const OVF_CAP: usize = PAGE_SIZE - PAGE_HDR;

/// Values above this length go to an overflow chain instead of the leaf.
const INLINE_MAX: usize = 1024;
/// Keys are short by construction (hash prefixes, tagged ids).
const KEY_MAX: usize = 256;
/// Page budget reserved per write beyond the overflow chain itself: room
/// for splits along the descent path plus a new root.
const WRITE_RESERVE: u64 = 40;

#[inline]
fn rd_u16(d: &[u8], off: usize) -> u16 {
    u16::from_le_bytes(d[off..off + 2].try_into().unwrap())
}
#[inline]
fn rd_u32(d: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(d[off..off + 4].try_into().unwrap())
}
#[inline]
fn rd_u64(d: &[u8], off: usize) -> u64 {
    u64::from_le_bytes(d[off..off + 8].try_into().unwrap())
}
#[inline]
fn wr_u16(d: &mut [u8], off: usize, v: u16) {
    d[off..off + 2].copy_from_slice(&v.to_le_bytes());
}
#[inline]
fn wr_u32(d: &mut [u8], off: usize, v: u32) {
    d[off..off + 4].copy_from_slice(&v.to_le_bytes());
}
#[inline]
fn wr_u64(d: &mut [u8], off: usize, v: u64) {
    d[off..off + 8].copy_from_slice(&v.to_le_bytes());
}

/// Outcome of a `put`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// A new entry was stored.
    Inserted,
    /// Single-value map: the key existed and its value was replaced.
    Overwrote,
    /// Duplicate map with `no_dup_data`: the exact pair already existed.
    RejectedDuplicate,
}

/// Open disposition for a store directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapMode {
    ReadOnly,
    ReadWrite,
}

enum MapBuf {
    Ro(Mmap),
    Rw(MmapMut),
}

impl MapBuf {
    fn bytes(&self) -> &[u8] {
        match self {
            MapBuf::Ro(m) => m,
            MapBuf::Rw(m) => m,
        }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        match self {
            MapBuf::Ro(_) => unreachable!("write into read-only mapping"),
            MapBuf::Rw(m) => m,
        }
    }
}

struct MapInner {
    file: File,
    mm: MapBuf,
}

/// Memory-mapped ordered map; see module docs.
pub struct MappedMap {
    inner: RwLock<MapInner>,
    path: PathBuf,
    writable: bool,
    dup: bool,
}

// -----------------------------------------------------------------------------
// Page parsing and building
// -----------------------------------------------------------------------------

#[derive(Clone)]
struct LeafCell {
    key: Vec<u8>,
    val_len: u32,
    ovf: u64,
    inline: Vec<u8>,
}

struct BranchCell {
    key: Vec<u8>,
    child: u64,
}

fn page_slice(d: &[u8], page: u64) -> Result<&[u8]> {
    let start = (page as usize)
        .checked_mul(PAGE_SIZE)
        .filter(|&s| s + PAGE_SIZE <= d.len())
        .ok_or_else(|| Error::corruption(format!("page {} beyond mapped file", page)))?;
    Ok(&d[start..start + PAGE_SIZE])
}

fn page_kind(d: &[u8], page: u64) -> Result<u8> {
    Ok(page_slice(d, page)?[0])
}

fn parse_leaf(d: &[u8], page: u64) -> Result<(Vec<LeafCell>, u64)> {
    let p = page_slice(d, page)?;
    if p[0] != PAGE_LEAF {
        return Err(Error::corruption(format!("page {} is not a leaf", page)));
    }
    let ncells = rd_u16(p, 2) as usize;
    let next_leaf = rd_u64(p, 4);
    let mut cells = Vec::with_capacity(ncells);
    let mut off = PAGE_HDR;
    for _ in 0..ncells {
        if off + LEAF_CELL_HDR > PAGE_SIZE {
            return Err(Error::corruption(format!("leaf {} cell overruns page", page)));
        }
        let key_len = rd_u16(p, off) as usize;
        let val_len = rd_u32(p, off + 2);
        let ovf = rd_u64(p, off + 6);
        off += LEAF_CELL_HDR;
        let inline_len = if ovf == 0 { val_len as usize } else { 0 };
        if off + key_len + inline_len > PAGE_SIZE {
            return Err(Error::corruption(format!("leaf {} cell overruns page", page)));
        }
        let key = p[off..off + key_len].to_vec();
        off += key_len;
        let inline = p[off..off + inline_len].to_vec();
        off += inline_len;
        cells.push(LeafCell {
            key,
            val_len,
            ovf,
            inline,
        });
    }
    Ok((cells, next_leaf))
}

fn parse_branch(d: &[u8], page: u64) -> Result<(u64, Vec<BranchCell>)> {
    let p = page_slice(d, page)?;
    if p[0] != PAGE_BRANCH {
        return Err(Error::corruption(format!("page {} is not a branch", page)));
    }
    let ncells = rd_u16(p, 2) as usize;
    let leftmost = rd_u64(p, 4);
    let mut cells = Vec::with_capacity(ncells);
    let mut off = PAGE_HDR;
    for _ in 0..ncells {
        if off + BRANCH_CELL_HDR > PAGE_SIZE {
            return Err(Error::corruption(format!("branch {} cell overruns page", page)));
        }
        let key_len = rd_u16(p, off) as usize;
        let child = rd_u64(p, off + 2);
        off += BRANCH_CELL_HDR;
        if off + key_len > PAGE_SIZE {
            return Err(Error::corruption(format!("branch {} cell overruns page", page)));
        }
        let key = p[off..off + key_len].to_vec();
        off += key_len;
        cells.push(BranchCell { key, child });
    }
    Ok((leftmost, cells))
}

fn leaf_bytes(cells: &[LeafCell]) -> usize {
    PAGE_HDR
        + cells
            .iter()
            .map(|c| LEAF_CELL_HDR + c.key.len() + c.inline.len())
            .sum::<usize>()
}

fn build_leaf(cells: &[LeafCell], next_leaf: u64) -> Option<Vec<u8>> {
    if leaf_bytes(cells) > PAGE_SIZE {
        return None;
    }
    let mut p = vec![0u8; PAGE_SIZE];
    p[0] = PAGE_LEAF;
    wr_u16(&mut p, 2, cells.len() as u16);
    wr_u64(&mut p, 4, next_leaf);
    let mut off = PAGE_HDR;
    for c in cells {
        wr_u16(&mut p, off, c.key.len() as u16);
        wr_u32(&mut p, off + 2, c.val_len);
        wr_u64(&mut p, off + 6, c.ovf);
        off += LEAF_CELL_HDR;
        p[off..off + c.key.len()].copy_from_slice(&c.key);
        off += c.key.len();
        p[off..off + c.inline.len()].copy_from_slice(&c.inline);
        off += c.inline.len();
    }
    Some(p)
}

fn build_branch(leftmost: u64, cells: &[BranchCell]) -> Option<Vec<u8>> {
    let used = PAGE_HDR
        + cells
            .iter()
            .map(|c| BRANCH_CELL_HDR + c.key.len())
            .sum::<usize>();
    if used > PAGE_SIZE {
        return None;
    }
    let mut p = vec![0u8; PAGE_SIZE];
    p[0] = PAGE_BRANCH;
    wr_u16(&mut p, 2, cells.len() as u16);
    wr_u64(&mut p, 4, leftmost);
    let mut off = PAGE_HDR;
    for c in cells {
        wr_u16(&mut p, off, c.key.len() as u16);
        wr_u64(&mut p, off + 2, c.child);
        off += BRANCH_CELL_HDR;
        p[off..off + c.key.len()].copy_from_slice(&c.key);
        off += c.key.len();
    }
    Some(p)
}

/// Read a cell's full value, following its overflow chain if present.
fn read_value(d: &[u8], cell: &LeafCell) -> Result<Vec<u8>> {
    if cell.ovf == 0 {
        return Ok(cell.inline.clone());
    }
    let mut out = Vec::with_capacity(cell.val_len as usize);
    let mut page = cell.ovf;
    while page != 0 {
        let p = page_slice(d, page)?;
        if p[0] != PAGE_OVERFLOW {
            return Err(Error::corruption(format!("page {} is not an overflow page", page)));
        }
        let chunk = rd_u32(p, 4) as usize;
        if chunk > OVF_CAP {
            return Err(Error::corruption(format!("overflow page {} chunk too large", page)));
        }
        out.extend_from_slice(&p[PAGE_HDR..PAGE_HDR + chunk]);
        page = rd_u64(p, 8);
    }
    if out.len() != cell.val_len as usize {
        return Err(Error::corruption("overflow chain length mismatch"));
    }
    Ok(out)
}

/// Route within a branch: leftmost child for keys below the first separator,
/// otherwise the child of the last separator `<= key`.
fn branch_child(leftmost: u64, cells: &[BranchCell], key: &[u8]) -> u64 {
    let mut child = leftmost;
    for c in cells {
        if c.key.as_slice() <= key {
            child = c.child;
        } else {
            break;
        }
    }
    child
}

fn descend_to_leaf(d: &[u8], root: u64, key: &[u8]) -> Result<u64> {
    let mut page = root;
    loop {
        match page_kind(d, page)? {
            PAGE_LEAF => return Ok(page),
            PAGE_BRANCH => {
                let (leftmost, cells) = parse_branch(d, page)?;
                page = branch_child(leftmost, &cells, key);
            }
            k => return Err(Error::corruption(format!("page {} has bad kind {}", page, k))),
        }
    }
}

fn descend_leftmost(d: &[u8], root: u64) -> Result<u64> {
    let mut page = root;
    loop {
        match page_kind(d, page)? {
            PAGE_LEAF => return Ok(page),
            PAGE_BRANCH => {
                let (leftmost, _) = parse_branch(d, page)?;
                page = leftmost;
            }
            k => return Err(Error::corruption(format!("page {} has bad kind {}", page, k))),
        }
    }
}

// -----------------------------------------------------------------------------
// MapInner: header access and mutation
// -----------------------------------------------------------------------------

impl MapInner {
    fn data(&self) -> &[u8] {
        self.mm.bytes()
    }

    fn root(&self) -> u64 {
        rd_u64(self.data(), HDR_OFF_ROOT)
    }

    fn next_page(&self) -> u64 {
        rd_u64(self.data(), HDR_OFF_NEXT_PAGE)
    }

    fn entry_count(&self) -> u64 {
        rd_u64(self.data(), HDR_OFF_ENTRY_COUNT)
    }

    fn set_root(&mut self, v: u64) {
        wr_u64(self.mm.bytes_mut(), HDR_OFF_ROOT, v);
    }

    fn set_next_page(&mut self, v: u64) {
        wr_u64(self.mm.bytes_mut(), HDR_OFF_NEXT_PAGE, v);
    }

    fn set_entry_count(&mut self, v: u64) {
        wr_u64(self.mm.bytes_mut(), HDR_OFF_ENTRY_COUNT, v);
    }

    fn file_pages(&self) -> u64 {
        (self.data().len() / PAGE_SIZE) as u64
    }

    /// Grow the backing file until at least `extra` pages are free beyond
    /// the allocation cursor, doubling each round, then remap.
    fn ensure_capacity(&mut self, extra: u64) -> Result<()> {
        let needed = self.next_page() + extra;
        let mut pages = self.file_pages();
        if needed <= pages {
            return Ok(());
        }
        while pages < needed {
            pages *= 2;
        }
        let new_len = pages * PAGE_SIZE as u64;
        self.file.set_len(new_len)?;
        let mm = unsafe { MmapOptions::new().map_mut(&self.file)? };
        tracing::debug!(new_len, "mapped map grown");
        self.mm = MapBuf::Rw(mm);
        Ok(())
    }

    /// Hand out the next page. Capacity must have been ensured.
    fn alloc_page(&mut self) -> Result<u64> {
        let page = self.next_page();
        if page + 1 > self.file_pages() {
            return Err(Error::corruption("page allocation beyond mapped file"));
        }
        self.set_next_page(page + 1);
        let d = self.mm.bytes_mut();
        let start = page as usize * PAGE_SIZE;
        d[start..start + PAGE_SIZE].fill(0);
        Ok(page)
    }

    fn write_page(&mut self, page: u64, image: &[u8]) {
        let d = self.mm.bytes_mut();
        let start = page as usize * PAGE_SIZE;
        d[start..start + PAGE_SIZE].copy_from_slice(image);
    }

    /// Store a value in a fresh overflow chain; returns the head page.
    fn write_overflow(&mut self, val: &[u8]) -> Result<u64> {
        let mut head = 0u64;
        let mut prev = 0u64;
        for chunk in val.chunks(OVF_CAP) {
            let page = self.alloc_page()?;
            let mut image = vec![0u8; PAGE_SIZE];
            image[0] = PAGE_OVERFLOW;
            wr_u32(&mut image, 4, chunk.len() as u32);
            self.write_page(page, &image);
            let d = self.mm.bytes_mut();
            let start = page as usize * PAGE_SIZE;
            d[start + PAGE_HDR..start + PAGE_HDR + chunk.len()].copy_from_slice(chunk);
            if head == 0 {
                head = page;
            } else {
                let prev_start = prev as usize * PAGE_SIZE;
                wr_u64(&mut d[prev_start..prev_start + PAGE_SIZE], 8, page);
            }
            prev = page;
        }
        Ok(head)
    }

    fn make_cell(&mut self, key: &[u8], val: &[u8]) -> Result<LeafCell> {
        if val.len() <= INLINE_MAX {
            Ok(LeafCell {
                key: key.to_vec(),
                val_len: val.len() as u32,
                ovf: 0,
                inline: val.to_vec(),
            })
        } else {
            let ovf = self.write_overflow(val)?;
            Ok(LeafCell {
                key: key.to_vec(),
                val_len: val.len() as u32,
                ovf,
                inline: Vec::new(),
            })
        }
    }

    /// Recursive insert. Returns the outcome and, when the target page had
    /// to split, the separator key and new right page for the parent.
    fn insert_at(
        &mut self,
        page: u64,
        key: &[u8],
        val: &[u8],
        no_dup: bool,
        dup: bool,
    ) -> Result<(PutOutcome, Option<(Vec<u8>, u64)>)> {
        match page_kind(self.data(), page)? {
            PAGE_BRANCH => self.insert_at_branch(page, key, val, no_dup, dup),
            PAGE_LEAF => self.insert_at_leaf(page, key, val, no_dup, dup),
            k => Err(Error::corruption(format!("page {} has bad kind {}", page, k))),
        }
    }

    fn insert_at_branch(
        &mut self,
        page: u64,
        key: &[u8],
        val: &[u8],
        no_dup: bool,
        dup: bool,
    ) -> Result<(PutOutcome, Option<(Vec<u8>, u64)>)> {
        let (leftmost, mut cells) = parse_branch(self.data(), page)?;
        let child = branch_child(leftmost, &cells, key);
        let (outcome, split) = self.insert_at(child, key, val, no_dup, dup)?;
        let Some((sep, right)) = split else {
            return Ok((outcome, None));
        };

        let pos = cells.partition_point(|c| c.key.as_slice() <= sep.as_slice());
        cells.insert(pos, BranchCell { key: sep, child: right });

        if let Some(image) = build_branch(leftmost, &cells) {
            self.write_page(page, &image);
            return Ok((outcome, None));
        }

        // branch split: middle separator moves up
        let mid = cells.len() / 2;
        let up = cells[mid].key.clone();
        let right_leftmost = cells[mid].child;
        let right_cells: Vec<BranchCell> = cells.drain(mid + 1..).collect();
        cells.pop(); // the middle cell itself

        let right_page = self.alloc_page()?;
        let left_image = build_branch(leftmost, &cells)
            .ok_or_else(|| Error::corruption("branch split produced oversized left page"))?;
        let right_image = build_branch(right_leftmost, &right_cells)
            .ok_or_else(|| Error::corruption("branch split produced oversized right page"))?;
        self.write_page(page, &left_image);
        self.write_page(right_page, &right_image);
        Ok((outcome, Some((up, right_page))))
    }

    fn insert_at_leaf(
        &mut self,
        page: u64,
        key: &[u8],
        val: &[u8],
        no_dup: bool,
        dup: bool,
    ) -> Result<(PutOutcome, Option<(Vec<u8>, u64)>)> {
        let (mut cells, next_leaf) = parse_leaf(self.data(), page)?;

        let outcome;
        if dup {
            // cells ordered by (key, value); duplicates of a key are adjacent
            let mut pos = cells.len();
            let mut exact = false;
            for (i, c) in cells.iter().enumerate() {
                match c.key.as_slice().cmp(key) {
                    std::cmp::Ordering::Less => continue,
                    std::cmp::Ordering::Greater => {
                        pos = i;
                        break;
                    }
                    std::cmp::Ordering::Equal => {
                        let existing = read_value(self.data(), c)?;
                        match existing.as_slice().cmp(val) {
                            std::cmp::Ordering::Less => continue,
                            std::cmp::Ordering::Greater => {
                                pos = i;
                                break;
                            }
                            std::cmp::Ordering::Equal => {
                                pos = i;
                                exact = true;
                                break;
                            }
                        }
                    }
                }
            }
            if exact && no_dup {
                return Ok((PutOutcome::RejectedDuplicate, None));
            }
            let cell = self.make_cell(key, val)?;
            cells.insert(pos, cell);
            outcome = PutOutcome::Inserted;
        } else {
            match cells.iter().position(|c| c.key.as_slice() >= key) {
                Some(i) if cells[i].key.as_slice() == key => {
                    // overwrite in place; an old overflow chain is abandoned
                    let cell = self.make_cell(key, val)?;
                    cells[i] = cell;
                    outcome = PutOutcome::Overwrote;
                }
                Some(i) => {
                    let cell = self.make_cell(key, val)?;
                    cells.insert(i, cell);
                    outcome = PutOutcome::Inserted;
                }
                None => {
                    let cell = self.make_cell(key, val)?;
                    cells.push(cell);
                    outcome = PutOutcome::Inserted;
                }
            }
        }

        if let Some(image) = build_leaf(&cells, next_leaf) {
            self.write_page(page, &image);
            if outcome == PutOutcome::Inserted {
                self.set_entry_count(self.entry_count() + 1);
            }
            return Ok((outcome, None));
        }

        // split near the byte midpoint, snapped to a key boundary so equal
        // keys never straddle two leaves
        let total = leaf_bytes(&cells);
        let mut acc = PAGE_HDR;
        let mut split_at = 0usize;
        for (i, c) in cells.iter().enumerate() {
            acc += LEAF_CELL_HDR + c.key.len() + c.inline.len();
            if acc >= total / 2 {
                split_at = i + 1;
                break;
            }
        }
        split_at = split_at.clamp(1, cells.len() - 1);
        while split_at < cells.len() && cells[split_at].key == cells[split_at - 1].key {
            split_at += 1;
        }
        if split_at == cells.len() {
            split_at -= 1;
            while split_at > 0 && cells[split_at].key == cells[split_at - 1].key {
                split_at -= 1;
            }
            if split_at == 0 {
                return Err(Error::corruption(
                    "duplicate set for one key exceeds page capacity",
                ));
            }
        }

        let right_cells: Vec<LeafCell> = cells.drain(split_at..).collect();
        let right_page = self.alloc_page()?;
        let sep = right_cells[0].key.clone();
        let left_image = build_leaf(&cells, right_page)
            .ok_or_else(|| Error::corruption("leaf split produced oversized left page"))?;
        let right_image = build_leaf(&right_cells, next_leaf)
            .ok_or_else(|| Error::corruption("leaf split produced oversized right page"))?;
        self.write_page(page, &left_image);
        self.write_page(right_page, &right_image);
        if outcome == PutOutcome::Inserted {
            self.set_entry_count(self.entry_count() + 1);
        }
        Ok((outcome, Some((sep, right_page))))
    }
}

// -----------------------------------------------------------------------------
// MappedMap: open/create and transactions
// -----------------------------------------------------------------------------

impl MappedMap {
    /// Create a fresh store directory. Fails if `data.mdb` already exists.
    pub fn create(dir: &Path, dup: bool) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let data_path = dir.join(DATA_FILE);
        if data_path.exists() {
            return Err(Error::precondition(format!(
                "store already exists at {}",
                data_path.display()
            )));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&data_path)?;
        file.set_len(INITIAL_PAGES * PAGE_SIZE as u64)?;
        let mut mm = unsafe { MmapOptions::new().map_mut(&file)? };

        mm[HDR_OFF_MAGIC..HDR_OFF_MAGIC + 8].copy_from_slice(&MAGIC);
        wr_u32(&mut mm, HDR_OFF_VERSION, FORMAT_VERSION);
        wr_u32(&mut mm, HDR_OFF_FLAGS, if dup { FLAG_DUP } else { 0 });
        wr_u64(&mut mm, HDR_OFF_ROOT, 1);
        wr_u64(&mut mm, HDR_OFF_NEXT_PAGE, 2);
        wr_u64(&mut mm, HDR_OFF_ENTRY_COUNT, 0);
        // page 1: the empty root leaf
        mm[PAGE_SIZE] = PAGE_LEAF;

        mm.flush()?;
        File::create(dir.join(LOCK_FILE))?;

        Ok(Self {
            inner: RwLock::new(MapInner {
                file,
                mm: MapBuf::Rw(mm),
            }),
            path: data_path,
            writable: true,
            dup,
        })
    }

    /// Open an existing store directory.
    pub fn open(dir: &Path, mode: MapMode) -> Result<Self> {
        let data_path = dir.join(DATA_FILE);
        let writable = mode == MapMode::ReadWrite;
        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(&data_path)
            .map_err(|e| {
                Error::precondition(format!("cannot open {}: {}", data_path.display(), e))
            })?;
        let mm = if writable {
            MapBuf::Rw(unsafe { MmapOptions::new().map_mut(&file)? })
        } else {
            MapBuf::Ro(unsafe { MmapOptions::new().map(&file)? })
        };

        let d = mm.bytes();
        if d.len() < 2 * PAGE_SIZE || d.len() % PAGE_SIZE != 0 {
            return Err(Error::corruption(format!(
                "{} has invalid size {}",
                data_path.display(),
                d.len()
            )));
        }
        if d[HDR_OFF_MAGIC..HDR_OFF_MAGIC + 8] != MAGIC {
            return Err(Error::corruption(format!(
                "{} has bad magic",
                data_path.display()
            )));
        }
        let version = rd_u32(d, HDR_OFF_VERSION);
        if version != FORMAT_VERSION {
            return Err(Error::corruption(format!(
                "{} has unsupported map format {}",
                data_path.display(),
                version
            )));
        }
        let next_page = rd_u64(d, HDR_OFF_NEXT_PAGE);
        let root = rd_u64(d, HDR_OFF_ROOT);
        if root == 0 || root >= next_page || next_page > (d.len() / PAGE_SIZE) as u64 {
            return Err(Error::corruption(format!(
                "{} has inconsistent header",
                data_path.display()
            )));
        }
        let dup = rd_u32(d, HDR_OFF_FLAGS) & FLAG_DUP != 0;

        Ok(Self {
            inner: RwLock::new(MapInner { file, mm }),
            path: data_path,
            writable,
            dup,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entry count for size reports.
    pub fn size(&self) -> u64 {
        self.inner.read().entry_count()
    }

    /// Begin a snapshot read transaction.
    pub fn read_tx(&self) -> ReadTx<'_> {
        ReadTx {
            guard: self.inner.read(),
        }
    }

    /// Begin the (exclusive) write transaction. Grows the backing file
    /// first so readers never observe an out-of-space failure mid-write.
    pub fn write_tx(&self) -> Result<WriteTx<'_>> {
        if !self.writable {
            return Err(Error::precondition(format!(
                "{} is open read-only",
                self.path.display()
            )));
        }
        let mut guard = self.inner.write();
        guard.ensure_capacity(WRITE_RESERVE)?;
        Ok(WriteTx {
            guard,
            dup: self.dup,
        })
    }

    pub fn flush(&self) -> Result<()> {
        if !self.writable {
            return Ok(());
        }
        let inner = self.inner.read();
        if let MapBuf::Rw(mm) = &inner.mm {
            mm.flush()?;
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Transactions
// -----------------------------------------------------------------------------

/// Snapshot read transaction. Holds the reader lock for its lifetime.
pub struct ReadTx<'m> {
    guard: RwLockReadGuard<'m, MapInner>,
}

impl<'m> ReadTx<'m> {
    fn data(&self) -> &[u8] {
        self.guard.data()
    }

    /// Point lookup; for duplicate maps returns the first value of the key.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        lookup(self.data(), self.guard.root(), key)
    }

    pub fn cursor(&self) -> Cursor<'_, 'm> {
        Cursor {
            tx: self,
            leaf: 0,
            idx: 0,
            valid: false,
        }
    }
}

fn lookup(d: &[u8], root: u64, key: &[u8]) -> Result<Option<Vec<u8>>> {
    let leaf = descend_to_leaf(d, root, key)?;
    let (cells, _) = parse_leaf(d, leaf)?;
    for c in &cells {
        if c.key.as_slice() == key {
            return Ok(Some(read_value(d, c)?));
        }
    }
    Ok(None)
}

/// Exclusive write transaction. Mutations become visible to new readers as
/// soon as the transaction drops.
pub struct WriteTx<'m> {
    guard: RwLockWriteGuard<'m, MapInner>,
    dup: bool,
}

impl<'m> WriteTx<'m> {
    /// Read-your-writes lookup inside the write transaction.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        lookup(self.guard.data(), self.guard.root(), key)
    }

    /// Insert or overwrite. `no_dup_data` only matters for duplicate maps,
    /// where it rejects an exact `(key, value)` pair that already exists.
    pub fn put(&mut self, key: &[u8], val: &[u8], no_dup_data: bool) -> Result<PutOutcome> {
        if key.is_empty() || key.len() > KEY_MAX {
            return Err(Error::precondition(format!(
                "key length {} out of range 1..={}",
                key.len(),
                KEY_MAX
            )));
        }
        // room for this value's overflow chain plus splits down the path
        let val_pages = (val.len() / OVF_CAP + 2) as u64;
        self.guard.ensure_capacity(WRITE_RESERVE + val_pages)?;

        let root = self.guard.root();
        let dup = self.dup;
        let (outcome, split) = self.guard.insert_at(root, key, val, no_dup_data, dup)?;
        if let Some((sep, right)) = split {
            let new_root = self.guard.alloc_page()?;
            let image = build_branch(root, &[BranchCell { key: sep, child: right }])
                .ok_or_else(|| Error::corruption("root separator exceeds page capacity"))?;
            self.guard.write_page(new_root, &image);
            self.guard.set_root(new_root);
        }
        Ok(outcome)
    }

    pub fn commit(self) -> Result<()> {
        // mapped writes are already visible; durability comes from flush()
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Cursor
// -----------------------------------------------------------------------------

/// Ordered cursor over a read transaction.
pub struct Cursor<'t, 'm> {
    tx: &'t ReadTx<'m>,
    leaf: u64,
    idx: usize,
    valid: bool,
}

impl<'t, 'm> Cursor<'t, 'm> {
    fn cells(&self) -> Result<(Vec<LeafCell>, u64)> {
        parse_leaf(self.tx.data(), self.leaf)
    }

    /// Position on the first entry. Returns false for an empty map.
    pub fn first(&mut self) -> Result<bool> {
        let d = self.tx.data();
        self.leaf = descend_leftmost(d, self.tx.guard.root())?;
        self.idx = 0;
        self.valid = self.skip_empty_leaves()?;
        Ok(self.valid)
    }

    /// Position on the first entry with exactly this key.
    pub fn set_key(&mut self, key: &[u8]) -> Result<bool> {
        if !self.set_range(key)? {
            return Ok(false);
        }
        let (cells, _) = self.cells()?;
        self.valid = cells[self.idx].key.as_slice() == key;
        Ok(self.valid)
    }

    /// Position on the first entry with key `>=` the given key.
    pub fn set_range(&mut self, key: &[u8]) -> Result<bool> {
        let d = self.tx.data();
        self.leaf = descend_to_leaf(d, self.tx.guard.root(), key)?;
        loop {
            let (cells, next) = self.cells()?;
            if let Some(i) = cells.iter().position(|c| c.key.as_slice() >= key) {
                self.idx = i;
                self.valid = true;
                return Ok(true);
            }
            if next == 0 {
                self.valid = false;
                return Ok(false);
            }
            self.leaf = next;
        }
    }

    /// Position on an exact `(key, value)` pair (duplicate maps).
    pub fn set_key_dup(&mut self, key: &[u8], val: &[u8]) -> Result<bool> {
        if !self.set_key(key)? {
            return Ok(false);
        }
        loop {
            let (k, v) = match self.get_current()? {
                Some(pair) => pair,
                None => return Ok(false),
            };
            if k.as_slice() != key {
                self.valid = false;
                return Ok(false);
            }
            if v.as_slice() == val {
                return Ok(true);
            }
            if !self.next()? {
                return Ok(false);
            }
        }
    }

    /// Advance to the next entry in key order.
    pub fn next(&mut self) -> Result<bool> {
        if !self.valid {
            return Ok(false);
        }
        self.idx += 1;
        self.valid = self.skip_empty_leaves()?;
        Ok(self.valid)
    }

    /// Advance only if the next entry shares the current key.
    pub fn next_dup(&mut self) -> Result<bool> {
        let Some((key, _)) = self.get_current()? else {
            return Ok(false);
        };
        let save = (self.leaf, self.idx, self.valid);
        if !self.next()? {
            return Ok(false);
        }
        if let Some((k, _)) = self.get_current()? {
            if k == key {
                return Ok(true);
            }
        }
        (self.leaf, self.idx, self.valid) = save;
        Ok(false)
    }

    /// The entry under the cursor, if positioned.
    pub fn get_current(&self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        if !self.valid {
            return Ok(None);
        }
        let (cells, _) = self.cells()?;
        let c = &cells[self.idx];
        Ok(Some((c.key.clone(), read_value(self.tx.data(), c)?)))
    }

    fn skip_empty_leaves(&mut self) -> Result<bool> {
        loop {
            let (cells, next) = self.cells()?;
            if self.idx < cells.len() {
                return Ok(true);
            }
            if next == 0 {
                return Ok(false);
            }
            self.leaf = next;
            self.idx = 0;
        }
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn new_map(dup: bool) -> (tempfile::TempDir, MappedMap) {
        let dir = tempdir().unwrap();
        let map = MappedMap::create(&dir.path().join("store"), dup).unwrap();
        (dir, map)
    }

    #[test]
    fn test_put_get() {
        let (_d, map) = new_map(false);
        {
            let mut tx = map.write_tx().unwrap();
            assert_eq!(tx.put(b"alpha", b"1", false).unwrap(), PutOutcome::Inserted);
            assert_eq!(tx.put(b"beta", b"2", false).unwrap(), PutOutcome::Inserted);
            tx.commit().unwrap();
        }
        let tx = map.read_tx();
        assert_eq!(tx.get(b"alpha").unwrap().unwrap(), b"1");
        assert_eq!(tx.get(b"beta").unwrap().unwrap(), b"2");
        assert!(tx.get(b"gamma").unwrap().is_none());
        assert_eq!(map.size(), 2);
    }

    #[test]
    fn test_overwrite_single_value() {
        let (_d, map) = new_map(false);
        let mut tx = map.write_tx().unwrap();
        tx.put(b"k", b"old", false).unwrap();
        assert_eq!(tx.put(b"k", b"new", false).unwrap(), PutOutcome::Overwrote);
        assert_eq!(tx.get(b"k").unwrap().unwrap(), b"new");
        drop(tx);
        assert_eq!(map.size(), 1);
    }

    #[test]
    fn test_ordered_iteration_across_splits() {
        let (_d, map) = new_map(false);
        let n = 3000u32;
        {
            let mut tx = map.write_tx().unwrap();
            // insert in a scrambled order
            for i in 0..n {
                let k = format!("{:08}", i.wrapping_mul(2654435761) % n);
                tx.put(k.as_bytes(), &i.to_le_bytes(), false).unwrap();
            }
        }
        let tx = map.read_tx();
        let mut cur = tx.cursor();
        assert!(cur.first().unwrap());
        let mut prev: Option<Vec<u8>> = None;
        let mut count = 0;
        loop {
            let (k, _) = cur.get_current().unwrap().unwrap();
            if let Some(p) = &prev {
                assert!(k > *p, "keys out of order");
            }
            prev = Some(k);
            count += 1;
            if !cur.next().unwrap() {
                break;
            }
        }
        assert_eq!(count, map.size());
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = tempdir().unwrap();
        let store = dir.path().join("store");
        {
            let map = MappedMap::create(&store, false).unwrap();
            let mut tx = map.write_tx().unwrap();
            for i in 0..500u32 {
                tx.put(format!("key{:05}", i).as_bytes(), &i.to_le_bytes(), false)
                    .unwrap();
            }
            drop(tx);
            map.flush().unwrap();
        }
        let map = MappedMap::open(&store, MapMode::ReadOnly).unwrap();
        assert_eq!(map.size(), 500);
        let tx = map.read_tx();
        assert_eq!(
            tx.get(b"key00123").unwrap().unwrap(),
            123u32.to_le_bytes().to_vec()
        );
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let dir = tempdir().unwrap();
        let store = dir.path().join("store");
        MappedMap::create(&store, false).unwrap();
        let map = MappedMap::open(&store, MapMode::ReadOnly).unwrap();
        assert!(map.write_tx().is_err());
    }

    #[test]
    fn test_overflow_values() {
        let (_d, map) = new_map(false);
        let big = vec![0xabu8; 3 * PAGE_SIZE];
        {
            let mut tx = map.write_tx().unwrap();
            tx.put(b"big", &big, false).unwrap();
            tx.put(b"small", b"x", false).unwrap();
        }
        let tx = map.read_tx();
        assert_eq!(tx.get(b"big").unwrap().unwrap(), big);
        // overwrite with a different large value
        drop(tx);
        let big2 = vec![0xcdu8; 2 * PAGE_SIZE + 17];
        {
            let mut tx = map.write_tx().unwrap();
            tx.put(b"big", &big2, false).unwrap();
        }
        assert_eq!(map.read_tx().get(b"big").unwrap().unwrap(), big2);
    }

    #[test]
    fn test_duplicate_map_cursor() {
        let (_d, map) = new_map(true);
        {
            let mut tx = map.write_tx().unwrap();
            tx.put(b"k", b"v2", true).unwrap();
            tx.put(b"k", b"v1", true).unwrap();
            tx.put(b"k", b"v3", true).unwrap();
            tx.put(b"other", b"x", true).unwrap();
            // exact pair rejected
            assert_eq!(
                tx.put(b"k", b"v2", true).unwrap(),
                PutOutcome::RejectedDuplicate
            );
        }
        assert_eq!(map.size(), 4);

        let tx = map.read_tx();
        let mut cur = tx.cursor();
        assert!(cur.set_key(b"k").unwrap());
        let mut vals = Vec::new();
        loop {
            let (_, v) = cur.get_current().unwrap().unwrap();
            vals.push(v);
            if !cur.next_dup().unwrap() {
                break;
            }
        }
        assert_eq!(vals, vec![b"v1".to_vec(), b"v2".to_vec(), b"v3".to_vec()]);

        let mut cur = tx.cursor();
        assert!(cur.set_key_dup(b"k", b"v2").unwrap());
        let (_, v) = cur.get_current().unwrap().unwrap();
        assert_eq!(v, b"v2");
        assert!(!cur.set_key_dup(b"k", b"nope").unwrap());
    }

    #[test]
    fn test_set_range() {
        let (_d, map) = new_map(false);
        {
            let mut tx = map.write_tx().unwrap();
            tx.put(b"b", b"1", false).unwrap();
            tx.put(b"d", b"2", false).unwrap();
        }
        let tx = map.read_tx();
        let mut cur = tx.cursor();
        assert!(cur.set_range(b"c").unwrap());
        assert_eq!(cur.get_current().unwrap().unwrap().0, b"d");
        assert!(!cur.set_range(b"e").unwrap());
        assert!(!cur.set_key(b"c").unwrap());
    }

    #[test]
    fn test_grow_preserves_content() {
        let (_d, map) = new_map(false);
        // enough data to force several doublings past the initial 64 pages
        let val = vec![7u8; 512];
        {
            let mut tx = map.write_tx().unwrap();
            for i in 0..4000u32 {
                tx.put(format!("{:08x}", i).as_bytes(), &val, false).unwrap();
            }
        }
        assert_eq!(map.size(), 4000);
        let tx = map.read_tx();
        assert_eq!(tx.get(b"00000f9f").unwrap().unwrap(), val);
    }

    #[test]
    fn test_empty_map_cursor() {
        let (_d, map) = new_map(false);
        let tx = map.read_tx();
        let mut cur = tx.cursor();
        assert!(!cur.first().unwrap());
        assert!(cur.get_current().unwrap().is_none());
    }
}
