// SPDX-License-Identifier: AGPL-3.0-or-later
// BlockHashDB - Content-Addressed Block Hash Database
// Copyright (C) 2026 Sushanth Reddy Vanagala (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Per-operation change counters.
//!
//! Every mutating command accumulates one `Changes` record and reports it on
//! completion: human-readable to stdout, structured into the history log.
//! Soft data rejections are counted here instead of erroring, so a bulk
//! import can run to completion and still account for every line.

use std::fmt;

use crate::xml::XmlWriter;

/// Fixed schema of `u32` counters. Field declaration order is the rendering
/// order for both the text and structured forms.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changes {
    // insert side
    pub hashes_inserted: u32,
    pub hashes_not_inserted_mismatched_hash_size: u32,
    pub hashes_not_inserted_invalid_byte_alignment: u32,
    pub hashes_not_inserted_exceeds_max_duplicates: u32,
    pub hashes_not_inserted_duplicate_element: u32,
    pub hashes_not_inserted_unknown_source_id: u32,

    // remove side, kept for schema compatibility with older databases whose
    // histories carry these counters
    pub hashes_removed: u32,
    pub hashes_not_removed_no_hash: u32,
    pub hashes_not_removed_no_element: u32,
}

impl Changes {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert_fields(&self) -> [(&'static str, u32); 6] {
        [
            ("hashes_inserted", self.hashes_inserted),
            (
                "hashes_not_inserted_mismatched_hash_size",
                self.hashes_not_inserted_mismatched_hash_size,
            ),
            (
                "hashes_not_inserted_invalid_byte_alignment",
                self.hashes_not_inserted_invalid_byte_alignment,
            ),
            (
                "hashes_not_inserted_exceeds_max_duplicates",
                self.hashes_not_inserted_exceeds_max_duplicates,
            ),
            (
                "hashes_not_inserted_duplicate_element",
                self.hashes_not_inserted_duplicate_element,
            ),
            (
                "hashes_not_inserted_unknown_source_id",
                self.hashes_not_inserted_unknown_source_id,
            ),
        ]
    }

    fn remove_fields(&self) -> [(&'static str, u32); 3] {
        [
            ("hashes_removed", self.hashes_removed),
            ("hashes_not_removed_no_hash", self.hashes_not_removed_no_hash),
            (
                "hashes_not_removed_no_element",
                self.hashes_not_removed_no_element,
            ),
        ]
    }

    pub fn has_insert_action(&self) -> bool {
        self.insert_fields().iter().any(|(_, v)| *v != 0)
    }

    pub fn has_remove_action(&self) -> bool {
        self.remove_fields().iter().any(|(_, v)| *v != 0)
    }

    pub fn is_empty(&self) -> bool {
        !self.has_insert_action() && !self.has_remove_action()
    }

    /// Structured rendering: one element per nonzero counter.
    pub fn write_xml(&self, w: &mut XmlWriter) {
        w.push("hashdb_changes");
        for (name, value) in self.insert_fields().iter().chain(self.remove_fields().iter()) {
            if *value != 0 {
                w.element(name, value);
            }
        }
        w.pop();
    }
}

impl fmt::Display for Changes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return writeln!(f, "No hashdb changes.");
        }
        if self.has_insert_action() {
            writeln!(f, "hashdb changes (insert):")?;
            for (name, value) in self.insert_fields() {
                if value != 0 {
                    writeln!(f, "    {}={}", name, value)?;
                }
            }
        }
        if self.has_remove_action() {
            writeln!(f, "hashdb changes (remove):")?;
            for (name, value) in self.remove_fields() {
                if value != 0 {
                    writeln!(f, "    {}={}", name, value)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_render() {
        let c = Changes::new();
        assert!(c.is_empty());
        assert_eq!(c.to_string(), "No hashdb changes.\n");
    }

    #[test]
    fn test_zero_fields_suppressed() {
        let c = Changes {
            hashes_inserted: 3,
            hashes_not_inserted_duplicate_element: 1,
            ..Changes::new()
        };
        assert_eq!(
            c.to_string(),
            "hashdb changes (insert):\n    hashes_inserted=3\n    hashes_not_inserted_duplicate_element=1\n"
        );
    }

    #[test]
    fn test_remove_section() {
        let c = Changes {
            hashes_removed: 2,
            ..Changes::new()
        };
        assert_eq!(
            c.to_string(),
            "hashdb changes (remove):\n    hashes_removed=2\n"
        );
    }

    #[test]
    fn test_xml_skips_zeroes() {
        let c = Changes {
            hashes_inserted: 5,
            ..Changes::new()
        };
        let mut w = XmlWriter::new();
        c.write_xml(&mut w);
        let doc = w.finish();
        assert!(doc.contains("<hashes_inserted>5</hashes_inserted>"));
        assert!(!doc.contains("duplicate_element"));
    }
}
