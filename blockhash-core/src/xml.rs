// SPDX-License-Identifier: AGPL-3.0-or-later
// BlockHashDB - Content-Addressed Block Hash Database
// Copyright (C) 2026 Sushanth Reddy Vanagala (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Minimal tagged-document helpers.
//!
//! The settings document, the change record, and the history log are all
//! fixed tag sets written and read by this module. It is deliberately not a
//! general XML implementation: tags are known ahead of time, attributes are
//! not used, and only `&`, `<`, `>` need escaping.

use std::fmt::Display;

use crate::error::{Error, Result};

/// Nested tagged-document writer with an element stack, in the push /
/// element / pop style of forensic XML loggers.
pub struct XmlWriter {
    buf: String,
    stack: Vec<&'static str>,
}

impl XmlWriter {
    pub fn new() -> Self {
        Self {
            buf: String::new(),
            stack: Vec::new(),
        }
    }

    fn indent(&mut self) {
        for _ in 0..self.stack.len() {
            self.buf.push_str("  ");
        }
    }

    /// Open a nested element.
    pub fn push(&mut self, tag: &'static str) {
        self.indent();
        self.buf.push('<');
        self.buf.push_str(tag);
        self.buf.push_str(">\n");
        self.stack.push(tag);
    }

    /// Close the most recently opened element.
    pub fn pop(&mut self) {
        let tag = self.stack.pop().expect("pop without matching push");
        self.indent();
        self.buf.push_str("</");
        self.buf.push_str(tag);
        self.buf.push_str(">\n");
    }

    /// Write a leaf element with a text value.
    pub fn element(&mut self, tag: &str, value: impl Display) {
        self.indent();
        self.buf.push('<');
        self.buf.push_str(tag);
        self.buf.push('>');
        self.buf.push_str(&escape(&value.to_string()));
        self.buf.push_str("</");
        self.buf.push_str(tag);
        self.buf.push_str(">\n");
    }

    /// Splice a pre-rendered fragment in at the current depth, reindenting
    /// each line. Used to embed input histories and settings bodies.
    pub fn fragment(&mut self, text: &str) {
        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            self.indent();
            self.buf.push_str(line);
            self.buf.push('\n');
        }
    }

    pub fn finish(mut self) -> String {
        while !self.stack.is_empty() {
            self.pop();
        }
        self.buf
    }
}

impl Default for XmlWriter {
    fn default() -> Self {
        Self::new()
    }
}

pub fn escape(s: &str) -> String {
    if !s.contains(&['&', '<', '>'][..]) {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len() + 8);
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn unescape(s: &str) -> String {
    s.replace("&lt;", "<").replace("&gt;", ">").replace("&amp;", "&")
}

/// Return the text between the first `<tag>` and its `</tag>`, unescaped.
pub fn find_tag(doc: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = doc.find(&open)? + open.len();
    let end = doc[start..].find(&close)? + start;
    Some(unescape(doc[start..end].trim()))
}

/// Like [`find_tag`] but required: missing tags are a document error.
pub fn require_tag(doc: &str, tag: &str) -> Result<String> {
    find_tag(doc, tag).ok_or_else(|| Error::Document(format!("missing <{}> element", tag)))
}

/// Required tag parsed as an integer.
pub fn require_u64(doc: &str, tag: &str) -> Result<u64> {
    let text = require_tag(doc, tag)?;
    text.parse::<u64>()
        .map_err(|_| Error::Document(format!("<{}> value '{}' is not a number", tag, text)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writer_nesting() {
        let mut w = XmlWriter::new();
        w.push("settings");
        w.element("block_size", 4096u32);
        w.push("bloom");
        w.element("k", 2u32);
        w.pop();
        w.pop();
        let doc = w.finish();
        assert_eq!(
            doc,
            "<settings>\n  <block_size>4096</block_size>\n  <bloom>\n    <k>2</k>\n  </bloom>\n</settings>\n"
        );
    }

    #[test]
    fn test_escape_roundtrip() {
        let raw = "a<b>&c";
        assert_eq!(unescape(&escape(raw)), raw);
    }

    #[test]
    fn test_find_tag() {
        let doc = "<a>\n  <b>hello &amp; bye</b>\n</a>\n";
        assert_eq!(find_tag(doc, "b").unwrap(), "hello & bye");
        assert!(find_tag(doc, "c").is_none());
    }

    #[test]
    fn test_require_u64() {
        let doc = "<n>42</n>";
        assert_eq!(require_u64(doc, "n").unwrap(), 42);
        assert!(require_u64(doc, "m").is_err());
        assert!(require_u64("<n>x</n>", "n").is_err());
    }

    #[test]
    fn test_fragment_reindents() {
        let mut w = XmlWriter::new();
        w.push("outer");
        w.fragment("<x>1</x>\n<y>2</y>\n");
        w.pop();
        assert_eq!(w.finish(), "<outer>\n  <x>1</x>\n  <y>2</y>\n</outer>\n");
    }
}
