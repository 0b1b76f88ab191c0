// SPDX-License-Identifier: AGPL-3.0-or-later
// BlockHashDB - Content-Addressed Block Hash Database
// Copyright (C) 2026 Sushanth Reddy Vanagala (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Item-counting progress reporting for long-running commands.

const REPORT_EVERY: u64 = 100_000;

pub struct ProgressTracker {
    label: &'static str,
    count: u64,
}

impl ProgressTracker {
    pub fn new(label: &'static str) -> Self {
        Self { label, count: 0 }
    }

    pub fn track(&mut self) {
        self.count += 1;
        if self.count % REPORT_EVERY == 0 {
            tracing::info!(processed = self.count, "{}", self.label);
        }
    }

    pub fn done(self) {
        tracing::info!(processed = self.count, "{} done", self.label);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_items() {
        let mut p = ProgressTracker::new("import");
        for _ in 0..5 {
            p.track();
        }
        assert_eq!(p.count, 5);
        p.done();
    }
}
