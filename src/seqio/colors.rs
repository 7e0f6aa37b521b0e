/*
 * SPDX-FileCopyrightText: 2025 Inria
 * SPDX-FileCopyrightText: 2025 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use anyhow::{Context, Result};
use std::io::BufRead;
use std::path::Path;

/// A malformed line in a colors file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorFileError {
    /// 1-based line number.
    pub line: usize,
    pub content: String,
}

impl std::fmt::Display for ColorFileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Line {} of the colors file is not a non-negative integer: {:?}",
            self.line, self.content
        )
    }
}

impl std::error::Error for ColorFileError {}

/// Parses a colors file: one non-negative integer per line, in the order
/// of the input sequences. Surrounding whitespace is ignored; anything
/// else is an error naming the offending line.
pub fn parse_color_file(path: &Path) -> Result<Vec<u64>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Could not open colors file {}", path.display()))?;
    let mut colors = Vec::new();
    for (i, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Could not read colors file {}", path.display()))?;
        let trimmed = line.trim();
        let color = trimmed.parse::<u64>().map_err(|_| ColorFileError {
            line: i + 1,
            content: trimmed.to_owned(),
        })?;
        colors.push(color);
    }
    Ok(colors)
}
