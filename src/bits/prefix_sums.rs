/*
 * SPDX-FileCopyrightText: 2025 Inria
 * SPDX-FileCopyrightText: 2025 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use crate::bits::{BitVec, RankSelect};
use anyhow::Result;
use std::io::{Read, Write};

/// A sequence of `n` non-negative integers with total sum `N`, stored in
/// `n + N + o(n + N)` bits with constant-time prefix sums.
///
/// Each value `x` is encoded as a one followed by `x` zeros; a final one
/// terminates the sequence. `sum(i)` is then the number of zeros before
/// the `(i + 1)`-th one.
///
/// The typical use is storing the lengths of variable-length records
/// concatenated in a pool: `sum(i)` is the start of record `i` and
/// `sum(i + 1)` is one past its end.
#[derive(Debug, Clone)]
pub struct PrefixSums {
    bits: RankSelect,
}

/// Append-only builder for [`PrefixSums`].
#[derive(Debug, Clone, Default)]
pub struct PrefixSumsBuilder {
    bits: BitVec,
}

impl PrefixSumsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a value.
    pub fn push(&mut self, x: u64) {
        self.bits.push(true);
        for _ in 0..x {
            self.bits.push(false);
        }
    }

    pub fn finish(mut self) -> PrefixSums {
        self.bits.push(true); // End sentinel
        PrefixSums {
            bits: RankSelect::new(self.bits),
        }
    }
}

impl PrefixSums {
    /// The number of stored values.
    pub fn len(&self) -> usize {
        self.bits.count_ones() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The sum of the first `i` values; `i` ranges from 0 to `len`
    /// inclusive.
    #[inline]
    pub fn sum(&self, i: usize) -> u64 {
        self.bits.rank0(self.bits.select1(i + 1)) as u64
    }

    /// The `i`-th stored value.
    #[inline]
    pub fn get(&self, i: usize) -> u64 {
        self.sum(i + 1) - self.sum(i)
    }

    pub fn serialize<W: Write>(&self, w: &mut W) -> Result<()> {
        self.bits.serialize(w)
    }

    pub fn load<R: Read>(r: &mut R) -> Result<Self> {
        Ok(PrefixSums {
            bits: RankSelect::load(r)?,
        })
    }
}
