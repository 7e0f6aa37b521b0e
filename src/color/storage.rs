/*
 * SPDX-FileCopyrightText: 2025 Inria
 * SPDX-FileCopyrightText: 2025 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use super::{use_bitmap, ColorSetRef};
use crate::bits::{BitVec, IntVec, PrefixSums, PrefixSumsBuilder, RankSelect};
use anyhow::Result;
use std::io::{Read, Write};

/// The static store of all distinct color sets.
///
/// Sets are kept in two pooled concatenations: all bitmap-encoded sets in
/// one bit vector, all array-encoded sets in one packed integer array. A
/// per-id discriminator with rank support tells the pools apart, and the
/// per-pool set lengths are unary-coded prefix sums, so the view of set
/// `i` is assembled with a constant number of succinct queries.
#[derive(Debug, Clone)]
pub struct ColorSetStorage {
    bitmap_pool: BitVec,
    bitmap_lens: PrefixSums,
    array_pool: IntVec,
    array_lens: PrefixSums,
    is_bitmap: RankSelect,
}

impl ColorSetStorage {
    /// The view of the color set with the given id.
    pub fn get(&self, id: usize) -> ColorSetRef<'_> {
        debug_assert!(id < self.num_sets());
        if self.is_bitmap.get(id) {
            let j = self.is_bitmap.rank1(id);
            let start = self.bitmap_lens.sum(j) as usize;
            let end = self.bitmap_lens.sum(j + 1) as usize;
            ColorSetRef::Bitmap {
                bits: &self.bitmap_pool,
                start,
                len: end - start,
            }
        } else {
            let j = id - self.is_bitmap.rank1(id);
            let start = self.array_lens.sum(j) as usize;
            let end = self.array_lens.sum(j + 1) as usize;
            ColorSetRef::Array {
                vals: &self.array_pool,
                start,
                len: end - start,
            }
        }
    }

    pub fn num_sets(&self) -> usize {
        self.is_bitmap.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = ColorSetRef<'_>> {
        (0..self.num_sets()).map(move |i| self.get(i))
    }

    pub fn serialize<W: Write>(&self, w: &mut W) -> Result<()> {
        self.bitmap_pool.serialize(w)?;
        self.bitmap_lens.serialize(w)?;
        self.array_pool.serialize(w)?;
        self.array_lens.serialize(w)?;
        self.is_bitmap.serialize(w)
    }

    pub fn load<R: Read>(r: &mut R) -> Result<Self> {
        Ok(ColorSetStorage {
            bitmap_pool: BitVec::load(r)?,
            bitmap_lens: PrefixSums::load(r)?,
            array_pool: IntVec::load(r)?,
            array_lens: PrefixSums::load(r)?,
            is_bitmap: RankSelect::load(r)?,
        })
    }

    /// The serialized size in bytes of each component, for diagnostics.
    pub fn space_breakdown(&self) -> Result<Vec<(&'static str, u64)>> {
        let size = |f: &dyn Fn(&mut Vec<u8>) -> Result<()>| -> Result<u64> {
            let mut buf = Vec::new();
            f(&mut buf)?;
            Ok(buf.len() as u64)
        };
        Ok(vec![
            ("bitmap-pool", size(&|b| self.bitmap_pool.serialize(b))?),
            ("bitmap-lens", size(&|b| self.bitmap_lens.serialize(b))?),
            ("array-pool", size(&|b| self.array_pool.serialize(b))?),
            ("array-lens", size(&|b| self.array_lens.serialize(b))?),
            ("is-bitmap", size(&|b| self.is_bitmap.serialize(b))?),
        ])
    }
}

/// Append-only builder for [`ColorSetStorage`]; ids are assigned in
/// insertion order.
#[derive(Debug, Default)]
pub struct ColorSetStorageBuilder {
    bitmap_pool: BitVec,
    bitmap_lens: Vec<u64>,
    array_pool: Vec<u64>,
    array_lens: Vec<u64>,
    is_bitmap: BitVec,
}

impl ColorSetStorageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a set of sorted distinct colors, choosing its pool by the
    /// density rule.
    pub fn add_set(&mut self, colors: &[u64]) {
        debug_assert!(colors.windows(2).all(|w| w[0] < w[1]));
        if use_bitmap(colors) {
            self.is_bitmap.push(true);
            let max = *colors.last().unwrap();
            let start = self.bitmap_pool.len();
            self.bitmap_lens.push(max + 1);
            for _ in 0..=max {
                self.bitmap_pool.push(false);
            }
            for &c in colors {
                self.bitmap_pool.set(start + c as usize, true);
            }
        } else {
            self.is_bitmap.push(false);
            self.array_lens.push(colors.len() as u64);
            self.array_pool.extend_from_slice(colors);
        }
    }

    /// The number of sets added so far (the id of the next set).
    pub fn num_sets(&self) -> usize {
        self.is_bitmap.len()
    }

    /// Freezes the pools and installs the query support.
    pub fn finish(self) -> ColorSetStorage {
        let mut bitmap_lens = PrefixSumsBuilder::new();
        for &l in &self.bitmap_lens {
            bitmap_lens.push(l);
        }
        let mut array_lens = PrefixSumsBuilder::new();
        for &l in &self.array_lens {
            array_lens.push(l);
        }
        ColorSetStorage {
            bitmap_pool: self.bitmap_pool,
            bitmap_lens: bitmap_lens.finish(),
            array_pool: IntVec::from_slice(&self.array_pool),
            array_lens: array_lens.finish(),
            is_bitmap: RankSelect::new(self.is_bitmap),
        }
    }
}
