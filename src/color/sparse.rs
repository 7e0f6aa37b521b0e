/*
 * SPDX-FileCopyrightText: 2025 Inria
 * SPDX-FileCopyrightText: 2025 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use crate::bits::{bits_needed, BitVec, IntVec, RankSelect};
use crate::emsort;
use crate::ser;
use crate::temp;
use anyhow::{ensure, Context, Result};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::PathBuf;

/// A sparse array of unsigned values: a mark bit vector with rank
/// support, plus the stored values packed in mark order.
///
/// This is the node-to-color-set-id map: values are stored only at core
/// nodes.
#[derive(Debug, Clone)]
pub struct SparseIntArray {
    marks: RankSelect,
    values: IntVec,
    max_value: u64,
}

impl SparseIntArray {
    /// The value at `idx`, or `None` if nothing is stored there.
    pub fn get(&self, idx: usize) -> Option<u64> {
        if !self.marks.get(idx) {
            return None;
        }
        Some(self.values.get(self.marks.rank1(idx)))
    }

    /// Whether a value is stored at `idx`.
    #[inline(always)]
    pub fn has(&self, idx: usize) -> bool {
        self.marks.get(idx)
    }

    /// The length of the (sparse) index space.
    pub fn len(&self) -> usize {
        self.marks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marks.len() == 0
    }

    /// The number of stored values.
    pub fn num_values(&self) -> usize {
        self.values.len()
    }

    pub fn max_value(&self) -> u64 {
        self.max_value
    }

    pub fn serialize<W: Write>(&self, w: &mut W) -> Result<()> {
        self.marks.serialize(w)?;
        self.values.serialize(w)?;
        ser::write_u64(w, self.max_value)
    }

    pub fn load<R: Read>(r: &mut R) -> Result<Self> {
        Ok(SparseIntArray {
            marks: RankSelect::load(r)?,
            values: IntVec::load(r)?,
            max_value: ser::read_u64(r)?,
        })
    }
}

/// Builder accepting (index, value) pairs in any order.
///
/// Pairs are spilled to a temporary file as big-endian records and sorted
/// externally on finish, so the builder itself needs memory only for the
/// mark bits. If several values are added at the same index, the smallest
/// one is kept (the callers of this crate only ever add equal values to
/// an index).
pub struct SparseIntArrayBuilder {
    marks: BitVec,
    out: BufWriter<std::fs::File>,
    path: PathBuf,
    max_value: u64,
}

impl SparseIntArrayBuilder {
    pub fn new(len: usize) -> Result<Self> {
        let path = temp::get().create_path("sparse-");
        let out = BufWriter::new(
            std::fs::File::create(&path)
                .with_context(|| format!("Could not create {}", path.display()))?,
        );
        Ok(SparseIntArrayBuilder {
            marks: BitVec::new(len),
            out,
            path,
            max_value: 0,
        })
    }

    pub fn add(&mut self, idx: usize, value: u64) -> Result<()> {
        self.marks.set(idx, true);
        ser::write_u64_be(&mut self.out, idx as u64)?;
        ser::write_u64_be(&mut self.out, value)?;
        self.max_value = self.max_value.max(value);
        Ok(())
    }

    pub fn finish(mut self, mem_bytes: usize, threads: usize) -> Result<SparseIntArray> {
        self.out.flush().context("Could not flush the pair spill")?;
        drop(self.out);

        let sorted = temp::get().create_path("sparse-sorted-");
        emsort::sort_fixed(&self.path, &sorted, 16, mem_bytes, threads, |a, b| a.cmp(b))?;
        temp::get().delete(&self.path);

        let mut values = Vec::with_capacity(self.marks.count_ones());
        let mut reader = BufReader::new(
            std::fs::File::open(&sorted)
                .with_context(|| format!("Could not open {}", sorted.display()))?,
        );
        let mut buf = [0u8; 16];
        let mut prev_idx = None;
        while emsort::read_exact_or_eof(&mut reader, &mut buf)? {
            let idx = ser::u64_from_be(&buf[0..]);
            // Pairs are sorted by (index, value): keeping the first value
            // per index keeps the smallest
            if prev_idx != Some(idx) {
                values.push(ser::u64_from_be(&buf[8..]));
            }
            prev_idx = Some(idx);
        }
        drop(reader);
        temp::get().delete(&sorted);

        ensure!(
            values.len() == self.marks.count_ones(),
            "BUG: {} marks but {} deduplicated values",
            self.marks.count_ones(),
            values.len()
        );

        Ok(SparseIntArray {
            marks: RankSelect::new(self.marks),
            values: IntVec::from_slice_with_width(&values, bits_needed(self.max_value)),
            max_value: self.max_value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;
    use std::collections::HashMap;

    #[test]
    fn test_build_and_get() -> Result<()> {
        let mut rng = SmallRng::seed_from_u64(3);
        let len = 10_000;
        let mut expected: HashMap<usize, u64> = HashMap::new();
        let mut builder = SparseIntArrayBuilder::new(len)?;
        for _ in 0..2000 {
            let idx = rng.random_range(0..len);
            let value = rng.random_range(0..5000u64);
            // Keep the smallest per index, as the builder does
            let e = expected.entry(idx).or_insert(u64::MAX);
            *e = (*e).min(value);
            builder.add(idx, value)?;
        }
        let arr = builder.finish(1 << 20, 2)?;
        assert_eq!(arr.len(), len);
        assert_eq!(arr.num_values(), expected.len());
        for idx in 0..len {
            assert_eq!(arr.get(idx), expected.get(&idx).copied(), "index {}", idx);
            assert_eq!(arr.has(idx), expected.contains_key(&idx));
        }
        Ok(())
    }

    #[test]
    fn test_serialization_roundtrip() -> Result<()> {
        let mut builder = SparseIntArrayBuilder::new(100)?;
        builder.add(3, 7)?;
        builder.add(99, 0)?;
        let arr = builder.finish(1 << 20, 1)?;
        let mut buf = Vec::new();
        arr.serialize(&mut buf)?;
        let loaded = SparseIntArray::load(&mut &buf[..])?;
        assert_eq!(loaded.get(3), Some(7));
        assert_eq!(loaded.get(99), Some(0));
        assert_eq!(loaded.get(4), None);
        Ok(())
    }
}
