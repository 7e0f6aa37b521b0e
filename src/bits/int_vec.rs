/*
 * SPDX-FileCopyrightText: 2025 Inria
 * SPDX-FileCopyrightText: 2025 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use crate::bits::bits_needed;
use crate::ser;
use anyhow::Result;
use std::io::{Read, Write};
use sux::bits::BitFieldVec;
use sux::traits::bit_field_slice::{BitFieldSlice, BitFieldSliceCore, BitFieldSliceMut};

/// A packed array of `len` integers of `width` bits each, `1 ≤ width ≤ 64`.
///
/// A thin wrapper around [`BitFieldVec`] adding this crate's explicit
/// on-disk format: length and width prefixes, then the values packed
/// least-significant-bit first into `u64` words.
#[derive(Debug, Clone)]
pub struct IntVec {
    vals: BitFieldVec<u64>,
}

impl PartialEq for IntVec {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self.width() == other.width()
            && self.iter().eq(other.iter())
    }
}

impl Eq for IntVec {}

impl IntVec {
    /// Creates a packed array of `len` zeros of `width` bits each.
    pub fn new(len: usize, width: usize) -> Self {
        assert!((1..=64).contains(&width), "Invalid width {}", width);
        let mut vals = <BitFieldVec<u64, _>>::with_capacity(width, len);
        vals.extend(std::iter::repeat(0u64).take(len));
        IntVec { vals }
    }

    /// Packs a slice, choosing the smallest width that fits the maximum.
    pub fn from_slice(values: &[u64]) -> Self {
        let width = bits_needed(values.iter().copied().max().unwrap_or(0));
        Self::from_slice_with_width(values, width)
    }

    pub fn from_slice_with_width(values: &[u64], width: usize) -> Self {
        assert!((1..=64).contains(&width), "Invalid width {}", width);
        let mut vals = <BitFieldVec<u64, _>>::with_capacity(width, values.len());
        vals.extend(values.iter().copied());
        IntVec { vals }
    }

    #[inline(always)]
    fn mask(&self) -> u64 {
        if self.width() == 64 {
            !0
        } else {
            (1u64 << self.width()) - 1
        }
    }

    #[inline(always)]
    pub fn get(&self, i: usize) -> u64 {
        self.vals.get(i)
    }

    #[inline(always)]
    pub fn set(&mut self, i: usize, v: u64) {
        debug_assert!(v <= self.mask());
        self.vals.set(i, v);
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.vals.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline(always)]
    pub fn width(&self) -> usize {
        self.vals.bit_width()
    }

    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.len()).map(move |i| self.get(i))
    }

    pub fn serialize<W: Write>(&self, w: &mut W) -> Result<()> {
        let (len, width) = (self.len(), self.width());
        ser::write_u64(w, len as u64)?;
        ser::write_u64(w, width as u64)?;
        // Re-pack into the on-disk word layout explicitly, so the format
        // is independent of the in-memory representation
        let mut words = vec![0u64; (len * width).div_ceil(64)];
        for (i, v) in self.iter().enumerate() {
            pack(&mut words, width, i, v);
        }
        ser::write_u64_slice(w, &words)
    }

    pub fn load<R: Read>(r: &mut R) -> Result<Self> {
        let len = ser::read_u64(r)? as usize;
        let width = ser::read_u64(r)? as usize;
        anyhow::ensure!((1..=64).contains(&width), "Invalid width {}", width);
        let words = ser::read_u64_vec(r)?;
        anyhow::ensure!(
            words.len() == (len * width).div_ceil(64),
            "Packed array length {}x{} does not match {} words",
            len,
            width,
            words.len()
        );
        let mut vals = <BitFieldVec<u64, _>>::with_capacity(width, len);
        vals.extend((0..len).map(|i| unpack(&words, width, i)));
        Ok(IntVec { vals })
    }
}

/// Writes the `width`-bit value `v` at index `i` of the word layout.
fn pack(words: &mut [u64], width: usize, i: usize, v: u64) {
    let bit = i * width;
    let word = bit / 64;
    let offset = bit % 64;
    words[word] |= v << offset;
    if offset + width > 64 {
        words[word + 1] |= v >> (64 - offset);
    }
}

/// Reads the `width`-bit value at index `i` of the word layout.
fn unpack(words: &[u64], width: usize, i: usize) -> u64 {
    let mask = if width == 64 { !0 } else { (1u64 << width) - 1 };
    let bit = i * width;
    let word = bit / 64;
    let offset = bit % 64;
    let mut v = words[word] >> offset;
    if offset + width > 64 {
        v |= words[word + 1] << (64 - offset);
    }
    v & mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;

    #[test]
    fn test_get_set_all_widths() {
        let mut rng = SmallRng::seed_from_u64(0);
        for width in 1..=64usize {
            let max = if width == 64 { u64::MAX } else { (1 << width) - 1 };
            let values: Vec<u64> = (0..200).map(|_| rng.random_range(0..=max)).collect();
            let iv = IntVec::from_slice_with_width(&values, width);
            for (i, &v) in values.iter().enumerate() {
                assert_eq!(iv.get(i), v, "width {}", width);
            }
        }
    }

    #[test]
    fn test_from_slice_width() {
        let iv = IntVec::from_slice(&[0, 5, 3]);
        assert_eq!(iv.width(), 3);
        assert_eq!(iv.iter().collect::<Vec<_>>(), vec![0, 5, 3]);
        // All zeros still get one bit each
        assert_eq!(IntVec::from_slice(&[0, 0]).width(), 1);
    }

    #[test]
    fn test_overwrite() {
        let mut iv = IntVec::new(100, 7);
        for i in 0..100 {
            iv.set(i, (i as u64 * 3) % 128);
        }
        for i in 0..100 {
            iv.set(i, (i as u64 * 5) % 128);
        }
        for i in 0..100 {
            assert_eq!(iv.get(i), (i as u64 * 5) % 128);
        }
    }

    #[test]
    fn test_serialization_roundtrip() -> Result<()> {
        for width in [1, 3, 17, 33, 64] {
            let mut rng = SmallRng::seed_from_u64(width as u64);
            let max = if width == 64 { u64::MAX } else { (1 << width) - 1 };
            let values: Vec<u64> = (0..123).map(|_| rng.random_range(0..=max)).collect();
            let iv = IntVec::from_slice_with_width(&values, width);
            let mut buf = Vec::new();
            iv.serialize(&mut buf)?;
            let loaded = IntVec::load(&mut &buf[..])?;
            assert_eq!(iv, loaded);
            let mut buf2 = Vec::new();
            loaded.serialize(&mut buf2)?;
            assert_eq!(buf, buf2);
        }
        Ok(())
    }
}
