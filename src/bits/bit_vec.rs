/*
 * SPDX-FileCopyrightText: 2025 Inria
 * SPDX-FileCopyrightText: 2025 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use crate::ser;
use anyhow::Result;
use std::io::{Read, Write};
use sux::prelude::*;

/// A plain fixed-length bit vector.
///
/// A thin wrapper around [`sux::bits::BitVec`] adding the word-level
/// helpers the color-set kernels need and this crate's explicit on-disk
/// format: a length prefix followed by the backing words.
#[derive(Debug, Clone)]
pub struct BitVec {
    bits: sux::bits::BitVec,
}

impl Default for BitVec {
    fn default() -> Self {
        Self::new(0)
    }
}

impl PartialEq for BitVec {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.words() == other.words()
    }
}

impl Eq for BitVec {}

impl BitVec {
    /// Creates a bit vector of `len` zero bits.
    pub fn new(len: usize) -> Self {
        BitVec {
            bits: sux::bits::BitVec::new(len),
        }
    }

    /// Appends a bit.
    pub fn push(&mut self, bit: bool) {
        self.bits.push(bit);
    }

    #[inline(always)]
    pub fn get(&self, i: usize) -> bool {
        self.bits.get(i)
    }

    #[inline(always)]
    pub fn set(&mut self, i: usize, bit: bool) {
        self.bits.set(i, bit);
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn words(&self) -> &[usize] {
        self.bits.as_ref()
    }

    pub(crate) fn into_inner(self) -> sux::bits::BitVec {
        self.bits
    }

    /// The number of ones in the whole vector.
    pub fn count_ones(&self) -> usize {
        self.words().iter().map(|w| w.count_ones() as usize).sum()
    }

    /// The number of ones in the bit range `[start, start + len)`.
    ///
    /// Linear in `len / 64`; used by color-set views, whose ranges are
    /// short.
    pub fn count_ones_in_range(&self, start: usize, len: usize) -> usize {
        let end = start + len;
        debug_assert!(end <= self.len());
        let mut count = 0;
        let mut i = start;
        while i < end {
            let take = (end - i).min(64);
            let mask = if take == 64 { !0u64 } else { (1u64 << take) - 1 };
            count += (self.get_word(i) & mask).count_ones() as usize;
            i += 64;
        }
        count
    }

    /// Overwrites the `min(64, len - start)` bits at the word-aligned
    /// position `start` with the low bits of `w`, flipping only the bits
    /// that differ.
    pub fn set_word(&mut self, start: usize, w: u64) {
        debug_assert!(start % 64 == 0 && start < self.len());
        let valid = (self.len() - start).min(64);
        let mask = if valid == 64 { !0 } else { (1u64 << valid) - 1 };
        let mut diff = (self.get_word(start) ^ w) & mask;
        while diff != 0 {
            let b = diff.trailing_zeros() as usize;
            self.set(start + b, (w >> b) & 1 != 0);
            diff &= diff - 1;
        }
    }

    /// The 64 bits starting at `start`, possibly unaligned; bits past the
    /// end of the vector read as zero.
    pub fn get_word(&self, start: usize) -> u64 {
        debug_assert!(start <= self.len());
        let words = self.words();
        let word = start / 64;
        let offset = start % 64;
        let mut w = (words.get(word).copied().unwrap_or(0) as u64) >> offset;
        if offset > 0 {
            w |= (words.get(word + 1).copied().unwrap_or(0) as u64) << (64 - offset);
        }
        if self.len() - start < 64 {
            w &= (1u64 << (self.len() - start)) - 1;
        }
        w
    }

    pub fn serialize<W: Write>(&self, w: &mut W) -> Result<()> {
        ser::write_u64(w, self.len() as u64)?;
        let words: Vec<u64> = self.words().iter().map(|&w| w as u64).collect();
        ser::write_u64_slice(w, &words)
    }

    pub fn load<R: Read>(r: &mut R) -> Result<Self> {
        let len = ser::read_u64(r)? as usize;
        let words = ser::read_u64_vec(r)?;
        anyhow::ensure!(
            words.len() == len.div_ceil(64),
            "Bit vector length {} does not match {} words",
            len,
            words.len()
        );
        let mut bits = Self::new(len);
        for (wi, &word) in words.iter().enumerate() {
            // Ignore padding bits of the last word
            let valid = (len - wi * 64).min(64);
            let mut w = if valid == 64 {
                word
            } else {
                word & ((1u64 << valid) - 1)
            };
            while w != 0 {
                let b = w.trailing_zeros() as usize;
                bits.set(wi * 64 + b, true);
                w &= w - 1;
            }
        }
        Ok(bits)
    }
}

/// A bit vector with constant-time rank and select.
///
/// The engine is a [`Rank9`] structure with a [`SelectAdaptConst`] and a
/// [`SelectZeroAdaptConst`] layered on top; the backing words stay
/// reachable through the stack, so the explicit serialization writes the
/// plain bits and the supports are rebuilt on load.
pub struct RankSelect {
    sel: SelectZeroAdaptConst<SelectAdaptConst<Rank9, Box<[usize]>, 12, 4>, Box<[usize]>, 12, 4>,
    len: usize,
    ones: usize,
}

impl std::fmt::Debug for RankSelect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RankSelect")
            .field("len", &self.len)
            .field("ones", &self.ones)
            .finish_non_exhaustive()
    }
}

impl Clone for RankSelect {
    fn clone(&self) -> Self {
        // Rebuilding the supports from the words; cloning only happens
        // on cold paths
        let mut bits = BitVec::new(self.len);
        for (wi, &word) in self.words().iter().enumerate() {
            let mut w = word;
            while w != 0 {
                let b = w.trailing_zeros() as usize;
                bits.set(wi * 64 + b, true);
                w &= w - 1;
            }
        }
        RankSelect::new(bits)
    }
}

impl RankSelect {
    pub fn new(bits: BitVec) -> Self {
        let len = bits.len();
        let ones = bits.count_ones();
        let sel = SelectZeroAdaptConst::<_, _, 12, 4>::new(SelectAdaptConst::<_, _, 12, 4>::new(
            Rank9::new(bits.into_inner()),
        ));
        RankSelect { sel, len, ones }
    }

    fn words(&self) -> &[usize] {
        self.sel.as_ref()
    }

    #[inline(always)]
    pub fn get(&self, i: usize) -> bool {
        debug_assert!(i < self.len);
        (self.words()[i / 64] >> (i % 64)) & 1 != 0
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The total number of ones.
    #[inline(always)]
    pub fn count_ones(&self) -> usize {
        self.ones
    }

    /// The number of ones in `[0, i)`; `i` may be `len`.
    #[inline]
    pub fn rank1(&self, i: usize) -> usize {
        debug_assert!(i <= self.len);
        if i == self.len {
            return self.ones;
        }
        self.sel.rank(i)
    }

    /// The number of zeros in `[0, i)`; `i` may be `len`.
    #[inline]
    pub fn rank0(&self, i: usize) -> usize {
        i - self.rank1(i)
    }

    /// The 0-based position of the `r`-th one, with `r` counted from 1.
    #[inline]
    pub fn select1(&self, r: usize) -> usize {
        debug_assert!(r >= 1 && r <= self.ones);
        self.sel.select(r - 1).unwrap()
    }

    /// The 0-based position of the `r`-th zero, with `r` counted from 1.
    #[inline]
    pub fn select0(&self, r: usize) -> usize {
        debug_assert!(r >= 1 && r <= self.len - self.ones);
        self.sel.select_zero(r - 1).unwrap()
    }

    pub fn serialize<W: Write>(&self, w: &mut W) -> Result<()> {
        ser::write_u64(w, self.len as u64)?;
        let words: Vec<u64> = self.words().iter().map(|&w| w as u64).collect();
        ser::write_u64_slice(w, &words)
    }

    pub fn load<R: Read>(r: &mut R) -> Result<Self> {
        Ok(RankSelect::new(BitVec::load(r)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;

    fn random_bits(n: usize, density: f64, seed: u64) -> BitVec {
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut bv = BitVec::new(n);
        for i in 0..n {
            bv.set(i, rng.random_bool(density));
        }
        bv
    }

    #[test]
    fn test_rank_select_against_naive() {
        for &(n, density, seed) in
            &[(1, 0.5, 0), (64, 0.5, 1), (513, 0.1, 2), (5000, 0.9, 3), (10_000, 0.5, 4)]
        {
            let bv = random_bits(n, density, seed);
            let naive: Vec<bool> = (0..n).map(|i| bv.get(i)).collect();
            let rs = RankSelect::new(bv);

            let mut ones = 0;
            let mut zeros = 0;
            for i in 0..=n {
                assert_eq!(rs.rank1(i), ones, "rank1({}) for n={}", i, n);
                assert_eq!(rs.rank0(i), zeros, "rank0({}) for n={}", i, n);
                if i < n {
                    if naive[i] {
                        ones += 1;
                        assert_eq!(rs.select1(ones), i);
                    } else {
                        zeros += 1;
                        assert_eq!(rs.select0(zeros), i);
                    }
                }
            }
            assert_eq!(rs.count_ones(), ones);
        }
    }

    #[test]
    fn test_count_ones_in_range() {
        let bv = random_bits(1000, 0.3, 7);
        for &(start, len) in &[(0, 0), (0, 1000), (3, 100), (64, 64), (130, 1), (999, 1)] {
            let expected = (start..start + len).filter(|&i| bv.get(i)).count();
            assert_eq!(bv.count_ones_in_range(start, len), expected);
        }
    }

    #[test]
    fn test_get_set_word() {
        let mut bv = random_bits(200, 0.5, 11);
        bv.set_word(64, 0xDEAD_BEEF_0123_4567);
        assert_eq!(bv.get_word(64), 0xDEAD_BEEF_0123_4567);
        // Unaligned read straddling the rewritten word
        for i in 0..200 {
            let expected = (0..64)
                .filter(|b| i + b < 200)
                .map(|b| (bv.get(i + b) as u64) << b)
                .sum::<u64>();
            assert_eq!(bv.get_word(i), expected, "get_word({})", i);
        }
        // Writing the tail word only touches the in-range bits
        bv.set_word(192, !0);
        assert_eq!(bv.get_word(192), 0xFF);
    }

    #[test]
    fn test_push_matches_set() {
        let mut a = BitVec::new(0);
        let mut pattern = Vec::new();
        for i in 0..200 {
            let bit = i % 3 == 0;
            a.push(bit);
            pattern.push(bit);
        }
        for (i, &bit) in pattern.iter().enumerate() {
            assert_eq!(a.get(i), bit);
        }
    }

    #[test]
    fn test_serialization_roundtrip() -> Result<()> {
        let bv = random_bits(777, 0.5, 9);
        let mut buf = Vec::new();
        bv.serialize(&mut buf)?;
        let loaded = BitVec::load(&mut &buf[..])?;
        assert_eq!(bv, loaded);
        let mut buf2 = Vec::new();
        loaded.serialize(&mut buf2)?;
        assert_eq!(buf, buf2);
        Ok(())
    }
}
