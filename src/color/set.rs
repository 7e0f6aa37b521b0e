/*
 * SPDX-FileCopyrightText: 2025 Inria
 * SPDX-FileCopyrightText: 2025 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Hybrid color sets.
//!
//! A color set is stored either as a bitmap (one bit per color up to the
//! largest member) or as a sorted packed integer array, whichever is
//! smaller for its density. [`ColorSet`] owns its storage and is used
//! for intermediate results during queries; [`ColorSetRef`] is a view
//! into the pooled concatenations of [`super::ColorSetStorage`] and
//! never allocates. The two have the same read interface, and each is
//! constructible from the other.

use crate::bits::{BitVec, IntVec};

/// The density rule: a set `{c_1 < … < c_n}` is stored as a bitmap iff
/// `log2(c_n) · n > c_n`, i.e. iff the packed array would be larger than
/// the bitmap.
pub fn use_bitmap(colors: &[u64]) -> bool {
    match colors.last() {
        None => false,
        Some(&max) => (max as f64).log2() * colors.len() as f64 > max as f64,
    }
}

/// A non-owning view of a single color set inside a shared pool (or of
/// an owned [`ColorSet`]).
#[derive(Debug, Clone, Copy)]
pub enum ColorSetRef<'a> {
    Bitmap {
        bits: &'a BitVec,
        start: usize,
        /// Length in bits.
        len: usize,
    },
    Array {
        vals: &'a IntVec,
        start: usize,
        /// Length in entries.
        len: usize,
    },
}

impl ColorSetRef<'_> {
    pub fn is_empty(&self) -> bool {
        match *self {
            ColorSetRef::Bitmap { len, .. } | ColorSetRef::Array { len, .. } => len == 0,
        }
    }

    /// The number of colors; for bitmaps this is a popcount over the
    /// view's range.
    pub fn len(&self) -> usize {
        match *self {
            ColorSetRef::Bitmap { bits, start, len } => bits.count_ones_in_range(start, len),
            ColorSetRef::Array { len, .. } => len,
        }
    }

    /// Membership; constant time on bitmaps, a linear scan on (short)
    /// arrays.
    pub fn contains(&self, color: u64) -> bool {
        match *self {
            ColorSetRef::Bitmap { bits, start, len } => {
                (color as usize) < len && bits.get(start + color as usize)
            }
            ColorSetRef::Array { vals, start, len } => {
                (0..len).any(|i| vals.get(start + i) == color)
            }
        }
    }

    /// The colors in ascending order.
    pub fn iter(&self) -> ColorSetIter<'_> {
        ColorSetIter { set: *self, pos: 0 }
    }

    pub fn to_vec(&self) -> Vec<u64> {
        self.iter().collect()
    }
}

/// Ascending iterator over the colors of a view.
pub struct ColorSetIter<'a> {
    set: ColorSetRef<'a>,
    pos: usize,
}

impl Iterator for ColorSetIter<'_> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        match self.set {
            ColorSetRef::Bitmap { bits, start, len } => {
                while self.pos < len {
                    let p = self.pos;
                    self.pos += 1;
                    if bits.get(start + p) {
                        return Some(p as u64);
                    }
                }
                None
            }
            ColorSetRef::Array { vals, start, len } => {
                if self.pos < len {
                    let p = self.pos;
                    self.pos += 1;
                    Some(vals.get(start + p))
                } else {
                    None
                }
            }
        }
    }
}

/// An owned color set, used for query-time intermediate values.
#[derive(Debug, Clone)]
pub enum ColorSet {
    /// One bit per color in `[0, len)`.
    Bitmap(BitVec),
    /// Sorted distinct colors, packed.
    Array(IntVec),
}

impl ColorSet {
    /// The empty set.
    pub fn empty() -> Self {
        ColorSet::Array(IntVec::new(0, 1))
    }

    /// Builds a set from sorted distinct colors, choosing the
    /// representation by the density rule.
    pub fn from_sorted(colors: &[u64]) -> Self {
        debug_assert!(colors.windows(2).all(|w| w[0] < w[1]));
        if use_bitmap(colors) {
            let max = *colors.last().unwrap();
            let mut bits = BitVec::new(max as usize + 1);
            for &c in colors {
                bits.set(c as usize, true);
            }
            ColorSet::Bitmap(bits)
        } else {
            ColorSet::Array(IntVec::from_slice(colors))
        }
    }

    /// Materializes a view, keeping its representation.
    pub fn from_ref(set: &ColorSetRef<'_>) -> Self {
        match *set {
            ColorSetRef::Bitmap { bits, start, len } => {
                let mut own = BitVec::new(len);
                let mut i = 0;
                while i < len {
                    own.set_word(i, bits.get_word(start + i));
                    i += 64;
                }
                ColorSet::Bitmap(own)
            }
            ColorSetRef::Array { vals, start, len } => {
                let own: Vec<u64> = (start..start + len).map(|i| vals.get(i)).collect();
                ColorSet::Array(IntVec::from_slice_with_width(&own, vals.width()))
            }
        }
    }

    /// The view of this owned set.
    pub fn as_ref(&self) -> ColorSetRef<'_> {
        match self {
            ColorSet::Bitmap(bits) => ColorSetRef::Bitmap {
                bits,
                start: 0,
                len: bits.len(),
            },
            ColorSet::Array(vals) => ColorSetRef::Array {
                vals,
                start: 0,
                len: vals.len(),
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        match self {
            ColorSet::Bitmap(bits) => bits.count_ones(),
            ColorSet::Array(vals) => vals.len(),
        }
    }

    pub fn contains(&self, color: u64) -> bool {
        self.as_ref().contains(color)
    }

    pub fn to_vec(&self) -> Vec<u64> {
        self.as_ref().to_vec()
    }

    /// Intersects this set in place with a view.
    ///
    /// Bitmap ∩ bitmap works a word at a time and stays a bitmap;
    /// bitmap ∩ array switches to an array, since the result can only be
    /// as dense as the right operand; the array arms walk both operands
    /// in step.
    pub fn intersect_with(&mut self, other: &ColorSetRef<'_>) {
        match (&mut *self, other) {
            (ColorSet::Bitmap(a), ColorSetRef::Bitmap { bits, start, len }) => {
                let new_len = a.len().min(*len);
                let mut result = BitVec::new(new_len);
                let mut i = 0;
                while i < new_len {
                    result.set_word(i, a.get_word(i) & bits.get_word(start + i));
                    i += 64;
                }
                *a = result;
            }
            (ColorSet::Array(a), ColorSetRef::Bitmap { bits, start, len }) => {
                let kept: Vec<u64> = a
                    .iter()
                    .filter(|&c| (c as usize) < *len && bits.get(start + c as usize))
                    .collect();
                *self = ColorSet::Array(IntVec::from_slice_with_width(&kept, a.width()));
            }
            (ColorSet::Bitmap(a), ColorSetRef::Array { vals, start, len }) => {
                let kept: Vec<u64> = (*start..start + len)
                    .map(|i| vals.get(i))
                    .filter(|&c| (c as usize) < a.len() && a.get(c as usize))
                    .collect();
                *self = ColorSet::Array(IntVec::from_slice(&kept));
            }
            (ColorSet::Array(a), ColorSetRef::Array { vals, start, len }) => {
                let mut kept = Vec::with_capacity(a.len().min(*len));
                let mut j = 0;
                for c in a.iter() {
                    while j < *len && vals.get(start + j) < c {
                        j += 1;
                    }
                    if j < *len && vals.get(start + j) == c {
                        kept.push(c);
                    }
                }
                *self = ColorSet::Array(IntVec::from_slice_with_width(&kept, a.width()));
            }
        }
    }

    /// Unions this set in place with a view; the result representation
    /// is re-chosen by the density rule.
    pub fn union_with(&mut self, other: &ColorSetRef<'_>) {
        match (&mut *self, other) {
            (ColorSet::Bitmap(a), ColorSetRef::Bitmap { bits, start, len }) => {
                let new_len = a.len().max(*len);
                let mut result = BitVec::new(new_len);
                let mut i = 0;
                while i < new_len {
                    let mut w = 0;
                    if i < a.len() {
                        w |= a.get_word(i);
                    }
                    if i < *len {
                        w |= bits.get_word(start + i);
                    }
                    result.set_word(i, w);
                    i += 64;
                }
                *a = result;
            }
            (ColorSet::Bitmap(a), ColorSetRef::Array { vals, start, len }) => {
                let max_elem = (*start..start + len).map(|i| vals.get(i)).max();
                if let Some(max_elem) = max_elem {
                    if max_elem as usize >= a.len() {
                        let mut grown = BitVec::new(max_elem as usize + 1);
                        let mut i = 0;
                        while i < a.len() {
                            grown.set_word(i, a.get_word(i));
                            i += 64;
                        }
                        *a = grown;
                    }
                    for i in *start..start + len {
                        a.set(vals.get(i) as usize, true);
                    }
                }
            }
            (ColorSet::Array(a), other) => {
                let merged = merge_ascending(a.iter(), other.iter());
                *self = ColorSet::Array(IntVec::from_slice(&merged));
            }
        }
        self.normalize();
    }

    /// Re-applies the density rule after a union.
    fn normalize(&mut self) {
        let sorted = self.to_vec();
        *self = ColorSet::from_sorted(&sorted);
    }
}

/// Merges two ascending iterators, dropping duplicates.
fn merge_ascending(
    mut a: impl Iterator<Item = u64>,
    mut b: impl Iterator<Item = u64>,
) -> Vec<u64> {
    let mut out = Vec::new();
    let mut x = a.next();
    let mut y = b.next();
    loop {
        match (x, y) {
            (None, None) => break,
            (Some(v), None) => {
                out.push(v);
                x = a.next();
            }
            (None, Some(v)) => {
                out.push(v);
                y = b.next();
            }
            (Some(u), Some(v)) => {
                out.push(u.min(v));
                if u <= v {
                    x = a.next();
                }
                if v <= u {
                    y = b.next();
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn forced(colors: &[u64], bitmap: bool) -> ColorSet {
        if bitmap {
            let max = *colors.last().unwrap();
            let mut bits = BitVec::new(max as usize + 1);
            for &c in colors {
                bits.set(c as usize, true);
            }
            ColorSet::Bitmap(bits)
        } else {
            ColorSet::Array(IntVec::from_slice(colors))
        }
    }

    fn check_ops(a: &[u64], b: &[u64], a_bitmap: bool, b_bitmap: bool) {
        let sa: BTreeSet<u64> = a.iter().copied().collect();
        let sb: BTreeSet<u64> = b.iter().copied().collect();
        let expected_inter: Vec<u64> = sa.intersection(&sb).copied().collect();
        let expected_union: Vec<u64> = sa.union(&sb).copied().collect();

        let other = if b.is_empty() {
            ColorSet::empty()
        } else {
            forced(b, b_bitmap)
        };
        let mut inter = if a.is_empty() {
            ColorSet::empty()
        } else {
            forced(a, a_bitmap)
        };
        let mut union = inter.clone();

        inter.intersect_with(&other.as_ref());
        assert_eq!(inter.to_vec(), expected_inter, "inter {:?} {:?}", a, b);

        union.union_with(&other.as_ref());
        assert_eq!(union.to_vec(), expected_union, "union {:?} {:?}", a, b);

        // Algebra: A ∩ B ⊆ A, A ⊆ A ∪ B, |A ∪ B| + |A ∩ B| = |A| + |B|
        assert!(inter.to_vec().iter().all(|c| sa.contains(c)));
        assert!(sa.iter().all(|c| union.contains(*c)));
        assert_eq!(union.len() + inter.len(), sa.len() + sb.len());
    }

    #[test]
    fn test_all_representation_pairs() {
        let cases: &[(&[u64], &[u64])] = &[
            (&[], &[]),
            (&[], &[1, 2, 3]),
            (&[0], &[0]),
            (&[0, 1, 2, 3, 4, 5], &[3, 4, 5, 6, 7]),
            (&[1, 100], &[2, 100, 200]),
            (&[0, 2, 4, 6, 8, 10], &[1, 3, 5, 7, 9]),
            (&[5, 64, 65, 128], &[5, 63, 64, 127, 128, 500]),
            (&[0, 1, 2, 3], &[]),
            (&[63], &[64]),
        ];
        for (a, b) in cases {
            for a_bitmap in [false, true] {
                for b_bitmap in [false, true] {
                    check_ops(a, b, a_bitmap, b_bitmap);
                }
            }
        }
    }

    #[test]
    fn test_density_rule() {
        // Dense small universe: bitmap
        assert!(matches!(
            ColorSet::from_sorted(&[0, 1, 2, 3, 4, 5, 6, 7]),
            ColorSet::Bitmap(_)
        ));
        // Two colors far apart: array
        assert!(matches!(
            ColorSet::from_sorted(&[1, 1_000_000]),
            ColorSet::Array(_)
        ));
        // Empty: array
        assert!(matches!(ColorSet::from_sorted(&[]), ColorSet::Array(_)));
    }

    #[test]
    fn test_owned_view_roundtrip() {
        for bitmap in [false, true] {
            let colors = [1u64, 5, 9, 60];
            let owned = forced(&colors, bitmap);
            let view = owned.as_ref();
            assert_eq!(view.len(), 4);
            assert!(view.contains(5));
            assert!(!view.contains(6));
            assert_eq!(view.to_vec(), colors);
            assert_eq!(ColorSet::from_ref(&view).to_vec(), colors);
        }
    }

    #[test]
    fn test_merge_ascending() {
        assert_eq!(
            merge_ascending([1u64, 3, 5].into_iter(), [1u64, 2, 5, 9].into_iter()),
            vec![1, 2, 3, 5, 9]
        );
        assert_eq!(merge_ascending([].into_iter(), [7u64].into_iter()), vec![7]);
    }
}
