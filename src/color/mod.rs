/*
 * SPDX-FileCopyrightText: 2025 Inria
 * SPDX-FileCopyrightText: 2025 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The coloring: distinct color sets, and the mapping from graph nodes
//! to their color set.
//!
//! Distinct color sets are deduplicated and pooled in a
//! [`ColorSetStorage`]; a [`SparseIntArray`] maps *core* nodes to
//! color-set ids. The color set of any other node is found by walking
//! forward in the graph: by construction, the color set cannot change
//! before the first node that has a pointer, and with sampling distance
//! `d` a pointer is found within `d` steps.

mod build;
pub use build::*;

mod core_marker;
pub use core_marker::*;

mod set;
pub use set::*;

mod sparse;
pub use sparse::*;

mod storage;
pub use storage::*;

use crate::dbg::SbwtDbg;
use crate::ser;
use anyhow::{Context, Result};
use std::io::{Read, Write};

/// The tag identifying this coloring layout on disk. The namespace is
/// shared with alternative color-set backends, which would carry their
/// own tags.
pub const COLORING_TAG: &str = "hybrid-v1";

/// Error raised when a serialized coloring carries an unknown tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrongColoringTag {
    pub found: String,
}

impl std::fmt::Display for WrongColoringTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Unsupported coloring type {:?} (this build supports {:?})",
            self.found, COLORING_TAG
        )
    }
}

impl std::error::Error for WrongColoringTag {}

/// The query-time coloring structure.
#[derive(Debug, Clone)]
pub struct Coloring {
    sets: ColorSetStorage,
    node_to_set: SparseIntArray,
    largest_color: u64,
    total_set_length: u64,
}

impl Coloring {
    /// The color-set id of a (real) node.
    ///
    /// If the node has no stored pointer, follows unique out-edges until
    /// one is found; the walk stays within one suffix group start after
    /// another, so reading the edge bits at the node is sound.
    pub fn color_set_id(&self, node: usize, dbg: &SbwtDbg) -> Result<usize> {
        let mut node = node;
        while !self.node_to_set.has(node) {
            node = dbg
                .unique_out_neighbor(node)
                .context("BUG: dead end while resolving a color-set pointer")?;
        }
        Ok(self.node_to_set.get(node).unwrap() as usize)
    }

    /// The view of the color set with the given id.
    pub fn color_set(&self, id: usize) -> ColorSetRef<'_> {
        self.sets.get(id)
    }

    /// The view of the color set of a node.
    pub fn color_set_of_node(&self, node: usize, dbg: &SbwtDbg) -> Result<ColorSetRef<'_>> {
        Ok(self.sets.get(self.color_set_id(node, dbg)?))
    }

    /// Whether a color-set pointer is stored at this node (core nodes
    /// and sampled nodes).
    pub fn is_core(&self, node: usize) -> bool {
        self.node_to_set.has(node)
    }

    /// The number of distinct color sets.
    pub fn num_color_sets(&self) -> usize {
        self.sets.num_sets()
    }

    /// The largest color id occurring in the input.
    pub fn largest_color(&self) -> u64 {
        self.largest_color
    }

    /// The sum of the sizes of the distinct color sets.
    pub fn total_color_set_length(&self) -> u64 {
        self.total_set_length
    }

    pub fn sets(&self) -> &ColorSetStorage {
        &self.sets
    }

    pub(crate) fn new(
        sets: ColorSetStorage,
        node_to_set: SparseIntArray,
        largest_color: u64,
        total_set_length: u64,
    ) -> Self {
        Coloring {
            sets,
            node_to_set,
            largest_color,
            total_set_length,
        }
    }

    pub fn serialize<W: Write>(&self, w: &mut W) -> Result<()> {
        ser::write_str(w, COLORING_TAG)?;
        self.sets.serialize(w)?;
        self.node_to_set.serialize(w)?;
        ser::write_u64(w, self.largest_color)?;
        ser::write_u64(w, self.total_set_length)
    }

    pub fn load<R: Read>(r: &mut R) -> Result<Self> {
        let tag = ser::read_str(r)?;
        if tag != COLORING_TAG {
            return Err(WrongColoringTag { found: tag }.into());
        }
        Ok(Coloring {
            sets: ColorSetStorage::load(r)?,
            node_to_set: SparseIntArray::load(r)?,
            largest_color: ser::read_u64(r)?,
            total_set_length: ser::read_u64(r)?,
        })
    }

    /// Serialized size in bytes of each component, for diagnostics.
    pub fn space_breakdown(&self) -> Result<Vec<(String, u64)>> {
        let mut breakdown: Vec<(String, u64)> = self
            .sets
            .space_breakdown()?
            .into_iter()
            .map(|(name, bytes)| (format!("color-set-storage-{}", name), bytes))
            .collect();
        let mut buf = Vec::new();
        self.node_to_set.serialize(&mut buf)?;
        breakdown.push(("node-to-color-set-id".to_owned(), buf.len() as u64));
        Ok(breakdown)
    }
}
