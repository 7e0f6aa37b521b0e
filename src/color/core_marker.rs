/*
 * SPDX-FileCopyrightText: 2025 Inria
 * SPDX-FileCopyrightText: 2025 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Core-node marking.
//!
//! A color-set pointer is stored only at *core* nodes; everywhere else
//! the pointer is recovered by walking forward to the nearest core node.
//! For that walk to be sound, a node must be marked core whenever the
//! color set may change across its outgoing edge, or the edge to follow
//! is not unique:
//!
//! 1. it precedes the first k-mer of some input sequence (the successor
//!    gains that sequence's color),
//! 2. it is the last k-mer of some input sequence (the node itself
//!    carries that sequence's color, its successors need not),
//! 3. it belongs to a suffix group of two or more rows (its successor
//!    has several in-neighbors, and the edge bits live at the group
//!    start anyway),
//! 4. it has two or more outgoing edges.

use crate::bits::BitVec;
use crate::dbg::SbwtDbg;
use crate::kmer::reverse_complement;
use crate::seqio::{split_parts, SequenceSource};
use anyhow::{Context, Result};
use log::info;

/// Marks the core nodes of `dbg` with respect to the sequences of
/// `source`.
pub fn mark_core_kmers(
    source: &mut dyn SequenceSource,
    dbg: &SbwtDbg,
    reverse_complements: bool,
) -> Result<BitVec> {
    let n = dbg.num_sets();
    let k = dbg.k();
    let mut core = BitVec::new(n);
    let mut first_kmer_marks = BitVec::new(n);

    // Cases 1 and 2: sequence boundaries. The last k-mer of each clean
    // part is core; the first k-mer is recorded so that its predecessors
    // can be marked below.
    let mut mark_ends = |part: &[u8]| -> Result<()> {
        if part.len() < k {
            return Ok(());
        }
        let last = dbg
            .search(&part[part.len() - k..])
            .context("BUG: an indexed sequence's last k-mer is not in the graph")?;
        core.set(last, true);
        let first = dbg
            .search(&part[..k])
            .context("BUG: an indexed sequence's first k-mer is not in the graph")?;
        first_kmer_marks.set(first, true);
        Ok(())
    };
    source.for_each_record(&mut |_, seq| {
        for part in split_parts(seq) {
            mark_ends(part)?;
            if reverse_complements {
                mark_ends(&reverse_complement(part))?;
            }
        }
        Ok(())
    })?;

    // Case 1 proper: nodes with an edge into a first k-mer. Edge bits are
    // stored once per suffix group, so this enumerates each edge exactly
    // once.
    for i in 0..n {
        for c in 0..crate::dbg::SIGMA {
            if dbg.col(c).get(i) {
                let dest = dbg.c_array()[c] + dbg.col(c).rank1(i);
                if first_kmer_marks.get(dest) {
                    core.set(i, true);
                }
            }
        }
    }

    // Case 3: all members of multi-row suffix groups
    let mut i = 0;
    while i < n {
        let end = dbg.group_end(i);
        if end - i > 1 {
            for j in i..end {
                core.set(j, true);
            }
        }
        i = end;
    }

    // Case 4: branching nodes
    for i in 0..n {
        if dbg.edges_at(i).count_ones() > 1 {
            core.set(i, true);
        }
    }

    info!(
        "{} of {} nodes are core",
        core.count_ones(),
        n
    );
    Ok(core)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seqio::MemSource;

    #[test]
    fn test_last_kmers_are_core_and_walks_terminate() -> Result<()> {
        let seqs: Vec<Vec<u8>> = vec![
            b"ACATGACGACACATGCTGTAC".to_vec(),
            b"AACTATGGTGCTAACGTAGCAC".to_vec(),
        ];
        let k = 6;
        let dbg = SbwtDbg::from_sequences(seqs.iter(), k, false)?;
        let core = mark_core_kmers(&mut MemSource::new(seqs.clone()), &dbg, false)?;

        for seq in &seqs {
            // Last k-mer of each sequence is core
            let last = dbg.search(&seq[seq.len() - k..]).unwrap();
            assert!(core.get(last));
            // From every k-mer, walking forward along unique edges
            // reaches a core node
            for w in seq.windows(k) {
                let mut node = dbg.search(w).unwrap();
                let mut steps = 0;
                while !core.get(node) {
                    node = dbg.unique_out_neighbor(node).expect("dead end before a core node");
                    steps += 1;
                    assert!(steps <= dbg.num_sets(), "walk does not terminate");
                }
            }
        }
        Ok(())
    }

    #[test]
    fn test_branching_node_is_core() -> Result<()> {
        // GGAC and GGAT branch after GGA
        let seqs: Vec<Vec<u8>> = vec![b"AGGAC".to_vec(), b"AGGAT".to_vec()];
        let k = 3;
        let dbg = SbwtDbg::from_sequences(seqs.iter(), k, false)?;
        let core = mark_core_kmers(&mut MemSource::new(seqs), &dbg, false)?;
        let gga = dbg.search(b"GGA").unwrap();
        assert!(core.get(gga));
        Ok(())
    }

    #[test]
    fn test_merge_predecessors_are_core() -> Result<()> {
        // CGT and GGT both precede GTT: both belong to one suffix group
        let seqs: Vec<Vec<u8>> = vec![b"ACGTT".to_vec(), b"GGTT".to_vec()];
        let k = 3;
        let dbg = SbwtDbg::from_sequences(seqs.iter(), k, false)?;
        let core = mark_core_kmers(&mut MemSource::new(seqs), &dbg, false)?;
        assert!(core.get(dbg.search(b"CGT").unwrap()));
        assert!(core.get(dbg.search(b"GGT").unwrap()));
        Ok(())
    }
}
