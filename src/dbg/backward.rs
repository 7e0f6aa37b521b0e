/*
 * SPDX-FileCopyrightText: 2025 Inria
 * SPDX-FileCopyrightText: 2025 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use super::{SbwtDbg, SIGMA};
use crate::bits::BitVec;
use crate::kmer::code_to_char;

/// Backward traversal over an [`SbwtDbg`].
///
/// In the SBWT every row except the root has exactly one predecessor row,
/// even when the corresponding de Bruijn node has several in-neighbors;
/// the other in-neighbors are the remaining members of the predecessor's
/// suffix group. This structure resolves predecessors with select queries
/// on the columns and knows which rows are dummies, so it can list the
/// de Bruijn in-neighbors proper.
///
/// The support borrows the graph; it is built where needed and never
/// serialized.
pub struct BackwardSupport<'a> {
    dbg: &'a SbwtDbg,
    dummy_marks: BitVec,
}

impl<'a> BackwardSupport<'a> {
    pub fn new(dbg: &'a SbwtDbg) -> Self {
        BackwardSupport {
            dummy_marks: dbg.dummy_node_marks(),
            dbg,
        }
    }

    pub fn dummy_marks(&self) -> &BitVec {
        &self.dummy_marks
    }

    pub fn is_dummy(&self, node: usize) -> bool {
        self.dummy_marks.get(node)
    }

    /// The last character of the label of `node`, or `None` for the
    /// sentinel (the root).
    fn incoming_code(&self, node: usize) -> Option<u8> {
        let c_array = self.dbg.c_array();
        (0..SIGMA)
            .rev()
            .find(|&c| node >= c_array[c])
            .map(|c| c as u8)
    }

    /// The unique SBWT predecessor of `node`; the root is its own
    /// predecessor.
    pub fn backward_step(&self, node: usize) -> usize {
        match self.incoming_code(node) {
            None => node, // Root
            Some(c) => {
                let c = c as usize;
                self.dbg
                    .col(c)
                    .select1(node - self.dbg.c_array()[c] + 1)
            }
        }
    }

    /// Lists the de Bruijn in-neighbors of `node` into `out`, returning
    /// the in-degree (at most `SIGMA`).
    ///
    /// These are the non-dummy members of the predecessor's suffix group;
    /// a group contains at most one dummy, and it is the first member.
    pub fn in_neighbors(&self, node: usize, out: &mut [usize; SIGMA]) -> usize {
        if self.incoming_code(node).is_none() {
            return 0; // Root
        }
        let mut v = self.backward_step(node);
        let mut degree = 0;
        if !self.dummy_marks.get(v) {
            out[degree] = v;
            degree += 1;
        }
        v += 1;
        while v < self.dbg.num_sets() && !self.dbg.is_group_start(v) {
            out[degree] = v;
            degree += 1;
            v += 1;
        }
        degree
    }

    /// The length-k label of `node`, with dummies padded with `$` on the
    /// left.
    pub fn node_label(&self, node: usize) -> Vec<u8> {
        let k = self.dbg.k();
        let mut label = vec![b'$'; k];
        let mut v = node;
        for i in 0..k {
            match self.incoming_code(v) {
                None => break,
                Some(c) => {
                    label[k - 1 - i] = code_to_char(c);
                    v = self.backward_step(v);
                }
            }
        }
        label
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};

    #[test]
    fn test_labels_and_in_neighbors_against_naive() {
        let seqs: &[&[u8]] = &[b"ACATGACGACACATGCTGTAC", b"AACTATGGTGCTAACGTAGCAC"];
        let k = 4;
        let dbg = SbwtDbg::from_sequences(seqs.iter().copied(), k, false).unwrap();
        let bws = BackwardSupport::new(&dbg);

        let mut kmers = HashSet::new();
        for seq in seqs {
            for w in seq.windows(k) {
                kmers.insert(w.to_vec());
            }
        }

        // Labels of real nodes are the k-mers themselves
        let mut node_of = HashMap::new();
        for kmer in &kmers {
            let node = dbg.search(kmer).unwrap();
            assert_eq!(bws.node_label(node), *kmer);
            node_of.insert(kmer.clone(), node);
        }

        // In-neighbors match the shift relation on the k-mer set
        let mut buf = [0; SIGMA];
        for kmer in &kmers {
            let node = node_of[kmer];
            let expected: HashSet<usize> = b"ACGT"
                .iter()
                .map(|&c| {
                    let mut pred = vec![c];
                    pred.extend_from_slice(&kmer[..k - 1]);
                    pred
                })
                .filter(|pred| kmers.contains(pred))
                .map(|pred| node_of[&pred])
                .collect();
            let degree = bws.in_neighbors(node, &mut buf);
            let got: HashSet<usize> = buf[..degree].iter().copied().collect();
            assert_eq!(got, expected, "in-neighbors of {:?}", kmer);
        }
    }

    #[test]
    fn test_backward_step_inverts_forward() {
        let seq: &[u8] = b"ACATGACGACACATGCTGTAC";
        let k = 6;
        let dbg = SbwtDbg::from_sequences([seq], k, false).unwrap();
        let bws = BackwardSupport::new(&dbg);
        for p in 0..seq.len() - k {
            let u = dbg.search(&seq[p..p + k]).unwrap();
            let v = dbg.search(&seq[p + 1..p + 1 + k]).unwrap();
            // The predecessor of v is in v's predecessor group, which
            // contains u
            let w = bws.backward_step(v);
            let group: Vec<usize> = (dbg.group_start(w)..dbg.group_end(dbg.group_start(w))).collect();
            assert!(group.contains(&u));
        }
    }

    #[test]
    fn test_dummy_labels_are_padded() {
        let dbg = SbwtDbg::from_sequences([b"ACGTAC"], 4, false).unwrap();
        let bws = BackwardSupport::new(&dbg);
        // Row 0 is the root
        assert_eq!(bws.node_label(0), b"$$$$");
        assert!(bws.is_dummy(0));
    }
}
