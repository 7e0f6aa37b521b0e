/*
 * SPDX-FileCopyrightText: 2025 Inria
 * SPDX-FileCopyrightText: 2025 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Pseudoalignment queries.
//!
//! A query is aligned by intersecting the color sets of its k-mers: in
//! *intersection mode* (threshold 1) the result is the intersection of
//! the color sets of all k-mers found in the graph; in *threshold mode*
//! every k-mer votes for the colors of its set, and colors reaching
//! `ceil(τ · (L − k + 1))` votes are reported. K-mers absent from the
//! graph contribute nothing in either mode. With reverse complements
//! enabled, each position considers the union of the color sets of its
//! k-mer and of the reverse complement's k-mer at the mirrored position.
//!
//! Queries run on the batch dispatcher; each worker owns its aligner
//! (scratch buffers included) and flushes formatted results to the
//! shared output in large chunks. Output lines are `<query id>
//! <color>…`, in arbitrary order unless id-sorted output is requested,
//! in which case a second pass restores input order with a heap.

mod dispatcher;
pub use dispatcher::*;

use crate::color::{ColorSet, ColorSetRef, Coloring};
use crate::dbg::SbwtDbg;
use crate::kmer::reverse_complement_into;
use crate::seqio::SequenceSource;
use crate::temp;
use anyhow::{ensure, Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use log::info;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

/// Query-side options.
#[derive(Debug, Clone)]
pub struct PseudoalignOptions {
    pub n_threads: usize,
    /// Also match the reverse complement of each query.
    pub reverse_complements: bool,
    /// Fraction of k-mers that must carry a color for it to be
    /// reported; 1 means plain intersection.
    pub threshold: f64,
    /// Restore input order in the output.
    pub sort_output: bool,
    /// Gzip the output stream.
    pub gzip_output: bool,
}

impl Default for PseudoalignOptions {
    fn default() -> Self {
        PseudoalignOptions {
            n_threads: 1,
            reverse_complements: false,
            threshold: 1.0,
            sort_output: false,
            gzip_output: false,
        }
    }
}

/// A per-worker aligner owning all scratch space, so that aligning a
/// query allocates only when a buffer must grow.
pub struct QueryAligner<'a> {
    dbg: &'a SbwtDbg,
    coloring: &'a Coloring,
    reverse_complements: bool,
    threshold: f64,
    nodes: Vec<i64>,
    ids: Vec<i64>,
    ids_rc: Vec<i64>,
    rc: Vec<u8>,
    /// Threshold-mode vote counters, indexed by color.
    counts: Vec<u32>,
    touched: Vec<u64>,
    result: Vec<u64>,
}

impl<'a> QueryAligner<'a> {
    pub fn new(
        dbg: &'a SbwtDbg,
        coloring: &'a Coloring,
        reverse_complements: bool,
        threshold: f64,
    ) -> Self {
        QueryAligner {
            dbg,
            coloring,
            reverse_complements,
            threshold,
            nodes: Vec::new(),
            ids: Vec::new(),
            ids_rc: Vec::new(),
            rc: Vec::new(),
            counts: vec![0; coloring.largest_color() as usize + 1],
            touched: Vec::new(),
            result: Vec::new(),
        }
    }

    /// Aligns one query; the result is ascending and lives until the
    /// next call.
    pub fn align(&mut self, query: &[u8]) -> Result<&[u64]> {
        self.result.clear();
        let k = self.dbg.k();
        if query.len() < k {
            return Ok(&self.result);
        }
        let m = query.len() - k + 1;

        resolve_ids(
            self.dbg,
            self.coloring,
            query,
            &mut self.nodes,
            &mut self.ids,
        )?;
        if self.reverse_complements {
            reverse_complement_into(query, &mut self.rc);
            resolve_ids(
                self.dbg,
                self.coloring,
                &self.rc,
                &mut self.nodes,
                &mut self.ids_rc,
            )?;
        }

        if self.threshold == 1.0 {
            self.intersect(m)
        } else {
            self.vote(m)
        }
    }

    /// Intersection mode. Positions whose (pair of) color-set ids equal
    /// the previous position's are skipped: the operand would be
    /// identical.
    fn intersect(&mut self, m: usize) -> Result<&[u64]> {
        let mut acc: Option<ColorSet> = None;
        for i in 0..m {
            let f = self.ids[i];
            let r = if self.reverse_complements {
                self.ids_rc[m - 1 - i]
            } else {
                -1
            };
            if f < 0 && r < 0 {
                continue;
            }
            if i > 0
                && f == self.ids[i - 1]
                && (!self.reverse_complements || r == self.ids_rc[m - i])
            {
                continue;
            }
            let operand = match (f, r) {
                (f, r) if f >= 0 && r >= 0 => {
                    let mut u = ColorSet::from_ref(&self.coloring.color_set(f as usize));
                    u.union_with(&self.coloring.color_set(r as usize));
                    u
                }
                (f, _) if f >= 0 => ColorSet::from_ref(&self.coloring.color_set(f as usize)),
                (_, r) => ColorSet::from_ref(&self.coloring.color_set(r as usize)),
            };
            match &mut acc {
                None => acc = Some(operand),
                Some(a) => {
                    a.intersect_with(&operand.as_ref());
                    if a.is_empty() {
                        return Ok(&self.result); // Early exit: empty stays empty
                    }
                }
            }
        }
        if let Some(acc) = acc {
            self.result.extend(acc.as_ref().iter());
        }
        Ok(&self.result)
    }

    /// Threshold mode: per-position votes, then the cutoff.
    fn vote(&mut self, m: usize) -> Result<&[u64]> {
        let cutoff = (self.threshold * m as f64).ceil() as u32;
        for i in 0..m {
            let f = self.ids[i];
            let r = if self.reverse_complements {
                self.ids_rc[m - 1 - i]
            } else {
                -1
            };
            let fw_set = (f >= 0).then(|| self.coloring.color_set(f as usize));
            let rc_set = (r >= 0).then(|| self.coloring.color_set(r as usize));
            for_each_union_color(fw_set, rc_set, |c| {
                if self.counts[c as usize] == 0 {
                    self.touched.push(c);
                }
                self.counts[c as usize] += 1;
            });
        }
        self.touched.sort_unstable();
        for &c in &self.touched {
            if self.counts[c as usize] >= cutoff {
                self.result.push(c);
            }
            self.counts[c as usize] = 0;
        }
        self.touched.clear();
        Ok(&self.result)
    }
}

/// Fills `ids` with the color-set id of every k-mer of `seq`, −1 where
/// missing; `nodes` is scratch.
fn resolve_ids(
    dbg: &SbwtDbg,
    coloring: &Coloring,
    seq: &[u8],
    nodes: &mut Vec<i64>,
    ids: &mut Vec<i64>,
) -> Result<()> {
    dbg.streaming_search_into(seq, nodes);
    ids.clear();
    for (i, &node) in nodes.iter().enumerate() {
        let id = if node < 0 {
            -1
        } else if i > 0 && nodes[i - 1] == node {
            // Same node (a homopolymer run): same pointer
            ids[i - 1]
        } else {
            coloring.color_set_id(node as usize, dbg)? as i64
        };
        ids.push(id);
    }
    Ok(())
}

/// Calls `f` with each color of the union of up to two views, in
/// ascending order.
fn for_each_union_color(
    a: Option<ColorSetRef<'_>>,
    b: Option<ColorSetRef<'_>>,
    mut f: impl FnMut(u64),
) {
    match (a, b) {
        (None, None) => {}
        (Some(s), None) | (None, Some(s)) => s.iter().for_each(f),
        (Some(a), Some(b)) => {
            let mut x = a.iter().peekable();
            let mut y = b.iter().peekable();
            loop {
                match (x.peek().copied(), y.peek().copied()) {
                    (None, None) => break,
                    (Some(u), None) => {
                        f(u);
                        x.next();
                    }
                    (None, Some(v)) => {
                        f(v);
                        y.next();
                    }
                    (Some(u), Some(v)) => {
                        f(u.min(v));
                        if u <= v {
                            x.next();
                        }
                        if v <= u {
                            y.next();
                        }
                    }
                }
            }
        }
    }
}

/// Aligns a single query; a convenience wrapper building a throwaway
/// aligner.
pub fn pseudoalign_query(
    dbg: &SbwtDbg,
    coloring: &Coloring,
    query: &[u8],
    reverse_complements: bool,
    threshold: f64,
) -> Result<Vec<u64>> {
    let mut aligner = QueryAligner::new(dbg, coloring, reverse_complements, threshold);
    Ok(aligner.align(query)?.to_vec())
}

/// Flush threshold of the per-worker output buffers.
const OUTPUT_BUFFER_BYTES: usize = 1 << 20;

/// Aligns every query of `queries` and writes one result line per query
/// to `outfile`.
pub fn pseudoalign_to_file(
    dbg: &SbwtDbg,
    coloring: &Coloring,
    queries: &mut dyn SequenceSource,
    outfile: &Path,
    opts: &PseudoalignOptions,
) -> Result<()> {
    ensure!(
        opts.threshold > 0.0 && opts.threshold <= 1.0,
        "The threshold must be in (0, 1], got {}",
        opts.threshold
    );
    if opts.sort_output {
        let unsorted = temp::get().create_path("results-");
        align_all(dbg, coloring, queries, &unsorted, false, opts)?;
        info!("Sorting the output by query id");
        sort_output_file(&unsorted, outfile, opts.gzip_output)?;
        temp::get().delete(&unsorted);
        Ok(())
    } else {
        align_all(dbg, coloring, queries, outfile, opts.gzip_output, opts)
    }
}

fn open_output(path: &Path, gzip: bool) -> Result<Box<dyn Write + Send>> {
    let file =
        File::create(path).with_context(|| format!("Could not create {}", path.display()))?;
    Ok(if gzip {
        Box::new(GzEncoder::new(
            BufWriter::with_capacity(1 << 20, file),
            Compression::default(),
        ))
    } else {
        Box::new(BufWriter::with_capacity(1 << 20, file))
    })
}

fn align_all(
    dbg: &SbwtDbg,
    coloring: &Coloring,
    queries: &mut dyn SequenceSource,
    outfile: &Path,
    gzip: bool,
    opts: &PseudoalignOptions,
) -> Result<()> {
    let writer = Mutex::new(open_output(outfile, gzip)?);
    run_dispatcher(
        opts.n_threads,
        |tx| produce_batches(queries, &tx, None),
        |_| {
            let writer = &writer;
            let mut aligner =
                QueryAligner::new(dbg, coloring, opts.reverse_complements, opts.threshold);
            let mut out = String::new();
            move |batch: Batch| -> Result<()> {
                for (id, seq) in batch.iter() {
                    let colors = aligner.align(seq)?;
                    write!(out, "{}", id)?;
                    for c in colors {
                        write!(out, " {}", c)?;
                    }
                    out.push('\n');
                    if out.len() >= OUTPUT_BUFFER_BYTES {
                        writer.lock().unwrap().write_all(out.as_bytes())?;
                        out.clear();
                    }
                }
                if !out.is_empty() {
                    writer.lock().unwrap().write_all(out.as_bytes())?;
                    out.clear();
                }
                Ok(())
            }
        },
    )?;
    writer
        .into_inner()
        .unwrap()
        .flush()
        .context("Could not flush the result file")?;
    Ok(())
}

/// Restores ascending query-id order: lines are buffered in a min-heap
/// and flushed whenever the next expected id surfaces.
fn sort_output_file(infile: &Path, outfile: &Path, gzip: bool) -> Result<()> {
    let reader = BufReader::with_capacity(
        1 << 20,
        File::open(infile).with_context(|| format!("Could not open {}", infile.display()))?,
    );
    let mut writer = open_output(outfile, gzip)?;
    let mut heap: BinaryHeap<Reverse<(u64, String)>> = BinaryHeap::new();
    let mut next = 0u64;
    for line in reader.lines() {
        let line = line.context("Could not read a result line")?;
        let id: u64 = line
            .split_whitespace()
            .next()
            .context("Empty result line")?
            .parse()
            .context("Result line does not start with a query id")?;
        heap.push(Reverse((id, line)));
        while heap.peek().is_some_and(|Reverse((i, _))| *i == next) {
            let Reverse((_, line)) = heap.pop().unwrap();
            writeln!(writer, "{}", line)?;
            next += 1;
        }
    }
    ensure!(
        heap.is_empty(),
        "BUG: {} result lines with out-of-range query ids",
        heap.len()
    );
    writer.flush().context("Could not flush the sorted output")?;
    Ok(())
}
