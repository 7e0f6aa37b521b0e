/*
 * SPDX-FileCopyrightText: 2025 Inria
 * SPDX-FileCopyrightText: 2025 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Record-based external-memory sorting.
//!
//! Two record shapes are supported: fixed-size records, and
//! variable-size records starting with an 8-byte big-endian length that
//! includes the length field itself. In both cases the comparator
//! receives the raw record bytes, length prefix included.
//!
//! Sorting proceeds in the usual two phases: runs are produced by
//! reading blocks that fit the memory budget and sorting their record
//! indices in parallel, and the runs are then merged with a
//! [quaternary heap](dary_heap::QuaternaryHeap) keyed by the
//! comparator. The sort is not stable: equal records may be emitted in
//! any order.

use crate::temp;
use anyhow::{ensure, Context, Result};
use dary_heap::{PeekMut, QuaternaryHeap};
use log::debug;
use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Minimal block size; below this, external sorting degenerates.
const MIN_BLOCK_BYTES: usize = 1 << 20;

/// Reads as much as possible into `buf`, returning the number of bytes
/// read; short only at end of file.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).context("Read failed")?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Reads exactly `buf.len()` bytes, or nothing at all; `false` on a clean
/// end of file.
pub fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool> {
    let filled = read_full(reader, buf)?;
    if filled == 0 {
        return Ok(false);
    }
    ensure!(
        filled == buf.len(),
        "Truncated record: wanted {} bytes, got {}",
        buf.len(),
        filled
    );
    Ok(true)
}

/// Reads one variable-length record (8-byte big-endian length prefix,
/// prefix included in the length and in the output); `false` on a clean
/// end of file.
pub fn read_var_record<R: Read>(reader: &mut R, buf: &mut Vec<u8>) -> Result<bool> {
    let mut prefix = [0u8; 8];
    if !read_exact_or_eof(reader, &mut prefix)? {
        return Ok(false);
    }
    let len = u64::from_be_bytes(prefix) as usize;
    ensure!(len >= 8, "Record length {} shorter than its prefix", len);
    buf.clear();
    buf.extend_from_slice(&prefix);
    buf.resize(len, 0);
    reader
        .read_exact(&mut buf[8..])
        .context("Truncated variable-length record")?;
    Ok(true)
}

/// Externally sorts a file of `record_bytes`-sized records.
pub fn sort_fixed<F>(
    infile: &Path,
    outfile: &Path,
    record_bytes: usize,
    mem_bytes: usize,
    threads: usize,
    cmp: F,
) -> Result<()>
where
    F: Fn(&[u8], &[u8]) -> Ordering + Sync,
{
    let mut reader = open_reader(infile)?;
    let block_bytes = mem_bytes.max(MIN_BLOCK_BYTES);
    let block_bytes = block_bytes - block_bytes % record_bytes;
    let mut block = vec![0u8; block_bytes];
    let mut runs = Vec::new();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .context("Could not build the sorting thread pool")?;

    loop {
        let filled = read_full(&mut reader, &mut block)?;
        if filled == 0 {
            break;
        }
        ensure!(
            filled % record_bytes == 0,
            "File size is not a multiple of the record size {}",
            record_bytes
        );
        let records = filled / record_bytes;
        let mut order: Vec<u32> = (0..records as u32).collect();
        let block = &block[..filled];
        let rec = |i: u32| &block[i as usize * record_bytes..(i as usize + 1) * record_bytes];
        pool.install(|| {
            use rayon::prelude::*;
            order.par_sort_unstable_by(|&a, &b| cmp(rec(a), rec(b)));
        });
        runs.push(write_run(order.iter().map(|&i| rec(i)))?);
    }
    debug!("Merging {} runs", runs.len());
    merge_runs(
        &runs,
        outfile,
        |r, buf| {
            buf.resize(record_bytes, 0);
            read_exact_or_eof(r, buf)
        },
        &cmp,
    )
}

/// Externally sorts a file of length-prefixed variable-size records.
pub fn sort_variable<F>(
    infile: &Path,
    outfile: &Path,
    mem_bytes: usize,
    threads: usize,
    cmp: F,
) -> Result<()>
where
    F: Fn(&[u8], &[u8]) -> Ordering + Sync,
{
    let mut reader = open_reader(infile)?;
    let block_bytes = mem_bytes.max(MIN_BLOCK_BYTES);
    let mut runs = Vec::new();
    let mut record = Vec::new();
    let mut done = false;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .context("Could not build the sorting thread pool")?;

    while !done {
        let mut block = Vec::with_capacity(block_bytes.min(1 << 26));
        let mut offsets: Vec<(usize, usize)> = Vec::new();
        loop {
            if !read_var_record(&mut reader, &mut record)? {
                done = true;
                break;
            }
            offsets.push((block.len(), record.len()));
            block.extend_from_slice(&record);
            if block.len() >= block_bytes {
                break;
            }
        }
        if offsets.is_empty() {
            break;
        }
        let block = &block[..];
        let rec = |&(start, len): &(usize, usize)| &block[start..start + len];
        pool.install(|| {
            use rayon::prelude::*;
            offsets.par_sort_unstable_by(|a, b| cmp(rec(a), rec(b)));
        });
        runs.push(write_run(offsets.iter().map(rec))?);
    }
    debug!("Merging {} runs", runs.len());
    merge_runs(&runs, outfile, read_var_record, &cmp)
}

fn open_reader(path: &Path) -> Result<BufReader<File>> {
    Ok(BufReader::with_capacity(
        1 << 20,
        File::open(path).with_context(|| format!("Could not open {}", path.display()))?,
    ))
}

fn write_run<'a>(records: impl Iterator<Item = &'a [u8]>) -> Result<PathBuf> {
    let path = temp::get().create_path("sort-run-");
    let mut w = BufWriter::with_capacity(
        1 << 20,
        File::create(&path).with_context(|| format!("Could not create {}", path.display()))?,
    );
    for r in records {
        w.write_all(r).context("Could not write a sort run")?;
    }
    w.flush().context("Could not flush a sort run")?;
    Ok(path)
}

/// Private struct pairing a run's current head record with the run
/// index, ordered only through the comparator.
///
/// The ordering is reversed so that the max-heap pops the smallest
/// record first.
struct HeadTail<'a, F> {
    head: Vec<u8>,
    run: usize,
    cmp: &'a F,
}

impl<F: Fn(&[u8], &[u8]) -> Ordering> PartialEq for HeadTail<'_, F> {
    fn eq(&self, other: &Self) -> bool {
        (self.cmp)(&self.head, &other.head) == Ordering::Equal
    }
}

impl<F: Fn(&[u8], &[u8]) -> Ordering> Eq for HeadTail<'_, F> {}

impl<F: Fn(&[u8], &[u8]) -> Ordering> PartialOrd for HeadTail<'_, F> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<F: Fn(&[u8], &[u8]) -> Ordering> Ord for HeadTail<'_, F> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.cmp)(&other.head, &self.head)
    }
}

/// Merges sorted runs into `outfile` with a quaternary heap over the
/// run heads. The comparator is called directly on record bytes; there
/// is no dynamic dispatch in the merge loop.
fn merge_runs<F, N>(runs: &[PathBuf], outfile: &Path, mut next: N, cmp: &F) -> Result<()>
where
    F: Fn(&[u8], &[u8]) -> Ordering,
    N: FnMut(&mut BufReader<File>, &mut Vec<u8>) -> Result<bool>,
{
    let mut out = BufWriter::with_capacity(
        1 << 20,
        File::create(outfile).with_context(|| format!("Could not create {}", outfile.display()))?,
    );

    let mut readers = Vec::with_capacity(runs.len());
    let mut heap = QuaternaryHeap::with_capacity(runs.len());
    for (run, path) in runs.iter().enumerate() {
        let mut reader = open_reader(path)?;
        let mut head = Vec::new();
        if next(&mut reader, &mut head)? {
            heap.push(HeadTail { head, run, cmp });
        }
        readers.push(reader);
    }

    while let Some(mut top) = heap.peek_mut() {
        out.write_all(&top.head).context("Could not write merged output")?;
        let run = top.run;
        if !next(&mut readers[run], &mut top.head)? {
            PeekMut::pop(top);
        }
        // Dropping the handle otherwise re-sifts the refilled head
    }
    out.flush().context("Could not flush merged output")?;

    for path in runs {
        temp::get().delete(path);
    }
    Ok(())
}
