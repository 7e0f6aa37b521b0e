/*
 * SPDX-FileCopyrightText: 2025 Inria
 * SPDX-FileCopyrightText: 2025 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The external-memory coloring pipeline.
//!
//! The pipeline turns (sequences, per-sequence colors) into the
//! query-time [`Coloring`]:
//!
//! 1. mark core nodes;
//! 2. stream (node, color) pairs over all sequences in parallel,
//!    keeping only core nodes;
//! 3. sort the 16-byte pair records externally by (node, color);
//! 4. drop adjacent duplicates;
//! 5. group by node into variable-length (length, node, colors…)
//!    records with sorted colors;
//! 6. sort the records by color list, so equal color sets become
//!    adjacent;
//! 7. group by color set into (length, node count, nodes…, colors…);
//! 8. walk the grouped stream assigning dense color-set ids, storing a
//!    pointer at every listed node and at every `d`-th node of the
//!    backward walks starting there;
//! 9. freeze the pools and the sparse pointer array.
//!
//! All record streams are big-endian, so byte order equals numeric
//! order and the sort comparators are plain `memcmp`s.

use super::{mark_core_kmers, ColorSetStorageBuilder, Coloring, SparseIntArrayBuilder};
use crate::bits::BitVec;
use crate::dbg::{BackwardSupport, SbwtDbg, SIGMA};
use crate::emsort;
use crate::pseudoalign::{produce_batches, run_dispatcher};
use crate::ser;
use crate::seqio::SequenceSource;
use crate::temp;
use crate::kmer::reverse_complement_into;
use anyhow::{ensure, Context, Result};
use log::info;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Flush threshold of the per-worker pair buffers.
const WORKER_BUFFER_BYTES: usize = 1 << 20;

/// Builds the coloring of `dbg` for the given sequences.
///
/// `seq_colors[i]` is the color of the `i`-th record of `source`, which
/// is scanned twice (core marking and pair streaming). With
/// `reverse_complements`, the reverse complement of every sequence is
/// streamed under the same color. `sampling_distance` is the maximum
/// number of forward steps a query may take to find a pointer; 1 stores
/// a pointer at every node.
pub fn build_coloring(
    dbg: &SbwtDbg,
    source: &mut dyn SequenceSource,
    seq_colors: &[u64],
    reverse_complements: bool,
    sampling_distance: usize,
    mem_bytes: usize,
    n_threads: usize,
) -> Result<Coloring> {
    ensure!(sampling_distance >= 1, "Sampling distance must be positive");

    info!("Marking core k-mers");
    let cores = mark_core_kmers(source, dbg, reverse_complements)?;

    info!("Streaming node-color pairs");
    let (pairs, largest_color) =
        stream_node_color_pairs(dbg, source, seq_colors, &cores, reverse_complements, n_threads)?;

    info!("Sorting node-color pairs");
    let sorted_pairs = temp::get().create_path("pairs-sorted-");
    emsort::sort_fixed(&pairs, &sorted_pairs, 16, mem_bytes, n_threads, |a, b| {
        a.cmp(b)
    })?;
    temp::get().delete(&pairs);

    info!("Removing duplicate pairs");
    let unique_pairs = delete_duplicate_pairs(&sorted_pairs)?;
    temp::get().delete(&sorted_pairs);

    info!("Collecting color sets");
    let by_node = collect_color_sets(&unique_pairs)?;
    temp::get().delete(&unique_pairs);

    info!("Sorting by color set");
    let sorted_sets = temp::get().create_path("sets-sorted-");
    emsort::sort_variable(&by_node, &sorted_sets, mem_bytes, n_threads, |a, b| {
        // Lexicographic on the color lists, ties broken by length; the
        // length prefix and the node id are skipped
        let (a_rest, b_rest) = (&a[16..], &b[16..]);
        let common = a_rest.len().min(b_rest.len());
        a_rest[..common]
            .cmp(&b_rest[..common])
            .then(a.len().cmp(&b.len()))
    })?;
    temp::get().delete(&by_node);

    info!("Grouping nodes by color set");
    let grouped = collect_nodes_by_color_set(&sorted_sets)?;
    temp::get().delete(&sorted_sets);

    info!("Building the representation");
    let coloring = build_representation(
        dbg,
        &grouped,
        &cores,
        largest_color,
        sampling_distance,
        mem_bytes,
        n_threads,
    )?;
    temp::get().delete(&grouped);

    info!(
        "{} distinct color sets over {} colors",
        coloring.num_color_sets(),
        coloring.largest_color() + 1
    );
    Ok(coloring)
}

/// Stage 2: parallel streaming of 16-byte (node, color) records for
/// every k-mer hit at a core node. Returns the pair file and the largest
/// color streamed.
fn stream_node_color_pairs(
    dbg: &SbwtDbg,
    source: &mut dyn SequenceSource,
    seq_colors: &[u64],
    cores: &BitVec,
    reverse_complements: bool,
    n_threads: usize,
) -> Result<(PathBuf, u64)> {
    let path = temp::get().create_path("pairs-");
    let writer = Mutex::new(BufWriter::new(
        File::create(&path).with_context(|| format!("Could not create {}", path.display()))?,
    ));
    let largest_color = AtomicU64::new(0);

    run_dispatcher(
        n_threads,
        |tx| produce_batches(source, &tx, Some(&mut |id| seq_colors[id])),
        |_| {
            // Per-worker scratch: node ids, reverse-complement bases and
            // the output buffer, allocated once. The shared writer and
            // counter enter the worker closure by reference.
            let writer = &writer;
            let largest_color = &largest_color;
            let mut nodes: Vec<i64> = Vec::new();
            let mut rc: Vec<u8> = Vec::new();
            let mut buffer: Vec<u8> = Vec::with_capacity(WORKER_BUFFER_BYTES + 16);
            move |batch: crate::pseudoalign::Batch| -> Result<()> {
                for (i, (_, seq)) in batch.iter().enumerate() {
                    let color = batch.meta(i);
                    let mut emit = |seq: &[u8], nodes: &mut Vec<i64>| -> Result<()> {
                        dbg.streaming_search_into(seq, nodes);
                        for &node in nodes.iter() {
                            if node >= 0 && cores.get(node as usize) {
                                ser::write_u64_be(&mut buffer, node as u64)?;
                                ser::write_u64_be(&mut buffer, color)?;
                                largest_color.fetch_max(color, Ordering::Relaxed);
                            }
                        }
                        Ok(())
                    };
                    emit(seq, &mut nodes)?;
                    if reverse_complements {
                        reverse_complement_into(seq, &mut rc);
                        emit(&rc, &mut nodes)?;
                    }
                    if buffer.len() >= WORKER_BUFFER_BYTES {
                        let mut w = writer.lock().unwrap();
                        w.write_all(&buffer)?;
                        buffer.clear();
                    }
                }
                // Tail flush per batch; workers cannot know which batch
                // is their last
                if !buffer.is_empty() {
                    let mut w = writer.lock().unwrap();
                    w.write_all(&buffer)?;
                    buffer.clear();
                }
                Ok(())
            }
        },
    )?;

    writer
        .into_inner()
        .unwrap()
        .flush()
        .context("Could not flush the pair stream")?;
    Ok((path, largest_color.into_inner()))
}

/// Stage 4: a single linear pass dropping adjacent equal records.
fn delete_duplicate_pairs(infile: &Path) -> Result<PathBuf> {
    let path = temp::get().create_path("pairs-unique-");
    let mut reader = open(infile)?;
    let mut writer = create(&path)?;
    let mut prev = [0u8; 16];
    let mut cur = [0u8; 16];
    let mut first = true;
    while emsort::read_exact_or_eof(&mut reader, &mut cur)? {
        if first || prev != cur {
            writer.write_all(&cur)?;
        }
        prev = cur;
        first = false;
    }
    writer.flush()?;
    Ok(path)
}

/// Stage 5: groups sorted unique pairs by node into records
/// (length, node, color_1 … color_m), colors ascending.
fn collect_color_sets(infile: &Path) -> Result<PathBuf> {
    let path = temp::get().create_path("sets-");
    let mut reader = open(infile)?;
    let mut writer = create(&path)?;
    let mut buf = [0u8; 16];
    let mut active_node: Option<u64> = None;
    let mut colors: Vec<u64> = Vec::new();

    let mut write_record =
        |node: u64, colors: &[u64], writer: &mut BufWriter<File>| -> Result<()> {
            ser::write_u64_be(writer, 8 * (2 + colors.len() as u64))?;
            ser::write_u64_be(writer, node)?;
            for &c in colors {
                ser::write_u64_be(writer, c)?;
            }
            Ok(())
        };

    while emsort::read_exact_or_eof(&mut reader, &mut buf)? {
        let node = ser::u64_from_be(&buf[0..]);
        let color = ser::u64_from_be(&buf[8..]);
        if active_node == Some(node) {
            colors.push(color);
        } else {
            if let Some(prev) = active_node {
                write_record(prev, &colors, &mut writer)?;
            }
            active_node = Some(node);
            colors.clear();
            colors.push(color);
        }
    }
    if let Some(prev) = active_node {
        write_record(prev, &colors, &mut writer)?;
    }
    writer.flush()?;
    Ok(path)
}

/// Stage 7: groups records with equal color lists into
/// (length, node count, node_1 … node_p, color_1 … color_m).
fn collect_nodes_by_color_set(infile: &Path) -> Result<PathBuf> {
    let path = temp::get().create_path("grouped-");
    let mut reader = open(infile)?;
    let mut writer = create(&path)?;
    let mut record = Vec::new();
    let mut active_colors: Vec<u8> = Vec::new();
    let mut nodes: Vec<u64> = Vec::new();

    let mut write_group =
        |nodes: &mut Vec<u64>, colors: &[u8], writer: &mut BufWriter<File>| -> Result<()> {
            nodes.sort_unstable();
            ser::write_u64_be(writer, 8 * 2 + 8 * nodes.len() as u64 + colors.len() as u64)?;
            ser::write_u64_be(writer, nodes.len() as u64)?;
            for &n in nodes.iter() {
                ser::write_u64_be(writer, n)?;
            }
            writer.write_all(colors)?;
            Ok(())
        };

    let mut first = true;
    while emsort::read_var_record(&mut reader, &mut record)? {
        let node = ser::u64_from_be(&record[8..]);
        let colors = &record[16..];
        if !first && colors == &active_colors[..] {
            nodes.push(node);
        } else {
            if !first {
                write_group(&mut nodes, &active_colors, &mut writer)?;
            }
            active_colors.clear();
            active_colors.extend_from_slice(colors);
            nodes.clear();
            nodes.push(node);
            first = false;
        }
    }
    if !first {
        write_group(&mut nodes, &active_colors, &mut writer)?;
    }
    writer.flush()?;
    Ok(path)
}

/// Stages 8 and 9: assigns dense ids to the distinct color sets, stores
/// them, and stores (node, id) pointers at the listed nodes and at the
/// sampled nodes of the backward walks starting there.
fn build_representation(
    dbg: &SbwtDbg,
    infile: &Path,
    cores: &BitVec,
    largest_color: u64,
    sampling_distance: usize,
    mem_bytes: usize,
    n_threads: usize,
) -> Result<Coloring> {
    let bws = BackwardSupport::new(dbg);
    let mut reader = open(infile)?;
    let mut record = Vec::new();
    let mut sets = ColorSetStorageBuilder::new();
    let mut pointers = SparseIntArrayBuilder::new(dbg.num_sets())?;
    let mut total_set_length = 0u64;
    let mut colors: Vec<u64> = Vec::new();

    while emsort::read_var_record(&mut reader, &mut record)? {
        let n_nodes = ser::u64_from_be(&record[8..]) as usize;
        let set_id = sets.num_sets() as u64;
        colors.clear();
        for i in 0..(record.len() - 16 - 8 * n_nodes) / 8 {
            colors.push(ser::u64_from_be(&record[16 + 8 * n_nodes + 8 * i..]));
        }
        sets.add_set(&colors);
        total_set_length += colors.len() as u64;

        for i in 0..n_nodes {
            let node = ser::u64_from_be(&record[16 + 8 * i..]) as usize;
            pointers.add(node, set_id)?;
            sample_backward_walk(cores, &bws, node, sampling_distance, &mut |u| {
                pointers.add(u, set_id)
            })?;
        }
    }

    Ok(Coloring::new(
        sets.finish(),
        pointers.finish(mem_bytes, n_threads)?,
        largest_color,
        total_set_length,
    ))
}

/// Walks backward from the core node `from` and reports every
/// `distance`-th node of each non-branching backward path, stopping at
/// the first core node, a branch, or the root.
///
/// The forward walk of a query starting anywhere on such a path reaches
/// `from` before any other pointer, so the sampled nodes may all point
/// at `from`'s color set.
fn sample_backward_walk(
    cores: &BitVec,
    bws: &BackwardSupport<'_>,
    from: usize,
    distance: usize,
    report: &mut dyn FnMut(usize) -> Result<()>,
) -> Result<()> {
    debug_assert!(cores.get(from));
    let mut heads = [0; SIGMA];
    let degree = bws.in_neighbors(from, &mut heads);
    let mut walk = [0; SIGMA];
    for &head in &heads[..degree] {
        let mut u = head;
        let mut counter = 0;
        while !cores.get(u) {
            counter += 1;
            if counter == distance {
                report(u)?;
                counter = 0;
            }
            let degree = bws.in_neighbors(u, &mut walk);
            if degree != 1 {
                // Root, or a branch whose predecessors are core anyway
                break;
            }
            u = walk[0];
        }
    }
    Ok(())
}

fn open(path: &Path) -> Result<BufReader<File>> {
    Ok(BufReader::with_capacity(
        1 << 20,
        File::open(path).with_context(|| format!("Could not open {}", path.display()))?,
    ))
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    Ok(BufWriter::with_capacity(
        1 << 20,
        File::create(path).with_context(|| format!("Could not create {}", path.display()))?,
    ))
}
