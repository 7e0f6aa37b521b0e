/*
 * SPDX-FileCopyrightText: 2025 Inria
 * SPDX-FileCopyrightText: 2025 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! File-level query tests: the parallel engine, ordered output and
//! gzipped output.

use anyhow::Result;
use cdbg::index::{BuildOptions, ColoredDbg};
use cdbg::pseudoalign::{pseudoalign_to_file, PseudoalignOptions};
use cdbg::seqio::{FileSource, MemSource, NonAcgtPolicy};
use flate2::read::MultiGzDecoder;
use rand::prelude::*;
use std::io::Read;
use std::path::Path;

const K: usize = 11;

fn random_dna(len: usize, rng: &mut SmallRng) -> String {
    (0..len).map(|_| b"ACGT"[rng.random_range(0..4)] as char).collect()
}

fn build_index(seqs: &[String]) -> Result<ColoredDbg> {
    let opts = BuildOptions {
        k: K,
        non_acgt: NonAcgtPolicy::DeleteSplit,
        mem_bytes: 1 << 22,
        n_threads: 4,
        ..BuildOptions::default()
    };
    let mut source = MemSource::new(seqs.iter().map(|s| s.as_bytes().to_vec()).collect());
    ColoredDbg::build(&mut source, None, &opts)
}

fn write_query_fasta(path: &Path, queries: &[String]) -> Result<()> {
    let mut out = String::new();
    for (i, q) in queries.iter().enumerate() {
        out.push_str(&format!(">query{}\n{}\n", i, q));
    }
    std::fs::write(path, out)?;
    Ok(())
}

/// Builds an index over random sequences and a query set mixing whole
/// references, substrings and junk.
fn setup(rng: &mut SmallRng) -> Result<(ColoredDbg, Vec<String>)> {
    let seqs: Vec<String> = (0..20).map(|_| random_dna(150, rng)).collect();
    let index = build_index(&seqs)?;
    let mut queries = Vec::new();
    for i in 0..100 {
        let q = match i % 3 {
            0 => seqs[i % seqs.len()].clone(),
            1 => {
                let seq = &seqs[i % seqs.len()];
                let start = rng.random_range(0..seq.len() - K);
                seq[start..start + K + rng.random_range(0..20).min(seq.len() - start - K)]
                    .to_owned()
            }
            _ => random_dna(40, rng),
        };
        queries.push(q);
    }
    Ok((index, queries))
}

fn parse_results(content: &str) -> Vec<(u64, Vec<u64>)> {
    content
        .lines()
        .map(|line| {
            let mut fields = line.split_whitespace().map(|f| f.parse::<u64>().unwrap());
            let id = fields.next().unwrap();
            (id, fields.collect())
        })
        .collect()
}

#[test]
fn test_parallel_output_matches_serial_queries() -> Result<()> {
    let mut rng = SmallRng::seed_from_u64(1);
    let (index, queries) = setup(&mut rng)?;
    let dir = tempfile::tempdir()?;
    let query_path = dir.path().join("queries.fna");
    let out_path = dir.path().join("out.txt");
    write_query_fasta(&query_path, &queries)?;

    let opts = PseudoalignOptions {
        n_threads: 4,
        sort_output: true,
        ..PseudoalignOptions::default()
    };
    let mut source = FileSource::new(vec![query_path]);
    pseudoalign_to_file(index.dbg(), index.coloring(), &mut source, &out_path, &opts)?;

    let results = parse_results(&std::fs::read_to_string(&out_path)?);
    // Ordered, complete, no duplicates
    assert_eq!(results.len(), queries.len());
    for (i, (id, colors)) in results.iter().enumerate() {
        assert_eq!(*id, i as u64);
        assert_eq!(*colors, index.align(queries[i].as_bytes(), false, 1.0)?);
    }
    Ok(())
}

#[test]
fn test_unsorted_output_is_a_permutation() -> Result<()> {
    let mut rng = SmallRng::seed_from_u64(2);
    let (index, queries) = setup(&mut rng)?;
    let dir = tempfile::tempdir()?;
    let query_path = dir.path().join("queries.fna");
    let out_path = dir.path().join("out.txt");
    write_query_fasta(&query_path, &queries)?;

    let opts = PseudoalignOptions {
        n_threads: 4,
        ..PseudoalignOptions::default()
    };
    let mut source = FileSource::new(vec![query_path]);
    pseudoalign_to_file(index.dbg(), index.coloring(), &mut source, &out_path, &opts)?;

    let mut results = parse_results(&std::fs::read_to_string(&out_path)?);
    results.sort_by_key(|&(id, _)| id);
    assert_eq!(results.len(), queries.len());
    for (i, (id, colors)) in results.iter().enumerate() {
        assert_eq!(*id, i as u64);
        assert_eq!(*colors, index.align(queries[i].as_bytes(), false, 1.0)?);
    }
    Ok(())
}

#[test]
fn test_gzipped_sorted_output() -> Result<()> {
    let mut rng = SmallRng::seed_from_u64(3);
    let (index, queries) = setup(&mut rng)?;
    let dir = tempfile::tempdir()?;
    let query_path = dir.path().join("queries.fna");
    let out_path = dir.path().join("out.txt.gz");
    write_query_fasta(&query_path, &queries)?;

    let opts = PseudoalignOptions {
        n_threads: 2,
        sort_output: true,
        gzip_output: true,
        ..PseudoalignOptions::default()
    };
    let mut source = FileSource::new(vec![query_path]);
    pseudoalign_to_file(index.dbg(), index.coloring(), &mut source, &out_path, &opts)?;

    let mut content = String::new();
    MultiGzDecoder::new(std::fs::File::open(&out_path)?).read_to_string(&mut content)?;
    let results = parse_results(&content);
    assert_eq!(results.len(), queries.len());
    for (i, (id, _)) in results.iter().enumerate() {
        assert_eq!(*id, i as u64);
    }
    Ok(())
}

#[test]
fn test_fastq_queries() -> Result<()> {
    let mut rng = SmallRng::seed_from_u64(4);
    let seqs: Vec<String> = (0..5).map(|_| random_dna(60, &mut rng)).collect();
    let index = build_index(&seqs)?;
    let dir = tempfile::tempdir()?;
    let query_path = dir.path().join("queries.fq");
    let out_path = dir.path().join("out.txt");
    let mut fastq = String::new();
    for (i, q) in seqs.iter().enumerate() {
        fastq.push_str(&format!("@q{}\n{}\n+\n{}\n", i, q, "I".repeat(q.len())));
    }
    std::fs::write(&query_path, fastq)?;

    let opts = PseudoalignOptions {
        n_threads: 2,
        sort_output: true,
        ..PseudoalignOptions::default()
    };
    let mut source = FileSource::new(vec![query_path]);
    pseudoalign_to_file(index.dbg(), index.coloring(), &mut source, &out_path, &opts)?;

    let results = parse_results(&std::fs::read_to_string(&out_path)?);
    for (i, (id, colors)) in results.iter().enumerate() {
        assert_eq!(*id, i as u64);
        assert_eq!(*colors, vec![i as u64]);
    }
    Ok(())
}
