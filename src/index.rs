/*
 * SPDX-FileCopyrightText: 2025 Inria
 * SPDX-FileCopyrightText: 2025 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The colored de Bruijn graph index: graph plus coloring, with build,
//! save and load entry points.
//!
//! The index persists as two files, `<prefix>.tdbg` (the graph, with
//! fixed magic bytes) and `<prefix>.tcolors` (the coloring, led by its
//! versioned tag).

use crate::color::{build_coloring, Coloring};
use crate::dbg::{collect_kmers, SbwtDbg};
use crate::kmer::reverse_complement;
use crate::pseudoalign::pseudoalign_query;
use crate::seqio::{
    fix_source_to_temp, split_parts, FileSource, NonAcgtPolicy, SequenceSource,
};
use crate::ser;
use anyhow::{ensure, Context, Result};
use log::info;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

const DBG_MAGIC: &[u8; 8] = b"SBWTDBG1";

/// Extension of the serialized graph.
pub const DBG_EXTENSION: &str = ".tdbg";
/// Extension of the serialized coloring.
pub const COLORS_EXTENSION: &str = ".tcolors";

/// Build-time options.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// The k-mer length.
    pub k: usize,
    /// Also index the reverse complement of every sequence.
    pub reverse_complements: bool,
    /// What to do with non-nucleotide characters.
    pub non_acgt: NonAcgtPolicy,
    /// Store a color-set pointer at every `d`-th node of otherwise
    /// pointer-free stretches; queries walk at most `d` edges.
    pub sampling_distance: usize,
    /// Memory budget of the external sorts.
    pub mem_bytes: usize,
    pub n_threads: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        BuildOptions {
            k: 31,
            reverse_complements: false,
            non_acgt: NonAcgtPolicy::DeleteSplit,
            sampling_distance: 1,
            mem_bytes: 1 << 31,
            n_threads: num_cpus::get(),
        }
    }
}

/// A built (or loaded) colored de Bruijn graph index.
pub struct ColoredDbg {
    dbg: SbwtDbg,
    coloring: Coloring,
}

impl ColoredDbg {
    /// Builds the index over the sequences of `source`.
    ///
    /// `colors` gives one color per sequence record; `None` assigns
    /// colors 0, 1, 2, … in input order.
    pub fn build(
        source: &mut dyn SequenceSource,
        colors: Option<Vec<u64>>,
        opts: &BuildOptions,
    ) -> Result<Self> {
        // Under the randomization policy the replacement bases must be
        // identical in every pass, so the fixed input is materialized
        // once up front.
        let mut fixed_source;
        let source: &mut dyn SequenceSource = match opts.non_acgt {
            NonAcgtPolicy::DeleteSplit => source,
            NonAcgtPolicy::Randomize { seed } => {
                info!("Replacing non-nucleotide characters");
                fixed_source = FileSource::new(vec![fix_source_to_temp(source, seed)?]);
                &mut fixed_source
            }
        };

        info!("Collecting distinct k-mers");
        let mut kmers = HashSet::new();
        let mut n_records = 0usize;
        source.for_each_record(&mut |id, seq| {
            n_records = id + 1;
            for part in split_parts(seq) {
                collect_kmers(part, opts.k, &mut kmers)?;
                if opts.reverse_complements {
                    collect_kmers(&reverse_complement(part), opts.k, &mut kmers)?;
                }
            }
            Ok(())
        })?;

        let colors = match colors {
            Some(colors) => {
                ensure!(
                    colors.len() == n_records,
                    "{} colors given for {} sequences",
                    colors.len(),
                    n_records
                );
                colors
            }
            None => (0..n_records as u64).collect(),
        };

        let dbg = SbwtDbg::from_kmer_set(kmers, opts.k)?;
        info!(
            "Graph built: {} k-mers in {} colex slots",
            dbg.num_kmers(),
            dbg.num_sets()
        );

        let coloring = build_coloring(
            &dbg,
            source,
            &colors,
            opts.reverse_complements,
            opts.sampling_distance,
            opts.mem_bytes,
            opts.n_threads,
        )?;

        Ok(ColoredDbg { dbg, coloring })
    }

    pub fn dbg(&self) -> &SbwtDbg {
        &self.dbg
    }

    pub fn coloring(&self) -> &Coloring {
        &self.coloring
    }

    /// The colors of a query: intersection for `threshold` 1, majority
    /// vote otherwise.
    pub fn align(
        &self,
        query: &[u8],
        reverse_complements: bool,
        threshold: f64,
    ) -> Result<Vec<u64>> {
        pseudoalign_query(&self.dbg, &self.coloring, query, reverse_complements, threshold)
    }

    /// The colors of the node's k-mer.
    pub fn color_set_of_node(&self, node: usize) -> Result<Vec<u64>> {
        Ok(self
            .coloring
            .color_set_of_node(node, &self.dbg)?
            .to_vec())
    }

    pub fn save(&self, prefix: &Path) -> Result<()> {
        let dbg_path = with_suffix(prefix, DBG_EXTENSION);
        let mut w = BufWriter::new(
            File::create(&dbg_path)
                .with_context(|| format!("Could not create {}", dbg_path.display()))?,
        );
        ser::write_magic(&mut w, DBG_MAGIC)?;
        self.dbg.serialize(&mut w)?;
        w.flush()?;

        let colors_path = with_suffix(prefix, COLORS_EXTENSION);
        let mut w = BufWriter::new(
            File::create(&colors_path)
                .with_context(|| format!("Could not create {}", colors_path.display()))?,
        );
        self.coloring.serialize(&mut w)?;
        w.flush()?;
        info!(
            "Index written to {} and {}",
            dbg_path.display(),
            colors_path.display()
        );
        Ok(())
    }

    pub fn load(prefix: &Path) -> Result<Self> {
        let dbg_path = with_suffix(prefix, DBG_EXTENSION);
        let mut r = BufReader::new(
            File::open(&dbg_path)
                .with_context(|| format!("Could not open {}", dbg_path.display()))?,
        );
        ser::check_magic(&mut r, DBG_MAGIC)
            .with_context(|| format!("{} is not a graph file", dbg_path.display()))?;
        let dbg = SbwtDbg::load(&mut r)?;

        let colors_path = with_suffix(prefix, COLORS_EXTENSION);
        let mut r = BufReader::new(
            File::open(&colors_path)
                .with_context(|| format!("Could not open {}", colors_path.display()))?,
        );
        let coloring = Coloring::load(&mut r)
            .with_context(|| format!("Could not load {}", colors_path.display()))?;
        Ok(ColoredDbg { dbg, coloring })
    }
}

/// `prefix` with `suffix` appended to its file name.
fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut os = prefix.as_os_str().to_owned();
    os.push(suffix);
    PathBuf::from(os)
}
