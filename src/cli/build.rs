/*
 * SPDX-FileCopyrightText: 2025 Inria
 * SPDX-FileCopyrightText: 2025 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use anyhow::{ensure, Context, Result};
use cdbg::index::{BuildOptions, ColoredDbg};
use cdbg::kmer::MAX_K;
use cdbg::seqio::{parse_color_file, FileSource, NonAcgtPolicy};
use cdbg::temp;
use clap::{ArgMatches, Args, Command, FromArgMatches};
use std::path::PathBuf;

pub const COMMAND_NAME: &str = "build";

#[derive(Args, Debug, Clone)]
#[command(about = "Builds a colored de Bruijn graph index from reference sequences.", long_about = None)]
pub struct CliArgs {
    /// Input sequence file(s), FASTA or FASTQ, optionally gzipped.
    #[arg(short, long, required = true, num_args = 1..)]
    pub input: Vec<PathBuf>,

    /// Colors file: one integer per input sequence, in order. Without
    /// it, sequence i gets color i.
    #[arg(short, long)]
    pub color_file: Option<PathBuf>,

    /// Prefix of the output index files (<prefix>.tdbg, <prefix>.tcolors).
    #[arg(short = 'o', long)]
    pub index_prefix: PathBuf,

    /// The k-mer length.
    #[arg(short)]
    pub k: usize,

    /// Also index the reverse complement of every sequence.
    #[arg(long)]
    pub reverse_complements: bool,

    /// Replace non-ACGT characters by random compatible nucleotides
    /// instead of splitting the sequences at them.
    #[arg(long)]
    pub randomize_non_acgt: bool,

    /// Seed of the replacement generator.
    #[arg(long, default_value_t = 1, requires = "randomize_non_acgt")]
    pub random_seed: u64,

    /// Store a color-set pointer at every d-th node; larger values
    /// shrink the index and slow queries down.
    #[arg(short = 'd', long, default_value_t = 1)]
    pub sampling_distance: usize,

    /// Memory budget of the external sorts, in megabytes.
    #[arg(long, default_value_t = 2048)]
    pub mem_megas: usize,

    /// Number of worker threads; 0 means all cores.
    #[arg(short = 't', long, default_value_t = 0)]
    pub threads: usize,

    /// Directory for temporary files.
    #[arg(long)]
    pub temp_dir: Option<PathBuf>,
}

pub fn cli(command: Command) -> Command {
    command.subcommand(CliArgs::augment_args(Command::new(COMMAND_NAME)).display_order(0))
}

pub fn main(submatches: &ArgMatches) -> Result<()> {
    let args = CliArgs::from_arg_matches(submatches)?;

    ensure!(
        (1..=MAX_K).contains(&args.k),
        "k must be between 1 and {}",
        MAX_K
    );
    if let Some(dir) = &args.temp_dir {
        ensure!(
            dir.is_dir(),
            "Temporary directory {} does not exist",
            dir.display()
        );
        temp::init(dir)?;
    }

    let colors = args
        .color_file
        .as_deref()
        .map(parse_color_file)
        .transpose()
        .context("Could not parse the colors file")?;

    let opts = BuildOptions {
        k: args.k,
        reverse_complements: args.reverse_complements,
        non_acgt: if args.randomize_non_acgt {
            NonAcgtPolicy::Randomize {
                seed: args.random_seed,
            }
        } else {
            NonAcgtPolicy::DeleteSplit
        },
        sampling_distance: args.sampling_distance,
        mem_bytes: args.mem_megas << 20,
        n_threads: if args.threads == 0 {
            num_cpus::get()
        } else {
            args.threads
        },
    };

    let mut source = FileSource::new(args.input);
    let index = ColoredDbg::build(&mut source, colors, &opts)?;
    index.save(&args.index_prefix)?;
    Ok(())
}
