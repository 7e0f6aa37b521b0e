/*
 * SPDX-FileCopyrightText: 2025 Inria
 * SPDX-FileCopyrightText: 2025 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use anyhow::{ensure, Result};
use cdbg::index::ColoredDbg;
use cdbg::pseudoalign::{pseudoalign_to_file, PseudoalignOptions};
use cdbg::seqio::FileSource;
use cdbg::temp;
use clap::{ArgMatches, Args, Command, FromArgMatches};
use log::info;
use std::path::PathBuf;

pub const COMMAND_NAME: &str = "pseudoalign";

#[derive(Args, Debug, Clone)]
#[command(about = "Aligns query sequences against a built index.", long_about = None)]
pub struct CliArgs {
    /// Prefix of the index files written by build.
    #[arg(short, long)]
    pub index_prefix: PathBuf,

    /// Query file(s), FASTA or FASTQ, optionally gzipped.
    #[arg(short, long, required = true, num_args = 1..)]
    pub query_file: Vec<PathBuf>,

    /// Output file(s), one per query file.
    #[arg(short, long, required = true, num_args = 1..)]
    pub outfile: Vec<PathBuf>,

    /// Also match the reverse complement of every query.
    #[arg(long)]
    pub rc: bool,

    /// Fraction of k-mers that must carry a color for it to be
    /// reported; 1 is plain intersection.
    #[arg(long, default_value_t = 1.0)]
    pub threshold: f64,

    /// Write output lines in ascending query-id order.
    #[arg(long)]
    pub sort_output: bool,

    /// Gzip the output.
    #[arg(long)]
    pub gzip_output: bool,

    /// Number of worker threads; 0 means all cores.
    #[arg(short = 't', long, default_value_t = 0)]
    pub threads: usize,

    /// Directory for temporary files.
    #[arg(long)]
    pub temp_dir: Option<PathBuf>,
}

pub fn cli(command: Command) -> Command {
    command.subcommand(CliArgs::augment_args(Command::new(COMMAND_NAME)).display_order(1))
}

pub fn main(submatches: &ArgMatches) -> Result<()> {
    let args = CliArgs::from_arg_matches(submatches)?;

    ensure!(
        args.query_file.len() == args.outfile.len(),
        "{} query files but {} output files",
        args.query_file.len(),
        args.outfile.len()
    );
    if let Some(dir) = &args.temp_dir {
        ensure!(
            dir.is_dir(),
            "Temporary directory {} does not exist",
            dir.display()
        );
        temp::init(dir)?;
    }

    info!("Loading the index");
    let index = ColoredDbg::load(&args.index_prefix)?;

    let opts = PseudoalignOptions {
        n_threads: if args.threads == 0 {
            num_cpus::get()
        } else {
            args.threads
        },
        reverse_complements: args.rc,
        threshold: args.threshold,
        sort_output: args.sort_output,
        gzip_output: args.gzip_output,
    };

    for (query, out) in args.query_file.iter().zip(&args.outfile) {
        info!("Aligning {} into {}", query.display(), out.display());
        let mut source = FileSource::new(vec![query.clone()]);
        pseudoalign_to_file(index.dbg(), index.coloring(), &mut source, out, &opts)?;
    }
    Ok(())
}
