/*
 * SPDX-FileCopyrightText: 2025 Inria
 * SPDX-FileCopyrightText: 2025 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use anyhow::Result;
use cdbg::index::ColoredDbg;
use clap::{ArgMatches, Args, Command, FromArgMatches};
use std::path::PathBuf;

pub const COMMAND_NAME: &str = "stats";

#[derive(Args, Debug, Clone)]
#[command(about = "Prints summary statistics of a built index.", long_about = None)]
pub struct CliArgs {
    /// Prefix of the index files written by build.
    #[arg(short, long)]
    pub index_prefix: PathBuf,
}

pub fn cli(command: Command) -> Command {
    command.subcommand(CliArgs::augment_args(Command::new(COMMAND_NAME)).display_order(2))
}

pub fn main(submatches: &ArgMatches) -> Result<()> {
    let args = CliArgs::from_arg_matches(submatches)?;
    let index = ColoredDbg::load(&args.index_prefix)?;

    println!("k: {}", index.dbg().k());
    println!("colex slots: {}", index.dbg().num_sets());
    println!("k-mers: {}", index.dbg().num_kmers());
    println!("distinct color sets: {}", index.coloring().num_color_sets());
    println!("largest color: {}", index.coloring().largest_color());
    println!(
        "sum of color set lengths: {}",
        index.coloring().total_color_set_length()
    );
    println!("space breakdown (bytes):");
    for (component, bytes) in index.coloring().space_breakdown()? {
        println!("  {}: {}", component, bytes);
    }
    Ok(())
}
