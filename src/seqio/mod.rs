/*
 * SPDX-FileCopyrightText: 2025 Inria
 * SPDX-FileCopyrightText: 2025 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Sequence input: FASTA/FASTQ parsing (plain or gzipped), format
//! sniffing, non-nucleotide handling policies, and the colors file.
//!
//! Bases are upper-cased on input. What happens to characters outside
//! `{A, C, G, T}` is a build option: either sequences are split at them
//! (each maximal clean run is indexed on its own), or they are replaced
//! up front by random nucleotides compatible with their IUPAC meaning,
//! with a seeded generator so builds are reproducible.

mod colors;
pub use colors::*;

use anyhow::{bail, Context, Result};
use flate2::read::MultiGzDecoder;
use rand::prelude::*;
use rand::rngs::SmallRng;
use seq_io::fasta::Record as _;
use seq_io::fastq::Record as _;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Sequence file formats, sniffed from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqFormat {
    Fasta,
    Fastq,
}

/// Determines the format of `path` and whether it is gzipped.
pub fn sniff_format(path: &Path) -> Result<(SeqFormat, bool)> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("Bad file name: {}", path.display()))?;
    let (name, gzip) = match name.strip_suffix(".gz") {
        Some(stem) => (stem, true),
        None => (name, false),
    };
    let format = match name.rsplit('.').next() {
        Some("fasta" | "fna" | "ffn" | "faa" | "frn" | "fa") => SeqFormat::Fasta,
        Some("fastq" | "fq") => SeqFormat::Fastq,
        _ => bail!(
            "Unknown sequence file extension: {} (expected .fasta/.fna/.ffn/.faa/.frn/.fa or .fastq/.fq, optionally .gz)",
            path.display()
        ),
    };
    Ok((format, gzip))
}

enum Inner {
    Fasta(seq_io::fasta::Reader<Box<dyn Read + Send>>),
    Fastq(seq_io::fastq::Reader<Box<dyn Read + Send>>),
}

/// A reader over one sequence file, yielding upper-cased records.
pub struct SeqFileReader {
    inner: Inner,
}

impl SeqFileReader {
    pub fn open(path: &Path) -> Result<Self> {
        let (format, gzip) = sniff_format(path)?;
        let file =
            File::open(path).with_context(|| format!("Could not open {}", path.display()))?;
        let read: Box<dyn Read + Send> = if gzip {
            Box::new(MultiGzDecoder::new(file))
        } else {
            Box::new(file)
        };
        let inner = match format {
            SeqFormat::Fasta => Inner::Fasta(seq_io::fasta::Reader::new(read)),
            SeqFormat::Fastq => Inner::Fastq(seq_io::fastq::Reader::new(read)),
        };
        Ok(SeqFileReader { inner })
    }

    /// Reads the next record into `seq` (replaced), upper-casing bases.
    /// Returns `false` at end of file.
    pub fn next_record(&mut self, seq: &mut Vec<u8>) -> Result<bool> {
        seq.clear();
        match &mut self.inner {
            Inner::Fasta(reader) => match reader.next() {
                None => Ok(false),
                Some(record) => {
                    let record = record.context("Malformed FASTA record")?;
                    for line in record.seq_lines() {
                        seq.extend(line.iter().map(u8::to_ascii_uppercase));
                    }
                    Ok(true)
                }
            },
            Inner::Fastq(reader) => match reader.next() {
                None => Ok(false),
                Some(record) => {
                    let record = record.context("Malformed FASTQ record")?;
                    seq.extend(record.seq().iter().map(u8::to_ascii_uppercase));
                    Ok(true)
                }
            },
        }
    }
}

/// A source of sequence records that can be iterated several times.
///
/// The build pipeline scans the input once per stage (k-mer collection,
/// core marking, color-pair emission), so a source must be re-iterable;
/// file-backed sources simply reopen their files. Sources cross into
/// the producer thread of the dispatcher, hence the `Send` bound.
pub trait SequenceSource: Send {
    /// Calls `f` with `(record index, bases)` for every record, in
    /// order. Record indices are consecutive across files.
    fn for_each_record(
        &mut self,
        f: &mut dyn FnMut(usize, &[u8]) -> Result<()>,
    ) -> Result<()>;
}

/// A source reading (and re-reading) sequence files.
pub struct FileSource {
    paths: Vec<PathBuf>,
}

impl FileSource {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        FileSource { paths }
    }
}

impl SequenceSource for FileSource {
    fn for_each_record(
        &mut self,
        f: &mut dyn FnMut(usize, &[u8]) -> Result<()>,
    ) -> Result<()> {
        let mut id = 0;
        let mut seq = Vec::new();
        for path in &self.paths {
            let mut reader = SeqFileReader::open(path)?;
            while reader
                .next_record(&mut seq)
                .with_context(|| format!("In {}", path.display()))?
            {
                f(id, &seq)?;
                id += 1;
            }
        }
        Ok(())
    }
}

/// An in-memory source, mostly for tests and library use.
pub struct MemSource {
    seqs: Vec<Vec<u8>>,
}

impl MemSource {
    pub fn new(seqs: Vec<Vec<u8>>) -> Self {
        MemSource { seqs }
    }
}

impl SequenceSource for MemSource {
    fn for_each_record(
        &mut self,
        f: &mut dyn FnMut(usize, &[u8]) -> Result<()>,
    ) -> Result<()> {
        for (id, seq) in self.seqs.iter().enumerate() {
            f(id, seq)?;
        }
        Ok(())
    }
}

/// How to handle bases outside `{A, C, G, T}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonAcgtPolicy {
    /// Split the sequence at each offending character; the pieces share
    /// the sequence's color.
    DeleteSplit,
    /// Replace each offending character by a random nucleotide drawn
    /// among those its IUPAC code stands for, using the given seed.
    Randomize { seed: u64 },
}

/// Maximal runs of clean nucleotides of `seq`, in order.
pub fn split_parts(seq: &[u8]) -> impl Iterator<Item = &[u8]> {
    seq.split(|&b| !matches!(b, b'A' | b'C' | b'G' | b'T'))
        .filter(|part| !part.is_empty())
}

/// Replaces a non-nucleotide (upper-case) base by a random compatible
/// nucleotide; `U` reads as `T`.
fn fix_char(b: u8, rng: &mut SmallRng) -> u8 {
    let choices: &[u8] = match b {
        b'A' | b'C' | b'G' | b'T' => return b,
        b'U' => return b'T',
        b'R' => b"AG",
        b'Y' => b"CT",
        b'K' => b"GT",
        b'M' => b"AC",
        b'S' => b"CG",
        b'W' => b"AT",
        b'B' => b"CGT",
        b'D' => b"AGT",
        b'H' => b"ACT",
        b'V' => b"ACG",
        _ => b"ACGT",
    };
    choices[rng.random_range(0..choices.len())]
}

/// Applies [`fix_char`] to a whole sequence in place.
pub fn fix_alphabet(seq: &mut [u8], rng: &mut SmallRng) {
    for b in seq.iter_mut() {
        *b = fix_char(*b, rng);
    }
}

/// Materializes a randomization-fixed copy of `source` as a temporary
/// FASTA file, so that every later pass over the input sees the same
/// replacement bases.
pub fn fix_source_to_temp(source: &mut dyn SequenceSource, seed: u64) -> Result<PathBuf> {
    let path = crate::temp::get().create_path("fixed-").with_extension("fna");
    let mut out = BufWriter::new(
        File::create(&path).with_context(|| format!("Could not create {}", path.display()))?,
    );
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut buf = Vec::new();
    source.for_each_record(&mut |id, seq| {
        buf.clear();
        buf.extend_from_slice(seq);
        fix_alphabet(&mut buf, &mut rng);
        writeln!(out, ">{}", id)?;
        out.write_all(&buf)?;
        writeln!(out)?;
        Ok(())
    })?;
    out.flush().context("Could not flush the fixed sequences")?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_format() {
        let ok = |name: &str| sniff_format(Path::new(name)).unwrap();
        assert_eq!(ok("x.fasta"), (SeqFormat::Fasta, false));
        assert_eq!(ok("x.fna.gz"), (SeqFormat::Fasta, true));
        assert_eq!(ok("dir.weird/x.fq"), (SeqFormat::Fastq, false));
        assert_eq!(ok("x.fastq.gz"), (SeqFormat::Fastq, true));
        assert!(sniff_format(Path::new("x.txt")).is_err());
        assert!(sniff_format(Path::new("x.gz")).is_err());
    }

    #[test]
    fn test_split_parts() {
        let parts: Vec<&[u8]> = split_parts(b"ACGTNNGG-T").collect();
        assert_eq!(parts, vec![&b"ACGT"[..], &b"GG"[..], &b"T"[..]]);
        assert_eq!(split_parts(b"NNN").count(), 0);
        let whole: Vec<&[u8]> = split_parts(b"ACGT").collect();
        assert_eq!(whole, vec![&b"ACGT"[..]]);
    }

    #[test]
    fn test_fix_alphabet_is_deterministic() {
        let mut a = b"ACGNNRYU".to_vec();
        let mut b = a.clone();
        fix_alphabet(&mut a, &mut SmallRng::seed_from_u64(1));
        fix_alphabet(&mut b, &mut SmallRng::seed_from_u64(1));
        assert_eq!(a, b);
        assert!(a.iter().all(|c| matches!(c, b'A' | b'C' | b'G' | b'T')));
        assert_eq!(&a[..3], b"ACG");
        assert_eq!(a[7], b'T'); // U always becomes T
    }

    #[test]
    fn test_fasta_reading() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("test.fa");
        std::fs::write(&path, ">a desc\nacgt\nACGT\n>b\nTTTT\n")?;
        let mut reader = SeqFileReader::open(&path)?;
        let mut seq = Vec::new();
        assert!(reader.next_record(&mut seq)?);
        assert_eq!(seq, b"ACGTACGT");
        assert!(reader.next_record(&mut seq)?);
        assert_eq!(seq, b"TTTT");
        assert!(!reader.next_record(&mut seq)?);
        Ok(())
    }

    #[test]
    fn test_fastq_gzip_reading() -> Result<()> {
        use flate2::write::GzEncoder;
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("test.fq.gz");
        let mut enc = GzEncoder::new(File::create(&path)?, flate2::Compression::default());
        enc.write_all(b"@r1\nACGTA\n+\nIIIII\n@r2\nggg\n+\nIII\n")?;
        enc.finish()?;
        let mut reader = SeqFileReader::open(&path)?;
        let mut seq = Vec::new();
        assert!(reader.next_record(&mut seq)?);
        assert_eq!(seq, b"ACGTA");
        assert!(reader.next_record(&mut seq)?);
        assert_eq!(seq, b"GGG");
        assert!(!reader.next_record(&mut seq)?);
        Ok(())
    }

    #[test]
    fn test_file_source_counts_across_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let p1 = dir.path().join("a.fa");
        let p2 = dir.path().join("b.fa");
        std::fs::write(&p1, ">x\nAAAA\n")?;
        std::fs::write(&p2, ">y\nCCCC\n>z\nGGGG\n")?;
        let mut source = FileSource::new(vec![p1, p2]);
        let mut ids = Vec::new();
        source.for_each_record(&mut |id, seq| {
            ids.push((id, seq.to_vec()));
            Ok(())
        })?;
        assert_eq!(
            ids,
            vec![
                (0, b"AAAA".to_vec()),
                (1, b"CCCC".to_vec()),
                (2, b"GGGG".to_vec())
            ]
        );
        Ok(())
    }
}
