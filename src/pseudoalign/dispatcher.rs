/*
 * SPDX-FileCopyrightText: 2025 Inria
 * SPDX-FileCopyrightText: 2025 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! A producer/worker-pool dispatcher over sequence batches.
//!
//! One producer thread reads the input and pushes batches of
//! concatenated sequences into a bounded channel; `n` workers pop
//! batches and process each sequence with a per-worker callback that
//! owns its own scratch buffers. The channel disconnecting when the
//! producer is done is the queue terminator. Within a worker, sequences
//! are processed in batch order; across workers there is no order, so
//! effects must be associative or be re-ordered downstream.

use crate::seqio::SequenceSource;
use anyhow::Result;
use crossbeam_channel::Sender;

/// A batch of sequences, stored as one concatenation to keep the channel
/// traffic and allocator pressure low.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    /// Global id of the first sequence of the batch.
    pub first_id: usize,
    /// Concatenated sequence bytes.
    pub data: Vec<u8>,
    /// Sequence boundaries: `len + 1` offsets into `data`.
    pub bounds: Vec<usize>,
    /// Optional per-sequence metadata (the builder passes colors here).
    pub meta: Vec<u64>,
}

impl Batch {
    /// The number of sequences in the batch.
    pub fn len(&self) -> usize {
        self.bounds.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates over `(global id, bases)`.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &[u8])> {
        (0..self.len()).map(move |i| {
            (
                self.first_id + i,
                &self.data[self.bounds[i]..self.bounds[i + 1]],
            )
        })
    }

    /// The metadata of the `i`-th sequence of the batch.
    pub fn meta(&self, i: usize) -> u64 {
        self.meta[i]
    }
}

/// Target payload of a batch.
pub const BATCH_BYTES: usize = 1 << 20;

/// Reads every record of `source` and sends it batched into `tx`;
/// `meta` supplies the per-sequence metadata, if any.
pub fn produce_batches(
    source: &mut dyn SequenceSource,
    tx: &Sender<Batch>,
    mut meta: Option<&mut dyn FnMut(usize) -> u64>,
) -> Result<()> {
    let mut batch = Batch::default();
    batch.bounds.push(0);
    source.for_each_record(&mut |id, seq| {
        if batch.is_empty() {
            batch.first_id = id;
        }
        batch.data.extend_from_slice(seq);
        batch.bounds.push(batch.data.len());
        if let Some(meta) = meta.as_mut() {
            batch.meta.push(meta(id));
        }
        if batch.data.len() >= BATCH_BYTES {
            let mut full = std::mem::take(&mut batch);
            full.bounds.shrink_to_fit();
            tx.send(full)
                .map_err(|_| anyhow::anyhow!("All workers exited early"))?;
            batch.bounds.push(0);
        }
        Ok(())
    })?;
    if !batch.is_empty() {
        tx.send(batch)
            .map_err(|_| anyhow::anyhow!("All workers exited early"))?;
    }
    Ok(())
}

/// Runs a producer and `n_workers` per-batch consumers to completion.
///
/// `make_worker` is called once in each worker thread to build the
/// worker's processing closure (and so its thread-local state). The
/// first worker error, if any, is returned; a failing worker drops its
/// channel end, which eventually unblocks the producer.
pub fn run_dispatcher<P, F, W>(n_workers: usize, producer: P, make_worker: F) -> Result<()>
where
    P: FnOnce(Sender<Batch>) -> Result<()> + Send,
    F: Fn(usize) -> W + Sync,
    W: FnMut(Batch) -> Result<()>,
{
    let (tx, rx) = crossbeam_channel::bounded::<Batch>(n_workers.max(1) * 2);
    std::thread::scope(|s| {
        let make_worker = &make_worker;
        let mut workers = Vec::with_capacity(n_workers);
        for w in 0..n_workers.max(1) {
            let rx = rx.clone();
            workers.push(s.spawn(move || -> Result<()> {
                let mut work = make_worker(w);
                for batch in rx {
                    work(batch)?;
                }
                Ok(())
            }));
        }
        drop(rx);
        let producer = s.spawn(move || producer(tx));

        let producer_result = producer.join().expect("Producer thread panicked");
        let mut result = Ok(());
        for w in workers {
            let r = w.join().expect("Worker thread panicked");
            if result.is_ok() {
                result = r;
            }
        }
        // A worker failure is the root cause; the producer only sees the
        // closed channel
        result.and(producer_result)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seqio::MemSource;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[test]
    fn test_all_sequences_processed_once() -> Result<()> {
        let seqs: Vec<Vec<u8>> = (0..500)
            .map(|i| vec![b'A'; 1 + i % 97])
            .collect();
        let mut source = MemSource::new(seqs.clone());
        let seen = Mutex::new(vec![0usize; seqs.len()]);
        run_dispatcher(
            4,
            |tx| produce_batches(&mut source, &tx, None),
            |_| {
                |batch: Batch| {
                    let mut seen = seen.lock().unwrap();
                    for (id, seq) in batch.iter() {
                        seen[id] += 1;
                        assert_eq!(seq.len(), 1 + id % 97);
                    }
                    Ok(())
                }
            },
        )?;
        assert!(seen.lock().unwrap().iter().all(|&c| c == 1));
        Ok(())
    }

    #[test]
    fn test_metadata_follows_sequences() -> Result<()> {
        let seqs: Vec<Vec<u8>> = (0..100).map(|_| b"ACGT".to_vec()).collect();
        let mut source = MemSource::new(seqs);
        let checked = AtomicUsize::new(0);
        run_dispatcher(
            2,
            |tx| produce_batches(&mut source, &tx, Some(&mut |id| id as u64 * 3)),
            |_| {
                |batch: Batch| {
                    for (i, (id, _)) in batch.iter().enumerate() {
                        assert_eq!(batch.meta(i), id as u64 * 3);
                        checked.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(())
                }
            },
        )?;
        assert_eq!(checked.load(Ordering::Relaxed), 100);
        Ok(())
    }

    #[test]
    fn test_worker_error_propagates() {
        let mut source = MemSource::new(vec![b"ACGT".to_vec(); 10]);
        let result = run_dispatcher(
            2,
            |tx| produce_batches(&mut source, &tx, None),
            |_| |_batch: Batch| anyhow::bail!("boom"),
        );
        assert!(result.unwrap_err().to_string().contains("boom"));
    }
}
