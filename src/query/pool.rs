//! The worker pool and query coordination.
//!
//! A fixed set of worker threads drains a shared work queue of
//! `(searcher, chunk)` tasks. Each worker owns a reusable candidate
//! buffer sized for the filtered walk, so chunk searches allocate
//! nothing per task. After finishing a chunk the worker pushes a
//! completion sentinel onto the query's result queue; the coordinator
//! drains results until every chunk has reported in. A `None` task shuts
//! a worker down, which `Drop` sends once per thread.

use crate::index::build::Corpus;
use crate::index::types::{ChunkId, MIN_FILTER_RATIO};
use crate::query::searcher::{MatchResult, SearchOpts, SearchStats, Searcher};
use anyhow::Result;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

type Task = Option<(Arc<Searcher>, ChunkId)>;

pub struct SearchPool {
    corpus: Arc<Corpus>,
    work_tx: Sender<Task>,
    workers: Vec<JoinHandle<()>>,
}

impl SearchPool {
    /// Spin up `threads` workers over `corpus`; `0` means one per
    /// available core.
    pub fn new(corpus: Arc<Corpus>, threads: usize) -> SearchPool {
        let threads = if threads == 0 {
            thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        } else {
            threads
        };
        let (work_tx, work_rx) = channel::<Task>();
        let work_rx = Arc::new(Mutex::new(work_rx));
        let scratch_cap = corpus.chunk_capacity() / MIN_FILTER_RATIO;

        let workers = (0..threads)
            .map(|_| {
                let rx = Arc::clone(&work_rx);
                thread::spawn(move || worker_loop(rx, scratch_cap))
            })
            .collect();

        SearchPool {
            corpus,
            work_tx,
            workers,
        }
    }

    /// Run one query, invoking `cb` for each result as it arrives.
    /// Results from a single chunk arrive in ascending byte order;
    /// across chunks the interleaving is unspecified.
    pub fn search_with<F>(
        &self,
        pattern: &str,
        file_pattern: Option<&str>,
        opts: &SearchOpts,
        mut cb: F,
    ) -> Result<SearchStats>
    where
        F: FnMut(MatchResult),
    {
        let (tx, rx) = channel::<Option<MatchResult>>();
        let searcher = Arc::new(Searcher::new(
            Arc::clone(&self.corpus),
            pattern,
            file_pattern,
            opts,
            tx,
        )?);

        if !opts.perform_search {
            return Ok(searcher.stats(0));
        }

        let chunks = self.corpus.num_chunks();
        for cid in 0..chunks {
            self.work_tx
                .send(Some((Arc::clone(&searcher), cid as ChunkId)))
                .expect("search pool has shut down");
        }

        let mut pending = chunks;
        let mut matches = 0usize;
        while pending > 0 {
            match rx.recv().expect("search workers hung up") {
                Some(m) => {
                    matches += 1;
                    cb(m);
                }
                None => pending -= 1,
            }
        }

        Ok(searcher.stats(matches))
    }

    /// Run one query and collect every result.
    pub fn search(
        &self,
        pattern: &str,
        file_pattern: Option<&str>,
        opts: &SearchOpts,
    ) -> Result<(Vec<MatchResult>, SearchStats)> {
        let mut out = Vec::new();
        let stats = self.search_with(pattern, file_pattern, opts, |m| out.push(m))?;
        Ok((out, stats))
    }

    pub fn corpus(&self) -> &Arc<Corpus> {
        &self.corpus
    }
}

impl Drop for SearchPool {
    fn drop(&mut self) {
        for _ in &self.workers {
            let _ = self.work_tx.send(None);
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(rx: Arc<Mutex<Receiver<Task>>>, scratch_cap: usize) {
    let mut scratch: Vec<u32> = Vec::with_capacity(scratch_cap);
    loop {
        let task = rx.lock().unwrap().recv();
        match task {
            Ok(Some((searcher, cid))) => {
                searcher.search_chunk(cid, &mut scratch);
                searcher.finish_chunk();
            }
            Ok(None) | Err(_) => break,
        }
    }
}
