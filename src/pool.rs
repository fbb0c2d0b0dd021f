//! The worker pool used for parallel local operations.
//!
//! It is created once, when the cluster is bootstrapped, with an explicit number of threads.
//! Work is handed out in batches pulled from a pipeline's source; at most as many batches as
//! there are workers are held in memory at any time.

use std::sync::mpsc::{channel, sync_channel};

use parking_lot::Mutex;
use scoped_threadpool::Pool;

use crate::source::Split;

pub struct WorkerPool {
    pool: Mutex<Pool>,
    threads: usize,
}

impl WorkerPool {
    pub fn new(threads: usize) -> WorkerPool {
        let threads = threads.max(1);
        WorkerPool {
            pool: Mutex::new(Pool::new(threads as u32)),
            threads: threads,
        }
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Folds `source` in parallel: every batch of `batch` elements is folded from a fresh
    /// `identity()` by one worker, then the partial results are combined on the calling thread.
    /// `acc` and `combiner` must not depend on the order in which they are applied.
    pub fn fold<T, U, I, Id, Acc, Comb>(&self,
                                       source: &mut I,
                                       batch: usize,
                                       identity: Id,
                                       acc: Acc,
                                       combiner: Comb)
                                       -> U
        where T: Send,
              U: Send,
              I: Iterator<Item = T> + ?Sized,
              Id: Fn() -> U + Sync,
              Acc: Fn(U, T) -> U + Sync,
              Comb: Fn(U, U) -> U
    {
        let (tokens, token_recv) = sync_channel(self.threads);
        let (results, result_recv) = channel();

        for _ in 0..self.threads {
            let _ = tokens.send(true);
        }

        let identity = &identity;
        let acc = &acc;

        let mut pool = self.pool.lock();
        pool.scoped(|scope| {
            loop {
                let _ = token_recv.recv();

                let items = match source.split(batch) {
                    None => break,
                    Some(items) => items,
                };
                let done = tokens.clone();
                let out = results.clone();

                scope.execute(move || {
                    let _ = out.send(items.fold(identity(), acc));
                    let _ = done.send(true);
                });
            }
            scope.join_all();
        });
        drop(results);

        result_recv.into_iter().fold(identity(), combiner)
    }
}
