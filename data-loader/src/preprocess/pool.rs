//! Fixed-size OS thread worker pool
//!
//! Tasks are pushed into a pre-sized queue which is closed before any worker
//! starts, so workers exit once the queue drains. Each result is written to
//! the slot matching its task index, which keeps the output in input order
//! without a shared, lock-guarded collection.

use crossbeam_channel::bounded;
use std::thread;

/// Default pool size: twice the number of logical CPUs
pub fn default_pool_size() -> usize {
    num_cpus::get() * 2
}

/// Fixed-size pool of scoped worker threads
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    size: usize,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(default_pool_size())
    }
}

impl WorkerPool {
    /// Create a pool with `size` workers (at least one)
    pub fn new(size: usize) -> Self {
        Self { size: size.max(1) }
    }

    /// Number of workers
    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `work` over every task and return the results in task order.
    ///
    /// Blocks until every worker has drained the queue. A panic inside `work`
    /// is propagated to the caller once all workers have stopped.
    pub fn run<T, R, F>(&self, tasks: Vec<T>, work: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Sync,
    {
        let total = tasks.len();
        if total == 0 {
            return Vec::new();
        }

        let (queue_tx, queue_rx) = bounded::<(usize, T)>(total);
        for task in tasks.into_iter().enumerate() {
            // Capacity equals task count, so this never blocks
            if queue_tx.send(task).is_err() {
                break;
            }
        }
        drop(queue_tx);

        let workers = self.size.min(total);
        let work = &work;

        let batches: Vec<Vec<(usize, R)>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    let queue = queue_rx.clone();
                    scope.spawn(move || {
                        let mut done = Vec::new();
                        while let Ok((index, task)) = queue.recv() {
                            done.push((index, work(task)));
                        }
                        done
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|h| match h.join() {
                    Ok(done) => done,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        });

        let mut slots: Vec<Option<R>> = (0..total).map(|_| None).collect();
        for (index, result) in batches.into_iter().flatten() {
            slots[index] = Some(result);
        }

        slots.into_iter().flatten().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_results_keep_task_order() {
        let pool = WorkerPool::new(4);
        let out = pool.run((0..100).collect(), |n: u32| n * 2);
        assert_eq!(out, (0..100).map(|n| n * 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_every_task_runs_once() {
        let pool = WorkerPool::new(8);
        let calls = AtomicUsize::new(0);

        let out = pool.run(vec![(); 37], |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(out.len(), 37);
        assert_eq!(calls.load(Ordering::SeqCst), 37);
    }

    #[test]
    fn test_never_exceeds_pool_size() {
        let pool = WorkerPool::new(3);
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        pool.run((0..24).collect::<Vec<u32>>(), |_| {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(2));
            active.fetch_sub(1, Ordering::SeqCst);
        });

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_empty_task_list() {
        let pool = WorkerPool::new(2);
        let out: Vec<u8> = pool.run(Vec::<u8>::new(), |n| n);
        assert!(out.is_empty());
    }

    #[test]
    fn test_zero_size_is_clamped() {
        assert_eq!(WorkerPool::new(0).size(), 1);
        assert_eq!(WorkerPool::default().size(), num_cpus::get() * 2);
    }
}
