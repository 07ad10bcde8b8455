//! Parallel batch execution.
//!
//! Every stage is a map over independent items (a song, a file, an artist). Tasks run on a rayon
//! pool in no particular order; a task that fails is retried, and one that keeps failing is logged
//! and dropped without stopping its siblings.

use std::{
    fmt::Debug,
    panic::{AssertUnwindSafe, catch_unwind},
};

use anyhow::anyhow;
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use rand::{SeedableRng, rngs::StdRng};
use rayon::{
    ThreadPool, ThreadPoolBuilder,
    iter::{IntoParallelIterator, ParallelIterator},
};
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

/// Outcome of a batch. Failed items are listed by their debug representation.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub succeeded: usize,
    pub failed: Vec<String>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed.len()
    }
}

pub struct WorkerPool {
    pool: ThreadPool,
    retries: usize,
}

fn progress_bar(len: usize, name: &str) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} {prefix:20.bold.dim} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.set_prefix(name.to_string());
    pb
}

impl WorkerPool {
    /// `num_threads == 0` lets rayon pick one thread per core.
    pub fn new(num_threads: usize, retries: usize) -> anyhow::Result<Self> {
        let pool = ThreadPoolBuilder::new().num_threads(num_threads).build()?;
        Ok(Self { pool, retries })
    }

    /// Runs `task` over all items. Never fails as a whole.
    pub fn run<T, F>(&self, name: &str, items: Vec<T>, task: F) -> BatchReport
    where
        T: Send + Debug,
        F: Fn(&T) -> anyhow::Result<()> + Sync + Send,
    {
        self.run_with_retries(name, items, self.retries, task)
    }

    /// Like `run`, for tasks that bring their own retry policy.
    pub fn run_with_retries<T, F>(
        &self,
        name: &str,
        items: Vec<T>,
        retries: usize,
        task: F,
    ) -> BatchReport
    where
        T: Send + Debug,
        F: Fn(&T) -> anyhow::Result<()> + Sync + Send,
    {
        info!("{}: {} items", name, items.len());
        let pb = progress_bar(items.len(), name);

        let outcomes: Vec<Option<String>> = self.pool.install(|| {
            items
                .into_par_iter()
                .progress_with(pb.clone())
                .map(|item| match attempt_task(name, &item, retries, &task) {
                    Ok(()) => None,
                    Err(e) => {
                        error!("{}: abandoning {:?}: {:?}", name, item, e);
                        Some(format!("{:?}", item))
                    }
                })
                .collect()
        });
        pb.finish_and_clear();

        let mut report = BatchReport::default();
        for outcome in outcomes {
            match outcome {
                None => report.succeeded += 1,
                Some(item) => report.failed.push(item),
            }
        }
        info!(
            "{}: {} succeeded, {} failed",
            name,
            report.succeeded,
            report.failed.len()
        );
        report
    }
}

/// Generator for one task, derived from the run seed and the task's key so that the draws do not
/// depend on which thread picks the task up or when.
pub fn task_rng(seed: u64, key: &str) -> StdRng {
    StdRng::from_seed(task_seed(seed, key))
}

/// SHA-256 of the little-endian seed followed by the key bytes.
pub fn task_seed(seed: u64, key: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(seed.to_le_bytes());
    hasher.update(key.as_bytes());
    hasher.finalize().into()
}

fn attempt_task<T, F>(name: &str, item: &T, retries: usize, task: &F) -> anyhow::Result<()>
where
    T: Debug,
    F: Fn(&T) -> anyhow::Result<()>,
{
    let mut attempt = 0;
    loop {
        // A panic is a broken invariant for this item only.
        let result = catch_unwind(AssertUnwindSafe(|| task(item)))
            .unwrap_or_else(|panic| Err(anyhow!("task panicked: {}", panic_message(&panic))));
        match result {
            Ok(()) => return Ok(()),
            Err(e) if attempt < retries => {
                attempt += 1;
                warn!("{}: {:?} failed, retry {}/{}: {:#}", name, item, attempt, retries, e);
            }
            Err(e) => return Err(e),
        }
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
