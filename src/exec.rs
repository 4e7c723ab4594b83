//! Bounded, cancellable parallel execution for I/O stages

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use rayon::ThreadPool;

use crate::cache::OnceValue;
use crate::error::{ModuleError, Result};

/// Cooperative cancellation signal shared between a caller and running work
///
/// Timeouts are implemented by the caller canceling the token.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    canceled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    /// `Err(Canceled)` once the token has been canceled
    pub fn check(&self) -> Result<()> {
        if self.is_canceled() {
            Err(ModuleError::Canceled)
        } else {
            Ok(())
        }
    }
}

/// Runs independent fallible jobs on a pool of at most `parallelism` threads
#[derive(Clone)]
pub struct Executor {
    parallelism: usize,
    cancel: CancellationToken,
    pool: Arc<OnceValue<Result<Arc<ThreadPool>>>>,
}

impl Executor {
    pub fn new(parallelism: usize) -> Self {
        Self {
            parallelism: parallelism.max(1),
            cancel: CancellationToken::new(),
            pool: Arc::new(OnceValue::new()),
        }
    }

    /// Use `cancel` to abandon in-flight work
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Apply `job` to every item, returning results in input order
    ///
    /// The first error (or cancellation) fails the whole map; nothing
    /// partial is returned.
    pub fn map<T, R, F>(&self, items: Vec<T>, job: F) -> Result<Vec<R>>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> Result<R> + Sync + Send,
    {
        self.cancel.check()?;
        let pool = self.pool()?;
        let cancel = &self.cancel;
        let results = pool.install(|| {
            items
                .into_par_iter()
                .map(|item| {
                    cancel.check()?;
                    job(item)
                })
                .collect::<Result<Vec<R>>>()
        })?;
        self.cancel.check()?;
        Ok(results)
    }

    fn pool(&self) -> Result<Arc<ThreadPool>> {
        self.pool
            .get_or_init(|| {
                rayon::ThreadPoolBuilder::new()
                    .num_threads(self.parallelism)
                    .thread_name(|i| format!("schema-modules-io-{}", i))
                    .build()
                    .map(Arc::new)
                    .map_err(|e| {
                        ModuleError::internal(format!("failed to start worker pool: {}", e))
                    })
            })
            .clone()
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(default_parallelism())
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("parallelism", &self.parallelism)
            .field("canceled", &self.cancel.is_canceled())
            .finish()
    }
}

/// Number of available CPUs, at least one
pub fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
