//! Shared worker pool for transfers and block preparation.
//!
//! One pool is built per process (or per test) and handed to every fetch iterator. It owns a
//! tokio runtime that drives transport futures, and bounds how many blocking prepare tasks run
//! at once.

use std::future::Future;
use std::sync::Arc;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::Semaphore;

use crate::config::FetchConfig;
use crate::error::{Error, Result};

/// Fixed-size pool shared by all fetch iterators
pub struct FetchWorkerPool {
    runtime: Option<Runtime>,
    handle: PoolHandle,
    size: usize,
}

/// Cheap, cloneable access to a [`FetchWorkerPool`].
///
/// Listeners hold this rather than the pool itself so that the runtime is never dropped from
/// one of its own threads.
#[derive(Clone)]
pub(crate) struct PoolHandle {
    handle: Handle,
    prepare_permits: Arc<Semaphore>,
}

impl FetchWorkerPool {
    /// Build a pool with `size` worker threads and `size` concurrent prepare tasks
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::config(
                "prepare_concurrency",
                "worker pool size must be greater than zero",
            ));
        }

        let runtime = Builder::new_multi_thread()
            .worker_threads(size)
            .max_blocking_threads(size)
            .thread_name("block-fetch-worker")
            .enable_all()
            .build()?;

        tracing::debug!(size = size, "Started block fetch worker pool");

        Ok(Self {
            handle: PoolHandle {
                handle: runtime.handle().clone(),
                prepare_permits: Arc::new(Semaphore::new(size)),
            },
            runtime: Some(runtime),
            size,
        })
    }

    /// Build a pool sized by `config.prepare_concurrency`
    pub fn from_config(config: &FetchConfig) -> Result<Self> {
        Self::new(config.prepare_concurrency)
    }

    /// Number of worker threads and prepare permits
    pub fn size(&self) -> usize {
        self.size
    }

    /// Runtime handle, e.g. for transports that need to spawn their own I/O
    pub fn runtime_handle(&self) -> &Handle {
        &self.handle.handle
    }

    pub(crate) fn handle(&self) -> PoolHandle {
        self.handle.clone()
    }
}

impl Drop for FetchWorkerPool {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for FetchWorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchWorkerPool")
            .field("size", &self.size)
            .field(
                "available_prepare_permits",
                &self.handle.prepare_permits.available_permits(),
            )
            .finish()
    }
}

impl PoolHandle {
    /// Drive `future` on the pool's runtime
    pub(crate) fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future);
    }

    /// Run blocking `task` once a prepare permit is free
    pub(crate) fn spawn_prepare<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let permits = Arc::clone(&self.prepare_permits);
        self.handle.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            if let Err(e) = tokio::task::spawn_blocking(task).await {
                tracing::error!(error = %e, "Block prepare task panicked");
            }
        });
    }
}
