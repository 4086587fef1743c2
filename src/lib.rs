//! # block-fetch
//!
//! Flow-controlled fetching of many remote blocks, exposed to the consumer as a blocking
//! iterator of `(block, stream)` pairs.
//!
//! ## Design Philosophy
//!
//! block-fetch is designed to be:
//! - **Bounded** - Bytes, requests and per-server blocks in flight are all capped
//! - **Pluggable** - Transport, local storage, stream decoding, metrics and task lifecycle are traits
//! - **Fail-fast** - The first unrecoverable error ends the iteration, identifying the producer to re-run
//! - **Leak-free** - Cancelling the owning task discards late completions instead of buffering them
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use block_fetch::{
//!     BlockId, DirectoryResolver, FetchConfig, FetchIterator, FetchIteratorParams,
//!     FetchWorkerPool, ReadMetrics, ServerAddress, TaskContext, ZlibTransform,
//!     transport_or_fallback,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = FetchConfig::default();
//!     let pool = FetchWorkerPool::from_config(&config)?;
//!     let task = TaskContext::new();
//!     let transport = transport_or_fallback(None, Arc::new(DirectoryResolver::new("/var/blocks")));
//!
//!     let server = ServerAddress::new("worker-7", 7337, "exec-7");
//!     let blocks = vec![(server, vec![(BlockId::shuffle(0, 3, 1), 4096)])];
//!
//!     let iter = FetchIterator::new(FetchIteratorParams {
//!         config: &config,
//!         blocks_by_address: blocks,
//!         transport,
//!         local_resolver: None,
//!         transform: Arc::new(ZlibTransform),
//!         metrics: Arc::new(ReadMetrics::new()),
//!         lifecycle: &task,
//!         pool: &pool,
//!     })?;
//!
//!     for block in iter {
//!         let (block_id, mut stream) = block?;
//!         let copied = std::io::copy(&mut stream, &mut std::io::sink())?;
//!         println!("{block_id}: {copied} bytes");
//!     }
//!
//!     task.complete();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Request planning, flow control and the fetch iterator
pub mod fetcher;
/// Task completion hooks
pub mod lifecycle;
/// Read metrics
pub mod metrics;
/// Stream wrapping applied before delivery
pub mod transform;
/// Transport and local storage interfaces
pub mod transport;
/// Core types
pub mod types;
/// Shared worker pool
pub mod worker_pool;

// Re-export commonly used types
pub use config::FetchConfig;
pub use error::{Error, Result, TransportError};
pub use fetcher::{FetchIterator, FetchIteratorParams, FlowSnapshot, IteratorState};
pub use lifecycle::{TaskContext, TaskLifecycle};
pub use metrics::{MetricsSink, ReadMetrics, ReadMetricsSnapshot};
pub use transform::{
    BlockStream, IdentityTransform, StreamTransform, TransformedStream, ZlibTransform,
};
pub use transport::{
    BlockFetchListener, BlockPayload, BlockTransport, DirectoryResolver, LocalFallbackTransport,
    LocalResolver, transport_or_fallback,
};
pub use types::{BlockId, BlockInfo, BlocksByAddress, FetchRequest, ServerAddress};
pub use worker_pool::FetchWorkerPool;
