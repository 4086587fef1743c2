//! The pull-based fetch iterator.
//!
//! The consumer thread drives everything: it issues requests, blocks on the result channel,
//! releases flow-control budget as blocks are consumed and refills the pipeline after every
//! result.

use std::sync::Arc;
use std::time::Instant;

use super::corruption::{CorruptionGuard, Inspection};
use super::driver::FetchDriver;
use super::flow_control::{FlowLimits, FlowSnapshot, FlowState};
use super::outcome::FetchOutcome;
use super::request_builder::RequestBuilder;
use super::shared::FetchShared;
use crate::config::FetchConfig;
use crate::error::{Error, Result};
use crate::lifecycle::TaskLifecycle;
use crate::metrics::MetricsSink;
use crate::transform::{BlockStream, StreamTransform};
use crate::transport::{BlockTransport, LocalResolver};
use crate::types::{BlockId, BlocksByAddress};
use crate::worker_pool::FetchWorkerPool;

/// Everything a [`FetchIterator`] is built from
pub struct FetchIteratorParams<'a> {
    /// Flow-control limits and corruption settings
    pub config: &'a FetchConfig,
    /// Blocks to fetch, grouped by the server holding them
    pub blocks_by_address: BlocksByAddress,
    /// Transport for remote blocks
    pub transport: Arc<dyn BlockTransport>,
    /// Reader for blocks on `config.local_address`; required if any are listed
    pub local_resolver: Option<Arc<dyn LocalResolver>>,
    /// Wrapper applied to every delivered stream
    pub transform: Arc<dyn StreamTransform>,
    /// Read metrics of the owning task
    pub metrics: Arc<dyn MetricsSink>,
    /// Owning task; cleanup is registered here
    pub lifecycle: &'a dyn TaskLifecycle,
    /// Shared worker pool
    pub pool: &'a FetchWorkerPool,
}

/// Observable state of a [`FetchIterator`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IteratorState {
    /// Requests are still waiting to be issued
    Fetching,
    /// Every request has been issued; remaining blocks are in flight
    Draining,
    /// Every block has been delivered
    Exhausted,
    /// A terminal error was returned; nothing more will be delivered
    Failed,
    /// The iterator was cancelled before delivering every block
    Cancelled,
}

/// Blocking iterator over fetched `(block, stream)` pairs.
///
/// Blocks arrive in completion order. The sequence ends after every listed block was delivered
/// or at the first terminal error.
pub struct FetchIterator {
    shared: Arc<FetchShared>,
    driver: FetchDriver,
    guard: CorruptionGuard,
    transform: Arc<dyn StreamTransform>,
    metrics: Arc<dyn MetricsSink>,
    total_blocks: usize,
    processed: usize,
    failed: bool,
}

impl FetchIterator {
    /// Validate the input, plan the requests and start fetching.
    ///
    /// Fails before any request is issued if a block has a non-positive size.
    pub fn new(params: FetchIteratorParams<'_>) -> Result<Self> {
        let FetchIteratorParams {
            config,
            blocks_by_address,
            transport,
            local_resolver,
            transform,
            metrics,
            lifecycle,
            pool,
        } = params;

        config.validate()?;
        let plan = RequestBuilder::new(config).build(blocks_by_address)?;

        let local = match (&config.local_address, &local_resolver) {
            _ if plan.local_blocks.is_empty() => None,
            (Some(address), Some(resolver)) => Some((address.clone(), Arc::clone(resolver))),
            _ => {
                return Err(Error::config(
                    "local_address",
                    "blocks on the local address require a local resolver",
                ));
            }
        };

        tracing::info!(
            total_blocks = plan.total_blocks,
            remote_requests = plan.remote_requests.len(),
            remote_bytes = plan.remote_bytes,
            local_blocks = plan.local_blocks.len(),
            local_bytes = plan.local_bytes,
            "Starting block fetch"
        );

        let shared = Arc::new(FetchShared::new(
            FlowState::new(FlowLimits::from(config), plan.remote_requests),
            Arc::clone(&metrics),
        ));

        let weak = Arc::downgrade(&shared);
        lifecycle.add_completion_hook(Box::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.cleanup();
            }
        }));

        let driver = FetchDriver::new(Arc::clone(&shared), transport, pool.handle());
        let iterator = Self {
            shared,
            driver,
            guard: CorruptionGuard::new(config),
            transform,
            metrics,
            total_blocks: plan.total_blocks,
            processed: 0,
            failed: false,
        };

        iterator.fetch_up_to_max();

        if let Some((address, resolver)) = local {
            iterator
                .driver
                .read_local_blocks(resolver.as_ref(), &address, plan.local_blocks);
        }

        Ok(iterator)
    }

    /// True while blocks remain and the iterator has neither failed nor been cancelled
    pub fn has_next(&self) -> bool {
        !self.failed && !self.shared.is_cancelled() && self.processed < self.total_blocks
    }

    /// Block until the next block is available.
    ///
    /// Returns [`Error::Exhausted`] once every block was delivered and [`Error::Closed`] after
    /// cancellation or a previous terminal error.
    pub fn next_block(&mut self) -> Result<(BlockId, BlockStream)> {
        if self.failed || self.shared.is_cancelled() {
            return Err(Error::Closed);
        }
        if self.processed >= self.total_blocks {
            return Err(Error::Exhausted);
        }

        let result = self.next_result();
        if let Err(e) = &result
            && !self.shared.is_cancelled()
        {
            tracing::error!(
                error = %e,
                processed = self.processed,
                total_blocks = self.total_blocks,
                "Block fetch failed"
            );
            self.failed = true;
        }
        result
    }

    fn next_result(&mut self) -> Result<(BlockId, BlockStream)> {
        loop {
            let wait_started = Instant::now();
            let Some(outcome) = self.shared.recv() else {
                return Err(Error::Closed);
            };
            self.metrics.inc_fetch_wait_time(wait_started.elapsed());

            let (block_id, address, size_hint, payload_size, stream, is_local) = match outcome {
                FetchOutcome::Failure {
                    block_id,
                    address,
                    cause,
                } => {
                    let message = cause.to_string();
                    return Err(Error::fetch_failed(
                        block_id,
                        address,
                        message,
                        Box::new(cause),
                    ));
                }
                FetchOutcome::Success {
                    block_id,
                    address,
                    size_hint,
                    payload_size,
                    stream,
                    is_local,
                    is_last_of_request,
                } => {
                    if !is_local {
                        self.shared
                            .block_consumed(&address, size_hint, is_last_of_request);
                        self.metrics.inc_remote_bytes_read(payload_size);
                        self.metrics.inc_remote_blocks_fetched(1);
                    }
                    (block_id, address, size_hint, payload_size, stream, is_local)
                }
            };

            if payload_size == 0 {
                return Err(Error::EmptyPayload { block_id, address });
            }

            let inspection = self.guard.inspect(
                self.transform.as_ref(),
                &block_id,
                &address,
                size_hint,
                stream,
                !is_local,
            );

            match inspection? {
                Inspection::Deliver(stream) => {
                    self.fetch_up_to_max();
                    self.processed += 1;
                    return Ok((block_id, stream));
                }
                Inspection::Refetch(request) => {
                    self.shared.enqueue(request);
                    self.fetch_up_to_max();
                }
            }
        }
    }

    /// Issue every request the flow limits currently admit
    fn fetch_up_to_max(&self) {
        for request in self.shared.take_admissible() {
            self.driver.issue(request);
        }
    }

    /// Stop fetching and release buffered blocks.
    ///
    /// Outstanding transport calls are not awaited; their results are discarded.
    pub fn cancel(&self) {
        self.shared.cleanup();
    }

    /// Blocks delivered so far
    pub fn processed(&self) -> usize {
        self.processed
    }

    /// Blocks this iterator will deliver in total
    pub fn total_blocks(&self) -> usize {
        self.total_blocks
    }

    /// Current flow-control counters
    pub fn flow_snapshot(&self) -> FlowSnapshot {
        self.shared.flow_snapshot()
    }

    /// Where the iterator is in its lifecycle
    pub fn state(&self) -> IteratorState {
        if self.failed {
            return IteratorState::Failed;
        }
        if self.processed >= self.total_blocks {
            return IteratorState::Exhausted;
        }
        if self.shared.is_cancelled() {
            return IteratorState::Cancelled;
        }
        let snapshot = self.shared.flow_snapshot();
        if snapshot.pending_requests + snapshot.deferred_requests > 0 {
            IteratorState::Fetching
        } else {
            IteratorState::Draining
        }
    }
}

impl Iterator for FetchIterator {
    type Item = Result<(BlockId, BlockStream)>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.has_next() {
            return None;
        }
        Some(self.next_block())
    }
}

impl Drop for FetchIterator {
    fn drop(&mut self) {
        self.shared.cleanup();
    }
}

impl std::fmt::Debug for FetchIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchIterator")
            .field("total_blocks", &self.total_blocks)
            .field("processed", &self.processed)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
