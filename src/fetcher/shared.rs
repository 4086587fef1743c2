//! State shared between the consumer thread, transport callbacks, prepare tasks and the
//! task-completion hook.
//!
//! The flow lock is the single mutual-exclusion domain: cancellation, every success publish and
//! every flow counter change happen while it is held. Lock order is flow, then receiver.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

use super::flow_control::{FlowSnapshot, FlowState};
use super::outcome::{FetchOutcome, ResultReceiver, ResultSender, result_channel};
use crate::metrics::MetricsSink;
use crate::types::{FetchRequest, ServerAddress};

/// Blocks of one issued request that have not entered the result channel yet.
///
/// Only changed under the flow lock, so the block that takes it to zero is also the last block
/// of its request the consumer will see.
#[derive(Debug)]
pub(crate) struct RequestProgress {
    unpublished: AtomicUsize,
}

impl RequestProgress {
    pub(crate) fn new(blocks: usize) -> Self {
        Self {
            unpublished: AtomicUsize::new(blocks),
        }
    }

    /// Count one block as published; true if it was the last one
    fn publish_one(&self) -> bool {
        matches!(
            self.unpublished
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)),
            Ok(1)
        )
    }
}

pub(crate) struct FetchShared {
    flow: Mutex<FlowState>,
    cancel: CancellationToken,
    results_tx: ResultSender,
    results_rx: Mutex<ResultReceiver>,
    metrics: Arc<dyn MetricsSink>,
    cleaned_up: AtomicBool,
}

impl FetchShared {
    pub(crate) fn new(flow: FlowState, metrics: Arc<dyn MetricsSink>) -> Self {
        let (results_tx, results_rx) = result_channel();
        Self {
            flow: Mutex::new(flow),
            cancel: CancellationToken::new(),
            results_tx,
            results_rx: Mutex::new(results_rx),
            metrics,
            cleaned_up: AtomicBool::new(false),
        }
    }

    fn flow(&self) -> MutexGuard<'_, FlowState> {
        self.flow.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn receiver(&self) -> MutexGuard<'_, ResultReceiver> {
        self.results_rx.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn metrics(&self) -> &Arc<dyn MetricsSink> {
        &self.metrics
    }

    /// Publish a prepared block unless the iterator has been cancelled.
    ///
    /// Returns false when the outcome was discarded; the caller's payload is dropped with it.
    pub(crate) fn publish_success(&self, outcome: FetchOutcome) -> bool {
        self.publish(outcome, None)
    }

    /// Publish a prepared block of a remote request.
    ///
    /// Whether it is the last of its request is decided here, in channel order, so the request
    /// stays in flight until its final block has been consumed.
    pub(crate) fn publish_request_block(
        &self,
        outcome: FetchOutcome,
        progress: &RequestProgress,
    ) -> bool {
        self.publish(outcome, Some(progress))
    }

    fn publish(&self, mut outcome: FetchOutcome, progress: Option<&RequestProgress>) -> bool {
        let _flow = self.flow();
        if self.cancel.is_cancelled() {
            tracing::trace!(
                block_id = %outcome.block_id(),
                "Discarding block completed after cancellation"
            );
            return false;
        }
        if let (
            Some(progress),
            FetchOutcome::Success {
                is_last_of_request, ..
            },
        ) = (progress, &mut outcome)
        {
            *is_last_of_request = progress.publish_one();
        }
        self.results_tx.send(outcome)
    }

    /// Publish a failure; never suppressed so the consumer can fail fast
    pub(crate) fn publish_failure(&self, outcome: FetchOutcome) {
        if !self.results_tx.send(outcome) {
            tracing::trace!("Result channel closed, dropping fetch failure");
        }
    }

    /// Requests that may be issued now; nothing once cancelled
    pub(crate) fn take_admissible(&self) -> Vec<FetchRequest> {
        let mut flow = self.flow();
        if self.cancel.is_cancelled() {
            return Vec::new();
        }
        flow.take_admissible()
    }

    pub(crate) fn enqueue(&self, request: FetchRequest) {
        self.flow().enqueue(request);
    }

    pub(crate) fn block_consumed(
        &self,
        address: &ServerAddress,
        size_hint: u64,
        is_last_of_request: bool,
    ) {
        self.flow()
            .block_consumed(address, size_hint, is_last_of_request);
    }

    pub(crate) fn flow_snapshot(&self) -> FlowSnapshot {
        self.flow().snapshot()
    }

    /// Block until the next outcome; `None` once cancelled
    pub(crate) fn recv(&self) -> Option<FetchOutcome> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.receiver().recv_blocking(&self.cancel)
    }

    /// Cancel, then drain queued outcomes into the metrics and close the channel.
    ///
    /// Does not wait for outstanding transport calls. Safe to call more than once.
    pub(crate) fn cleanup(&self) {
        {
            let _flow = self.flow();
            self.cancel.cancel();
        }
        if self.cleaned_up.swap(true, Ordering::SeqCst) {
            return;
        }

        let drained = self.receiver().drain_and_close();
        let mut released = 0usize;
        for outcome in drained {
            // Local reads were counted when they were read
            if let FetchOutcome::Success {
                payload_size,
                is_local: false,
                ..
            } = outcome
            {
                self.metrics.inc_remote_bytes_read(payload_size);
                self.metrics.inc_remote_blocks_fetched(1);
                released += 1;
            }
        }
        tracing::debug!(released_blocks = released, "Block fetch iterator cleaned up");
    }
}
