//! Per-block results and the channel carrying them from completion threads to the consumer.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::transform::BlockStream;
use crate::types::{BlockId, ServerAddress};

/// Result of fetching one block
pub(crate) enum FetchOutcome {
    Success {
        block_id: BlockId,
        address: ServerAddress,
        /// Advertised size, released from the byte budget on consumption
        size_hint: u64,
        /// Actual bytes delivered
        payload_size: u64,
        stream: BlockStream,
        /// Read through the local resolver, outside flow control
        is_local: bool,
        /// Completion of this block emptied its request's remaining set
        is_last_of_request: bool,
    },
    Failure {
        block_id: BlockId,
        address: ServerAddress,
        cause: TransportError,
    },
}

impl FetchOutcome {
    pub(crate) fn block_id(&self) -> &BlockId {
        match self {
            FetchOutcome::Success { block_id, .. } | FetchOutcome::Failure { block_id, .. } => {
                block_id
            }
        }
    }
}

impl std::fmt::Debug for FetchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchOutcome::Success {
                block_id,
                address,
                size_hint,
                payload_size,
                is_local,
                is_last_of_request,
                ..
            } => f
                .debug_struct("Success")
                .field("block_id", block_id)
                .field("address", address)
                .field("size_hint", size_hint)
                .field("payload_size", payload_size)
                .field("is_local", is_local)
                .field("is_last_of_request", is_last_of_request)
                .finish_non_exhaustive(),
            FetchOutcome::Failure {
                block_id,
                address,
                cause,
            } => f
                .debug_struct("Failure")
                .field("block_id", block_id)
                .field("address", address)
                .field("cause", cause)
                .finish(),
        }
    }
}

/// Producer side of the result channel, cloned into every listener
#[derive(Clone, Debug)]
pub(crate) struct ResultSender {
    tx: mpsc::UnboundedSender<FetchOutcome>,
}

/// Consumer side of the result channel
#[derive(Debug)]
pub(crate) struct ResultReceiver {
    rx: mpsc::UnboundedReceiver<FetchOutcome>,
}

/// Unbounded queue bridging asynchronous completions to the blocking consumer
pub(crate) fn result_channel() -> (ResultSender, ResultReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ResultSender { tx }, ResultReceiver { rx })
}

impl ResultSender {
    /// Queue `outcome`; false once the receiver has been closed
    pub(crate) fn send(&self, outcome: FetchOutcome) -> bool {
        self.tx.send(outcome).is_ok()
    }
}

impl ResultReceiver {
    /// Block the calling thread until an outcome arrives or `cancel` fires.
    ///
    /// Returns `None` on cancellation or when every sender is gone.
    pub(crate) fn recv_blocking(&mut self, cancel: &CancellationToken) -> Option<FetchOutcome> {
        futures::executor::block_on(async {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                outcome = self.rx.recv() => outcome,
            }
        })
    }

    /// Take everything already queued and refuse further sends
    pub(crate) fn drain_and_close(&mut self) -> Vec<FetchOutcome> {
        self.rx.close();
        let mut drained = Vec::new();
        while let Ok(outcome) = self.rx.try_recv() {
            drained.push(outcome);
        }
        drained
    }
}
