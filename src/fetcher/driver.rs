//! Request issuance and completion handling.
//!
//! Each issued request gets its own [`RequestListener`]. Successful blocks are prepared on the
//! worker pool and published only while the iterator is live; failures are published at once.
//! A block listed twice in one request is expected, and delivered, twice.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use super::outcome::FetchOutcome;
use super::shared::{FetchShared, RequestProgress};
use crate::error::TransportError;
use crate::transport::{BlockFetchListener, BlockPayload, BlockTransport, LocalResolver};
use crate::types::{BlockId, BlockInfo, FetchRequest, ServerAddress};
use crate::worker_pool::PoolHandle;

pub(crate) struct FetchDriver {
    shared: Arc<FetchShared>,
    transport: Arc<dyn BlockTransport>,
    pool: PoolHandle,
}

impl FetchDriver {
    pub(crate) fn new(
        shared: Arc<FetchShared>,
        transport: Arc<dyn BlockTransport>,
        pool: PoolHandle,
    ) -> Self {
        Self {
            shared,
            transport,
            pool,
        }
    }

    /// Hand `request` to the transport. Only called from the consumer thread.
    pub(crate) fn issue(&self, request: FetchRequest) {
        tracing::debug!(
            address = %request.address(),
            blocks = request.len(),
            bytes = request.size(),
            "Sending fetch request"
        );

        let listener = Arc::new(RequestListener::new(
            Arc::clone(&self.shared),
            self.pool.clone(),
            &request,
        ));
        let transport = Arc::clone(&self.transport);
        let address = request.address().clone();
        let block_ids = request.block_ids();

        self.pool.spawn(async move {
            transport.fetch_blocks(address, block_ids, listener).await;
        });
    }

    /// Read local blocks synchronously, stopping at the first failure
    pub(crate) fn read_local_blocks(
        &self,
        resolver: &dyn LocalResolver,
        address: &ServerAddress,
        blocks: Vec<BlockInfo>,
    ) {
        for block in blocks {
            let read = resolver.read(&block.block_id).and_then(|payload| {
                let payload_size = payload.size();
                let stream = payload.into_stream()?;
                Ok((payload_size, stream))
            });

            match read {
                Ok((payload_size, stream)) => {
                    let metrics = self.shared.metrics();
                    metrics.inc_local_blocks_fetched(1);
                    metrics.inc_local_bytes_read(payload_size);
                    self.shared.publish_success(FetchOutcome::Success {
                        block_id: block.block_id,
                        address: address.clone(),
                        size_hint: block.size,
                        payload_size,
                        stream,
                        is_local: true,
                        is_last_of_request: false,
                    });
                }
                Err(cause) => {
                    tracing::error!(
                        block_id = %block.block_id,
                        error = %cause,
                        "Error occurred while reading local block"
                    );
                    self.shared.publish_failure(FetchOutcome::Failure {
                        block_id: block.block_id,
                        address: address.clone(),
                        cause,
                    });
                    return;
                }
            }
        }
    }
}

/// Completion listener for one issued request
struct RequestListener {
    shared: Arc<FetchShared>,
    pool: PoolHandle,
    address: ServerAddress,
    /// Size hints of the occurrences still expected, per block
    outstanding: Mutex<HashMap<BlockId, VecDeque<u64>>>,
    progress: Arc<RequestProgress>,
}

impl RequestListener {
    fn new(shared: Arc<FetchShared>, pool: PoolHandle, request: &FetchRequest) -> Self {
        let mut outstanding: HashMap<BlockId, VecDeque<u64>> = HashMap::new();
        for block in request.blocks() {
            outstanding
                .entry(block.block_id.clone())
                .or_default()
                .push_back(block.size);
        }
        Self {
            shared,
            pool,
            address: request.address().clone(),
            outstanding: Mutex::new(outstanding),
            progress: Arc::new(RequestProgress::new(request.len())),
        }
    }

    /// Claim one outstanding occurrence of `block_id`, returning its size hint.
    ///
    /// `None` for a block this request never asked for, or one reported more often than listed.
    fn claim(&self, block_id: &BlockId) -> Option<u64> {
        let mut outstanding = self.outstanding.lock().unwrap_or_else(|e| e.into_inner());
        let sizes = outstanding.get_mut(block_id)?;
        let size_hint = sizes.pop_front();
        if sizes.is_empty() {
            outstanding.remove(block_id);
        }
        size_hint
    }
}

impl BlockFetchListener for RequestListener {
    fn on_block_fetch_success(&self, block_id: BlockId, payload: BlockPayload) {
        if self.shared.is_cancelled() {
            return;
        }
        let Some(size_hint) = self.claim(&block_id) else {
            tracing::warn!(
                address = %self.address,
                block_id = %block_id,
                "Ignoring completion for a block that is not outstanding"
            );
            return;
        };

        tracing::trace!(
            address = %self.address,
            block_id = %block_id,
            bytes = payload.size(),
            "Got remote block"
        );

        let shared = Arc::clone(&self.shared);
        let progress = Arc::clone(&self.progress);
        let address = self.address.clone();
        self.pool.spawn_prepare(move || {
            if shared.is_cancelled() {
                return;
            }
            let payload_size = payload.size();
            match payload.into_stream() {
                Ok(stream) => {
                    shared.publish_request_block(
                        FetchOutcome::Success {
                            block_id,
                            address,
                            size_hint,
                            payload_size,
                            stream,
                            is_local: false,
                            is_last_of_request: false,
                        },
                        &progress,
                    );
                }
                Err(e) => {
                    tracing::error!(
                        address = %address,
                        block_id = %block_id,
                        error = %e,
                        "Failed to prepare fetched block"
                    );
                    shared.publish_failure(FetchOutcome::Failure {
                        block_id,
                        address,
                        cause: TransportError::from(e),
                    });
                }
            }
        });
    }

    fn on_block_fetch_failure(&self, block_id: BlockId, cause: TransportError) {
        self.claim(&block_id);
        tracing::error!(
            address = %self.address,
            block_id = %block_id,
            error = %cause,
            "Failed to get block"
        );
        self.shared.publish_failure(FetchOutcome::Failure {
            block_id,
            address: self.address.clone(),
            cause,
        });
    }
}
