//! Fake remote transports

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use block_fetch::{
    BlockFetchListener, BlockId, BlockPayload, BlockTransport, ServerAddress, TransportError,
};
use rand::Rng;

use super::fixtures::{block_content, compress};

/// Serves compressed block content, completing every block in its own task after a random
/// delay so completions arrive out of order.
#[derive(Default)]
pub struct JitteredTransport {
    failing: HashSet<BlockId>,
    issued: Mutex<Vec<(ServerAddress, Vec<BlockId>)>>,
}

impl JitteredTransport {
    /// Transport that serves every block
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Transport that reports a connection failure for each block in `failing`
    pub fn failing(failing: impl IntoIterator<Item = BlockId>) -> Arc<Self> {
        Arc::new(Self {
            failing: failing.into_iter().collect(),
            ..Self::default()
        })
    }

    /// Requests received so far
    pub fn issued(&self) -> Vec<(ServerAddress, Vec<BlockId>)> {
        self.issued.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl BlockTransport for JitteredTransport {
    async fn fetch_blocks(
        &self,
        address: ServerAddress,
        block_ids: Vec<BlockId>,
        listener: Arc<dyn BlockFetchListener>,
    ) {
        self.issued
            .lock()
            .unwrap()
            .push((address.clone(), block_ids.clone()));

        for block_id in block_ids {
            let delay = Duration::from_millis(rand::thread_rng().gen_range(0..5));
            let fail = self.failing.contains(&block_id);
            let listener = Arc::clone(&listener);
            let address = address.clone();

            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if fail {
                    listener.on_block_fetch_failure(
                        block_id,
                        TransportError::Connection {
                            address,
                            message: "connection reset by peer".to_string(),
                        },
                    );
                } else {
                    let payload = BlockPayload::from(compress(&block_content(&block_id)));
                    listener.on_block_fetch_success(block_id, payload);
                }
            });
        }
    }
}
