//! Request planning -- validates block sizes and groups blocks into bounded fetch requests.

use rand::seq::SliceRandom;

use crate::config::FetchConfig;
use crate::error::{Error, Result};
use crate::types::{BlockId, BlockInfo, BlocksByAddress, FetchRequest, ServerAddress};

/// Output of [`RequestBuilder::build`]
#[derive(Clone, Debug, Default)]
pub struct FetchPlan {
    /// Remote requests in randomized order
    pub remote_requests: Vec<FetchRequest>,
    /// Blocks held by this process, read through the local resolver
    pub local_blocks: Vec<BlockInfo>,
    /// Total number of blocks the iterator will deliver
    pub total_blocks: usize,
    /// Sum of remote block sizes
    pub remote_bytes: u64,
    /// Sum of local block sizes
    pub local_bytes: u64,
}

/// Groups per-server block lists into fetch requests.
///
/// A request is flushed once its accumulated size reaches the target request size (a fifth of
/// the in-flight byte budget) or once it holds `max_blocks_in_flight_per_address` blocks.
#[derive(Clone, Debug)]
pub struct RequestBuilder {
    target_request_size: u64,
    max_blocks_per_request: usize,
    local_address: Option<ServerAddress>,
}

impl RequestBuilder {
    /// Create a builder using the limits in `config`
    pub fn new(config: &FetchConfig) -> Self {
        Self {
            target_request_size: config.target_request_size(),
            max_blocks_per_request: config.max_blocks_in_flight_per_address.max(1),
            local_address: config.local_address.clone(),
        }
    }

    /// Validate every block and build the plan.
    ///
    /// Fails on the first block with a non-positive size; nothing is fetched in that case.
    pub fn build(&self, blocks_by_address: BlocksByAddress) -> Result<FetchPlan> {
        let mut plan = FetchPlan::default();

        for (address, blocks) in blocks_by_address {
            let blocks = validate_blocks(&address, blocks)?;
            plan.total_blocks += blocks.len();

            if self.local_address.as_ref() == Some(&address) {
                plan.local_bytes += blocks.iter().map(|b| b.size).sum::<u64>();
                plan.local_blocks.extend(blocks);
                continue;
            }

            plan.remote_bytes += blocks.iter().map(|b| b.size).sum::<u64>();
            self.split_into_requests(&address, blocks, &mut plan.remote_requests);
        }

        // Randomize across servers so no server is systematically starved
        plan.remote_requests.shuffle(&mut rand::thread_rng());

        Ok(plan)
    }

    fn split_into_requests(
        &self,
        address: &ServerAddress,
        blocks: Vec<BlockInfo>,
        requests: &mut Vec<FetchRequest>,
    ) {
        let mut current: Vec<BlockInfo> = Vec::new();
        let mut current_size = 0u64;

        for block in blocks {
            current_size = current_size.saturating_add(block.size);
            current.push(block);

            if current_size >= self.target_request_size
                || current.len() >= self.max_blocks_per_request
            {
                tracing::trace!(
                    address = %address,
                    blocks = current.len(),
                    bytes = current_size,
                    "Creating fetch request"
                );
                requests.push(FetchRequest::new(
                    address.clone(),
                    std::mem::take(&mut current),
                ));
                current_size = 0;
            }
        }

        if !current.is_empty() {
            requests.push(FetchRequest::new(address.clone(), current));
        }
    }
}

fn validate_blocks(address: &ServerAddress, blocks: Vec<(BlockId, i64)>) -> Result<Vec<BlockInfo>> {
    blocks
        .into_iter()
        .map(|(block_id, size)| {
            if size <= 0 {
                return Err(Error::InvalidBlockSize {
                    block_id,
                    address: address.clone(),
                    size,
                });
            }
            Ok(BlockInfo {
                block_id,
                size: size as u64,
            })
        })
        .collect()
}
