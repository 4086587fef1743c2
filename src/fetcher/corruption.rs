//! Corruption detection with a single refetch per block.

use std::collections::HashSet;
use std::io::{self, Cursor, Read};

use crate::config::FetchConfig;
use crate::error::{Error, Result};
use crate::transform::{BlockStream, StreamTransform};
use crate::types::{BlockId, BlockInfo, FetchRequest, ServerAddress};

/// What to do with a fetched block after inspection
pub(crate) enum Inspection {
    /// Hand the stream to the consumer
    Deliver(BlockStream),
    /// The block was corrupt; fetch it once more with this request
    Refetch(FetchRequest),
}

#[derive(Debug)]
pub(crate) struct CorruptionGuard {
    detect: bool,
    check_limit: u64,
    corrupted: HashSet<BlockId>,
}

impl CorruptionGuard {
    pub(crate) fn new(config: &FetchConfig) -> Self {
        Self {
            detect: config.detect_corrupt,
            check_limit: config.corruption_check_limit(),
            corrupted: HashSet::new(),
        }
    }

    /// Wrap `raw` with `transform` and, for small decoded blocks, decode it eagerly so that a
    /// corrupt payload fails here rather than halfway through consumption.
    ///
    /// Local blocks are not `refetchable`; their corruption is always terminal.
    pub(crate) fn inspect(
        &mut self,
        transform: &dyn StreamTransform,
        block_id: &BlockId,
        address: &ServerAddress,
        size_hint: u64,
        raw: BlockStream,
        refetchable: bool,
    ) -> Result<Inspection> {
        let wrapped = match transform.wrap(block_id, raw) {
            Ok(wrapped) => wrapped,
            Err(e) => return self.corrupted(block_id, address, size_hint, e, refetchable),
        };

        if !(self.detect && wrapped.is_decoded() && size_hint < self.check_limit) {
            return Ok(Inspection::Deliver(wrapped.into_inner()));
        }

        let mut decoded = Vec::new();
        match wrapped.into_inner().read_to_end(&mut decoded) {
            Ok(_) => Ok(Inspection::Deliver(Box::new(Cursor::new(decoded)))),
            Err(e) => self.corrupted(block_id, address, size_hint, e, refetchable),
        }
    }

    fn corrupted(
        &mut self,
        block_id: &BlockId,
        address: &ServerAddress,
        size_hint: u64,
        cause: io::Error,
        refetchable: bool,
    ) -> Result<Inspection> {
        if !refetchable || self.corrupted.contains(block_id) {
            return Err(Error::fetch_failed(
                block_id.clone(),
                address.clone(),
                format!("stream is corrupted: {cause}"),
                Box::new(cause),
            ));
        }

        tracing::warn!(
            address = %address,
            block_id = %block_id,
            error = %cause,
            "Got a corrupted block, fetching it again"
        );
        self.corrupted.insert(block_id.clone());
        Ok(Inspection::Refetch(FetchRequest::new(
            address.clone(),
            vec![BlockInfo {
                block_id: block_id.clone(),
                size: size_hint,
            }],
        )))
    }
}
