//! Shared fakes for fetcher tests.

use std::collections::{HashMap, VecDeque};
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::TransportError;
use crate::transform::BlockStream;
use crate::transport::{BlockFetchListener, BlockPayload, BlockTransport, LocalResolver};
use crate::types::{BlockId, BlocksByAddress, ServerAddress};

pub(super) fn addr(n: u16) -> ServerAddress {
    ServerAddress::new(format!("host-{n}"), 7337, format!("exec-{n}"))
}

/// `count` shuffle blocks of `size` bytes starting at map id `first_map`
pub(super) fn blocks(first_map: u64, count: u64, size: i64) -> Vec<(BlockId, i64)> {
    (first_map..first_map + count)
        .map(|m| (BlockId::shuffle(0, m, 0), size))
        .collect()
}

pub(super) fn block_count(input: &BlocksByAddress) -> usize {
    input.iter().map(|(_, b)| b.len()).sum()
}

pub(super) fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder =
        flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub(super) fn read_all(mut stream: BlockStream) -> Vec<u8> {
    let mut out = Vec::new();
    stream.read_to_end(&mut out).unwrap();
    out
}

/// Poll `condition` until it holds, panicking after five seconds
pub(super) fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Scripted reply for one fetch of a block
#[derive(Clone, Debug)]
pub(super) enum Reply {
    Data(Vec<u8>),
    Fail(TransportError),
    /// Keep the listener; the test completes the block later
    Hold,
}

/// In-memory transport answering from per-block scripts.
///
/// Each fetch of a block consumes the next scripted reply; the last one repeats. Unscripted
/// blocks answer with their own name as payload.
#[derive(Default)]
pub(super) struct MemoryTransport {
    scripts: Mutex<HashMap<BlockId, VecDeque<Reply>>>,
    issued: Mutex<Vec<(ServerAddress, Vec<BlockId>)>>,
    held: Mutex<Vec<(Arc<dyn BlockFetchListener>, BlockId)>>,
}

impl MemoryTransport {
    pub(super) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(super) fn script(&self, block_id: BlockId, replies: Vec<Reply>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(block_id, replies.into());
    }

    /// Hold every unscripted block
    pub(super) fn hold_all(&self, input: &BlocksByAddress) {
        for (_, list) in input {
            for (block_id, _) in list {
                self.script(block_id.clone(), vec![Reply::Hold]);
            }
        }
    }

    pub(super) fn issued(&self) -> Vec<(ServerAddress, Vec<BlockId>)> {
        self.issued.lock().unwrap().clone()
    }

    pub(super) fn times_fetched(&self, block_id: &BlockId) -> usize {
        self.issued
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, ids)| ids.contains(block_id))
            .count()
    }

    pub(super) fn held_count(&self) -> usize {
        self.held.lock().unwrap().len()
    }

    /// Complete every held block successfully with its name as payload
    pub(super) fn release_held(&self) {
        let held = std::mem::take(&mut *self.held.lock().unwrap());
        for (listener, block_id) in held {
            let payload = BlockPayload::from(block_id.name().into_bytes());
            listener.on_block_fetch_success(block_id, payload);
        }
    }

    fn next_reply(&self, block_id: &BlockId) -> Reply {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(block_id) {
            Some(replies) if replies.len() > 1 => replies.pop_front().unwrap(),
            Some(replies) if !replies.is_empty() => replies[0].clone(),
            _ => Reply::Data(block_id.name().into_bytes()),
        }
    }
}

#[async_trait::async_trait]
impl BlockTransport for MemoryTransport {
    async fn fetch_blocks(
        &self,
        address: ServerAddress,
        block_ids: Vec<BlockId>,
        listener: Arc<dyn BlockFetchListener>,
    ) {
        self.issued
            .lock()
            .unwrap()
            .push((address, block_ids.clone()));

        for block_id in block_ids {
            match self.next_reply(&block_id) {
                Reply::Data(data) => listener.on_block_fetch_success(block_id, data.into()),
                Reply::Fail(cause) => listener.on_block_fetch_failure(block_id, cause),
                Reply::Hold => self
                    .held
                    .lock()
                    .unwrap()
                    .push((Arc::clone(&listener), block_id)),
            }
        }
    }
}

/// Local resolver over an in-memory map
#[derive(Default)]
pub(super) struct MapResolver {
    blocks: HashMap<BlockId, Vec<u8>>,
}

impl MapResolver {
    pub(super) fn with(entries: impl IntoIterator<Item = (BlockId, Vec<u8>)>) -> Arc<Self> {
        Arc::new(Self {
            blocks: entries.into_iter().collect(),
        })
    }
}

impl LocalResolver for MapResolver {
    fn read(&self, block_id: &BlockId) -> Result<BlockPayload, TransportError> {
        self.blocks
            .get(block_id)
            .map(|data| BlockPayload::from(data.clone()))
            .ok_or_else(|| TransportError::BlockNotFound(block_id.clone()))
    }
}
