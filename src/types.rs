//! Core types for block-fetch

use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Identifier of a fetchable block.
///
/// Shuffle blocks carry the coordinates of the unit of work that produced them, which is what
/// a fetch failure has to report so that only the affected producer is re-run. Anything else is
/// kept as an opaque name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BlockId {
    /// Output of one map task for one reduce partition
    Shuffle {
        /// Shuffle the block belongs to
        shuffle_id: u32,
        /// Producing map task
        map_id: u64,
        /// Consuming reduce partition
        reduce_id: u32,
    },
    /// Any other block name
    Other(String),
}

impl BlockId {
    /// Create a shuffle block id
    pub fn shuffle(shuffle_id: u32, map_id: u64, reduce_id: u32) -> Self {
        BlockId::Shuffle {
            shuffle_id,
            map_id,
            reduce_id,
        }
    }

    /// Name used on the wire and for on-disk segment files
    pub fn name(&self) -> String {
        self.to_string()
    }

    /// Whether this id decomposes into shuffle coordinates
    pub fn is_shuffle(&self) -> bool {
        matches!(self, BlockId::Shuffle { .. })
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockId::Shuffle {
                shuffle_id,
                map_id,
                reduce_id,
            } => write!(f, "shuffle_{shuffle_id}_{map_id}_{reduce_id}"),
            BlockId::Other(name) => f.write_str(name),
        }
    }
}

impl FromStr for BlockId {
    type Err = Infallible;

    /// Parses `shuffle_<shuffle>_<map>_<reduce>`; every other name becomes [`BlockId::Other`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(parse_shuffle(s).unwrap_or_else(|| BlockId::Other(s.to_string())))
    }
}

fn parse_shuffle(s: &str) -> Option<BlockId> {
    let mut parts = s.strip_prefix("shuffle_")?.split('_');
    let shuffle_id = parts.next()?.parse().ok()?;
    let map_id = parts.next()?.parse().ok()?;
    let reduce_id = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(BlockId::shuffle(shuffle_id, map_id, reduce_id))
}

/// Network identity of a process holding blocks.
///
/// Compared by value; used as the key for per-server counters and deferred backlogs.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerAddress {
    /// Hostname or IP
    pub host: String,
    /// Port of the block service
    pub port: u16,
    /// Logical id of the serving process
    pub server_id: String,
}

impl ServerAddress {
    /// Create a new ServerAddress
    pub fn new(host: impl Into<String>, port: u16, server_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            server_id: server_id.into(),
        }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.server_id, self.host, self.port)
    }
}

/// A block together with its advertised size in bytes
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    /// Block to fetch
    pub block_id: BlockId,
    /// Advertised size, always > 0 once validated
    pub size: u64,
}

/// Caller-supplied block lists, one ordered list of `(block, size)` per server.
///
/// Sizes are signed so that bad upstream sizes can be reported instead of wrapping.
pub type BlocksByAddress = Vec<(ServerAddress, Vec<(BlockId, i64)>)>;

/// A group of blocks fetched from one server in a single transport call.
///
/// Immutable once built; `size` is the sum of the block sizes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchRequest {
    address: ServerAddress,
    blocks: Vec<BlockInfo>,
    size: u64,
}

impl FetchRequest {
    /// Build a request, computing its total size
    pub fn new(address: ServerAddress, blocks: Vec<BlockInfo>) -> Self {
        let size = blocks.iter().map(|b| b.size).sum();
        Self {
            address,
            blocks,
            size,
        }
    }

    /// Server the request goes to
    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// Blocks in request order
    pub fn blocks(&self) -> &[BlockInfo] {
        &self.blocks
    }

    /// Sum of the advertised block sizes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Number of blocks in the request
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// True if the request carries no blocks
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Block ids in request order
    pub fn block_ids(&self) -> Vec<BlockId> {
        self.blocks.iter().map(|b| b.block_id.clone()).collect()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shuffle_block_id_renders_and_parses() {
        let id = BlockId::shuffle(3, 17, 4);
        assert_eq!(id.to_string(), "shuffle_3_17_4");

        let parsed: BlockId = "shuffle_3_17_4".parse().unwrap();
        assert_eq!(parsed, id);
        assert!(parsed.is_shuffle());
    }

    #[test]
    fn malformed_shuffle_names_stay_opaque() {
        for name in ["shuffle_1_2", "shuffle_1_2_3_4", "shuffle_a_2_3", "rdd_1_2", ""] {
            let parsed: BlockId = name.parse().unwrap();
            assert_eq!(parsed, BlockId::Other(name.to_string()), "name {name:?}");
            assert!(!parsed.is_shuffle());
        }
    }

    #[test]
    fn fetch_request_size_is_sum_of_blocks() {
        let addr = ServerAddress::new("host-a", 7337, "exec-1");
        let req = FetchRequest::new(
            addr.clone(),
            vec![
                BlockInfo {
                    block_id: BlockId::shuffle(0, 1, 0),
                    size: 100,
                },
                BlockInfo {
                    block_id: BlockId::shuffle(0, 2, 0),
                    size: 250,
                },
            ],
        );

        assert_eq!(req.size(), 350);
        assert_eq!(req.len(), 2);
        assert_eq!(req.address(), &addr);
        assert_eq!(
            req.block_ids(),
            vec![BlockId::shuffle(0, 1, 0), BlockId::shuffle(0, 2, 0)]
        );
    }

    #[test]
    fn server_addresses_compare_by_value() {
        let a = ServerAddress::new("host-a", 7337, "exec-1");
        let b = ServerAddress::new("host-a".to_string(), 7337, "exec-1".to_string());
        assert_eq!(a, b);
        assert_ne!(a, ServerAddress::new("host-a", 7338, "exec-1"));
        assert_eq!(a.to_string(), "exec-1@host-a:7337");
    }
}
