//! Transport seam: how block bytes reach the fetch pipeline.
//!
//! - [`BlockTransport`] moves blocks from a remote server and reports each block to a
//!   [`BlockFetchListener`], in any order and from any thread.
//! - [`LocalResolver`] reads blocks synchronously from local storage.
//! - [`LocalFallbackTransport`] puts a resolver behind the transport interface so that both
//!   paths share the same listener contract.

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;

use crate::error::TransportError;
use crate::transform::BlockStream;
use crate::types::{BlockId, ServerAddress};

/// Bytes of a fetched block, owned by the pipeline until delivered
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockPayload {
    /// Block held in memory
    Memory(Bytes),
    /// Block stored as a byte range of a local file
    FileSegment {
        /// File holding the block
        path: PathBuf,
        /// Start of the block within the file
        offset: u64,
        /// Length of the block in bytes
        length: u64,
    },
}

impl BlockPayload {
    /// Size of the block in bytes
    pub fn size(&self) -> u64 {
        match self {
            BlockPayload::Memory(bytes) => bytes.len() as u64,
            BlockPayload::FileSegment { length, .. } => *length,
        }
    }

    /// Turn the payload into a readable stream.
    ///
    /// May block on file I/O, so the driver only calls it from the prepare pool.
    pub fn into_stream(self) -> io::Result<BlockStream> {
        match self {
            BlockPayload::Memory(bytes) => Ok(Box::new(Cursor::new(bytes))),
            BlockPayload::FileSegment {
                path,
                offset,
                length,
            } => {
                let mut file = File::open(&path)?;
                file.seek(SeekFrom::Start(offset))?;
                Ok(Box::new(file.take(length)))
            }
        }
    }
}

impl From<Bytes> for BlockPayload {
    fn from(bytes: Bytes) -> Self {
        BlockPayload::Memory(bytes)
    }
}

impl From<Vec<u8>> for BlockPayload {
    fn from(data: Vec<u8>) -> Self {
        BlockPayload::Memory(Bytes::from(data))
    }
}

/// Receives per-block completions from a transport.
///
/// Called zero or more times per fetch, eventually once per requested block, possibly from
/// several threads at once.
pub trait BlockFetchListener: Send + Sync {
    /// `block_id` arrived
    fn on_block_fetch_success(&self, block_id: BlockId, payload: BlockPayload);
    /// `block_id` could not be fetched
    fn on_block_fetch_failure(&self, block_id: BlockId, cause: TransportError);
}

/// Abstraction over the wire transport, enabling testability.
///
/// Implementations report every requested block to `listener`. The returned future may
/// complete before all blocks have been reported.
#[async_trait::async_trait]
pub trait BlockTransport: Send + Sync {
    /// Fetch `block_ids` from `address`
    async fn fetch_blocks(
        &self,
        address: ServerAddress,
        block_ids: Vec<BlockId>,
        listener: Arc<dyn BlockFetchListener>,
    );
}

/// Synchronous local block lookup
pub trait LocalResolver: Send + Sync {
    /// Resolve and read `block_id`
    fn read(&self, block_id: &BlockId) -> Result<BlockPayload, TransportError>;
}

/// Resolves blocks to `<root>/<block name>.data` files
#[derive(Clone, Debug)]
pub struct DirectoryResolver {
    root: PathBuf,
}

impl DirectoryResolver {
    /// Resolve blocks under `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of the segment file for `block_id`
    pub fn segment_path(&self, block_id: &BlockId) -> PathBuf {
        self.root.join(format!("{block_id}.data"))
    }

    /// Directory the resolver reads from
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl LocalResolver for DirectoryResolver {
    fn read(&self, block_id: &BlockId) -> Result<BlockPayload, TransportError> {
        let path = self.segment_path(block_id);
        let metadata = match std::fs::metadata(&path) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(TransportError::BlockNotFound(block_id.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(BlockPayload::FileSegment {
            path,
            offset: 0,
            length: metadata.len(),
        })
    }
}

/// Serves fetches from a [`LocalResolver`], one block at a time.
///
/// Used when no transport-side index is available. Reads run on the blocking pool and report
/// through the same listener interface as a remote transport.
#[derive(Clone)]
pub struct LocalFallbackTransport {
    resolver: Arc<dyn LocalResolver>,
}

impl LocalFallbackTransport {
    /// Wrap `resolver`
    pub fn new(resolver: Arc<dyn LocalResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait::async_trait]
impl BlockTransport for LocalFallbackTransport {
    async fn fetch_blocks(
        &self,
        address: ServerAddress,
        block_ids: Vec<BlockId>,
        listener: Arc<dyn BlockFetchListener>,
    ) {
        let resolver = Arc::clone(&self.resolver);
        let result = tokio::task::spawn_blocking(move || {
            for block_id in block_ids {
                match resolver.read(&block_id) {
                    Ok(payload) => listener.on_block_fetch_success(block_id, payload),
                    Err(cause) => listener.on_block_fetch_failure(block_id, cause),
                }
            }
        })
        .await;

        if let Err(e) = result {
            tracing::error!(address = %address, error = %e, "Local fallback read task panicked");
        }
    }
}

/// Pick the indexed transport when one is configured, otherwise read through `resolver`.
pub fn transport_or_fallback(
    indexed: Option<Arc<dyn BlockTransport>>,
    resolver: Arc<dyn LocalResolver>,
) -> Arc<dyn BlockTransport> {
    match indexed {
        Some(transport) => transport,
        None => {
            tracing::warn!("No block index cache configured, falling back to local reads");
            Arc::new(LocalFallbackTransport::new(resolver))
        }
    }
}
