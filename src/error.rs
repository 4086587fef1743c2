//! Error types for block-fetch
//!
//! Two layers:
//! - [`TransportError`] is what a transport or local resolver reports for a single block.
//! - [`Error`] is what the fetch iterator raises to its consumer. Transport and corruption
//!   failures on shuffle blocks become [`Error::FetchFailed`], which an orchestrator can use to
//!   re-run only the producing task.

use std::sync::Arc;
use thiserror::Error;

use crate::types::{BlockId, ServerAddress};

/// Result type alias for block-fetch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error used as the source of a fetch failure
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for block-fetch
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "max_bytes_in_flight")
        key: Option<String>,
    },

    /// A block was listed with a non-positive size
    #[error("block {block_id} from {address} has invalid size {size}, expected a positive size")]
    InvalidBlockSize {
        /// Offending block
        block_id: BlockId,
        /// Server listed for the block
        address: ServerAddress,
        /// The size that was supplied
        size: i64,
    },

    /// Fetching a shuffle block failed; the producing map task should be re-run
    #[error(
        "failed to fetch shuffle {shuffle_id} map {map_id} reduce {reduce_id} from {address}: {message}"
    )]
    FetchFailed {
        /// Server the block was fetched from
        address: ServerAddress,
        /// Shuffle of the failed block
        shuffle_id: u32,
        /// Map task that produced the block
        map_id: u64,
        /// Reduce partition of the block
        reduce_id: u32,
        /// Human-readable description of the failure
        message: String,
        /// Underlying transport or decode error
        #[source]
        source: BoxError,
    },

    /// A failure was reported for a block that is not a shuffle block
    #[error("failed to get block {block_id} from {address}, which is not a shuffle block")]
    UnexpectedBlockId {
        /// The block that could not be decomposed
        block_id: BlockId,
        /// Server the block was fetched from
        address: ServerAddress,
    },

    /// A fetched block had no bytes even though its advertised size was positive
    #[error("received a zero-size buffer for block {block_id} from {address}")]
    EmptyPayload {
        /// Block that came back empty
        block_id: BlockId,
        /// Server that served it
        address: ServerAddress,
    },

    /// `next()` was called after every block was delivered
    #[error("no more blocks to fetch")]
    Exhausted,

    /// The iterator was cancelled or has already raised a terminal error
    #[error("block fetch iterator is closed")]
    Closed,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a configuration error for `key`
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Whether the owning stage can recover by re-running the producer of the failed block.
    ///
    /// Everything other than a fetch failure is either a caller contract violation or an
    /// internal invariant violation and must not be retried.
    pub fn is_stage_retryable(&self) -> bool {
        match self {
            Error::FetchFailed { .. } => true,
            Error::Config { .. }
            | Error::InvalidBlockSize { .. }
            | Error::UnexpectedBlockId { .. }
            | Error::EmptyPayload { .. }
            | Error::Exhausted
            | Error::Closed
            | Error::Io(_)
            | Error::Serialization(_) => false,
        }
    }

    /// Translate a per-block failure into the error raised to the consumer.
    ///
    /// Shuffle blocks become [`Error::FetchFailed`]; anything else is a protocol mismatch.
    pub(crate) fn fetch_failed(
        block_id: BlockId,
        address: ServerAddress,
        message: impl Into<String>,
        source: BoxError,
    ) -> Self {
        match block_id {
            BlockId::Shuffle {
                shuffle_id,
                map_id,
                reduce_id,
            } => Error::FetchFailed {
                address,
                shuffle_id,
                map_id,
                reduce_id,
                message: message.into(),
                source,
            },
            other => Error::UnexpectedBlockId {
                block_id: other,
                address,
            },
        }
    }
}

/// Per-block failure reported by a transport or a local resolver
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Could not reach the server or the connection dropped
    #[error("connection to {address} failed: {message}")]
    Connection {
        /// Server that could not be reached
        address: ServerAddress,
        /// Description of the connection failure
        message: String,
    },

    /// The server does not hold the block
    #[error("block {0} not found")]
    BlockNotFound(BlockId),

    /// I/O failure while reading or preparing the block
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// Other transport failure
    #[error("{0}")]
    Other(String),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Io(Arc::new(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> ServerAddress {
        ServerAddress::new("host-a", 7337, "exec-1")
    }

    #[test]
    fn shuffle_failure_translates_to_stage_retryable_fetch_failed() {
        let err = Error::fetch_failed(
            BlockId::shuffle(2, 9, 5),
            addr(),
            "connection reset",
            Box::new(TransportError::Other("connection reset".into())),
        );

        match &err {
            Error::FetchFailed {
                address,
                shuffle_id,
                map_id,
                reduce_id,
                ..
            } => {
                assert_eq!(address, &addr());
                assert_eq!((*shuffle_id, *map_id, *reduce_id), (2, 9, 5));
            }
            other => panic!("expected FetchFailed, got {other:?}"),
        }
        assert!(err.is_stage_retryable());
        assert!(
            std::error::Error::source(&err).is_some(),
            "original cause must stay attached"
        );
    }

    #[test]
    fn non_shuffle_failure_is_a_fatal_protocol_mismatch() {
        let err = Error::fetch_failed(
            BlockId::Other("rdd_1_2".into()),
            addr(),
            "boom",
            Box::new(TransportError::Other("boom".into())),
        );

        assert!(matches!(err, Error::UnexpectedBlockId { .. }));
        assert!(!err.is_stage_retryable());
    }

    #[test]
    fn invariant_violations_are_not_retryable() {
        let errors = vec![
            Error::InvalidBlockSize {
                block_id: BlockId::shuffle(0, 0, 0),
                address: addr(),
                size: 0,
            },
            Error::EmptyPayload {
                block_id: BlockId::shuffle(0, 0, 0),
                address: addr(),
            },
            Error::Exhausted,
            Error::Closed,
            Error::config("max_bytes_in_flight", "must be positive"),
        ];
        for err in errors {
            assert!(!err.is_stage_retryable(), "{err} must not be retryable");
        }
    }

    #[test]
    fn fetch_failed_message_names_server_and_coordinates() {
        let err = Error::fetch_failed(
            BlockId::shuffle(1, 2, 3),
            addr(),
            "stream is corrupted",
            Box::new(TransportError::Other("bad header".into())),
        );
        let msg = err.to_string();
        assert!(msg.contains("shuffle 1 map 2 reduce 3"), "got: {msg}");
        assert!(msg.contains("exec-1@host-a:7337"), "got: {msg}");
    }

    #[test]
    fn io_errors_convert_into_transport_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read");
        let err: TransportError = io.into();
        assert!(err.to_string().contains("short read"));
    }
}
