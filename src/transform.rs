//! Consumer-supplied stream wrapping (decompression, decryption).
//!
//! The fetch iterator hands every raw block stream to a [`StreamTransform`] before delivering it.
//! A transform reports whether it actually decoded the stream; only decoded streams are eagerly
//! checked for corruption.

use std::io::{self, Read};

use flate2::read::ZlibDecoder;

use crate::types::BlockId;

/// Readable bytes of one block, as handed to the consumer
pub type BlockStream = Box<dyn Read + Send>;

/// Stream returned by a [`StreamTransform`]
pub enum TransformedStream {
    /// The raw stream, untouched
    Passthrough(BlockStream),
    /// A decoding wrapper around the raw stream
    Decoded(BlockStream),
}

impl TransformedStream {
    /// True if the transform wrapped the stream in a decoder
    pub fn is_decoded(&self) -> bool {
        matches!(self, TransformedStream::Decoded(_))
    }

    /// Unwrap into the readable stream
    pub fn into_inner(self) -> BlockStream {
        match self {
            TransformedStream::Passthrough(s) | TransformedStream::Decoded(s) => s,
        }
    }
}

impl std::fmt::Debug for TransformedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransformedStream::Passthrough(_) => f.write_str("Passthrough(..)"),
            TransformedStream::Decoded(_) => f.write_str("Decoded(..)"),
        }
    }
}

/// Wraps a raw block stream before it reaches the consumer.
///
/// Errors returned here, and errors raised while reading a decoded stream during eager
/// verification, are treated as block corruption.
pub trait StreamTransform: Send + Sync {
    /// Wrap `raw`, the stream of `block_id`
    fn wrap(&self, block_id: &BlockId, raw: BlockStream) -> io::Result<TransformedStream>;
}

impl<F> StreamTransform for F
where
    F: Fn(&BlockId, BlockStream) -> io::Result<TransformedStream> + Send + Sync,
{
    fn wrap(&self, block_id: &BlockId, raw: BlockStream) -> io::Result<TransformedStream> {
        self(block_id, raw)
    }
}

/// Delivers raw streams unchanged
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityTransform;

impl StreamTransform for IdentityTransform {
    fn wrap(&self, _block_id: &BlockId, raw: BlockStream) -> io::Result<TransformedStream> {
        Ok(TransformedStream::Passthrough(raw))
    }
}

/// Inflates zlib-compressed blocks
#[derive(Clone, Copy, Debug, Default)]
pub struct ZlibTransform;

impl StreamTransform for ZlibTransform {
    fn wrap(&self, _block_id: &BlockId, raw: BlockStream) -> io::Result<TransformedStream> {
        Ok(TransformedStream::Decoded(Box::new(ZlibDecoder::new(raw))))
    }
}
