//! Bit-level buffer reading for SC2 replay substreams.
//!
//! Replay substreams are bit-packed: integers of arbitrary width (1..=64
//! bits) are laid out back to back with no padding, in one of two bit
//! orders. [`BitBuffer`] wraps a byte slice and hands out those integers,
//! plus byte-aligned and bit-straddling byte runs.

mod bit_buffer;

pub use bit_buffer::{BitBuffer, ByteOrder};

use thiserror::Error;

/// Errors that can occur when reading from a [`BitBuffer`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    /// Attempted to read past the end of the buffer.
    #[error("read past end of buffer")]
    EndOfBuffer,
}
