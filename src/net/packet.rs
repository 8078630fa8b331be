//! The packet buffer every protocol layer shares
//!
//! Exactly one of these exists per stack, so only one packet is ever in
//! flight. Layout:
//!
//! ```text
//! head                 cursor          cursor+len             tail
//!  |<---- headroom ---->|<---- valid data ---->|<--- unused --->|
//! ```
//!
//! Transmit paths reset to the tail and `push` headers inside-out (payload,
//! transport, network, link). Receive paths reset to the head and `pull`
//! headers outside-in.

use alloc::boxed::Box;
use alloc::vec;
use core::fmt;

/// Default buffer size in bytes
pub const DEFAULT_PACKET_SIZE: usize = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    /// Pushing would move the cursor past the head
    NoSpace,
    /// Fewer valid bytes remain than were requested
    Truncated,
}

impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferError::NoSpace => write!(f, "no room left in packet buffer"),
            BufferError::Truncated => write!(f, "packet truncated"),
        }
    }
}

/// Where `reset` leaves the cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    /// Receive mode: cursor at head, the whole buffer is valid
    Head,
    /// Transmit mode: cursor at tail, nothing is valid
    Tail,
}

pub struct PacketBuffer {
    buf: Box<[u8]>,
    cursor: usize,
    len: usize,
}

impl PacketBuffer {
    /// Allocate a buffer of `size` bytes, reset to transmit mode
    pub fn new(size: usize) -> Self {
        Self {
            buf: vec![0u8; size].into_boxed_slice(),
            cursor: size,
            len: 0,
        }
    }

    pub fn reset(&mut self, mode: ResetMode) {
        match mode {
            ResetMode::Head => {
                self.cursor = 0;
                self.len = self.buf.len();
            }
            ResetMode::Tail => {
                self.cursor = self.buf.len();
                self.len = 0;
            }
        }
    }

    /// Grow the valid region by `n` bytes toward the head
    ///
    /// Returns the newly exposed bytes for the caller to fill in. On failure
    /// the buffer is left untouched.
    pub fn push(&mut self, n: usize) -> Result<&mut [u8], BufferError> {
        if n > self.cursor {
            return Err(BufferError::NoSpace);
        }

        self.cursor -= n;
        self.len += n;
        Ok(&mut self.buf[self.cursor..self.cursor + n])
    }

    /// Push `bytes` in front of the current data
    pub fn push_slice(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        self.push(bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    /// Consume `n` bytes from the front of the valid region
    ///
    /// Returns the consumed bytes. On failure the buffer is left untouched.
    pub fn pull(&mut self, n: usize) -> Result<&[u8], BufferError> {
        if n > self.len {
            return Err(BufferError::Truncated);
        }

        let start = self.cursor;
        self.cursor += n;
        self.len -= n;
        Ok(&self.buf[start..start + n])
    }

    /// Valid bytes starting at the cursor
    pub fn data(&self) -> &[u8] {
        &self.buf[self.cursor..self.cursor + self.len]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.cursor..self.cursor + self.len]
    }

    /// Shrink or grow the valid region, bounded by the tail
    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(self.buf.len() - self.cursor);
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Offset of the cursor from the head
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Bytes that can still be pushed
    pub fn headroom(&self) -> usize {
        self.cursor
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }
}

impl fmt::Debug for PacketBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketBuffer")
            .field("capacity", &self.buf.len())
            .field("cursor", &self.cursor)
            .field("len", &self.len)
            .finish()
    }
}
