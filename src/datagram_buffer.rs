//! A fixed-capacity buffer holding exactly one datagram under construction.
//!  It implements `BufMut` to fit into the `bytes` ecosystem, and it exposes
//!  the remaining capacity so the encoder can decide whether another message
//!  part still fits.

use bytes::buf::UninitSlice;
use std::fmt::{Debug, Formatter};

#[derive(Eq)]
pub struct DatagramBuffer {
    buf: Vec<u8>,
    len: usize,
}

impl DatagramBuffer {
    pub fn new(capacity: usize) -> DatagramBuffer {
        DatagramBuffer {
            // buffers live for the whole session and are reused per datagram,
            //  so eager initialization is fine
            buf: vec![0; capacity],
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn remaining_capacity(&self) -> usize {
        self.buf.len() - self.len
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Patch a big-endian u16 at an already-written position. Used to backfill
    ///  the message count once the datagram is fully assembled.
    pub fn overwrite_u16_at(&mut self, offset: usize, value: u16) {
        assert!(offset + 2 <= self.len, "patching beyond the written prefix");
        self.buf[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
    }
}

impl PartialEq for DatagramBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.as_ref().eq(other.as_ref())
    }
}

impl Debug for DatagramBuffer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.as_ref().fmt(f)
    }
}

impl AsRef<[u8]> for DatagramBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl AsMut<[u8]> for DatagramBuffer {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.buf[..self.len]
    }
}

unsafe impl bytes::BufMut for DatagramBuffer {
    fn remaining_mut(&self) -> usize {
        self.buf.len() - self.len
    }

    unsafe fn advance_mut(&mut self, cnt: usize) {
        assert!(self.len + cnt <= self.capacity());
        self.len += cnt;
    }

    fn chunk_mut(&mut self) -> &mut UninitSlice {
        UninitSlice::new(&mut self.buf[self.len..])
    }
}
