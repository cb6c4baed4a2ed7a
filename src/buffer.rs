//! Per-connection receive buffer.
//!
//! Accumulates the raw byte stream read from a client until a full line
//! has arrived. Capacity starts at one block and doubles whenever an append
//! would run past it, so a long packet costs a logarithmic number of
//! reallocations. Growth always preserves the bytes received so far.

use bytes::{Bytes, BytesMut};

/// Initial capacity of a receive buffer, and the size of a single socket read.
pub const BLOCK_SIZE: usize = 4096;

/// Growable byte accumulator for one connection.
#[derive(Debug)]
pub struct ReceiveBuffer {
    data: BytesMut,
    /// Logical capacity; always `BLOCK_SIZE * 2^n`.
    capacity: usize,
}

impl ReceiveBuffer {
    /// Create an empty buffer with `BLOCK_SIZE` capacity.
    pub fn new() -> Self {
        Self {
            data: BytesMut::with_capacity(BLOCK_SIZE),
            capacity: BLOCK_SIZE,
        }
    }

    /// Append bytes read from the socket, doubling capacity as needed.
    pub fn append(&mut self, bytes: &[u8]) {
        let needed = self.data.len() + bytes.len();
        if needed > self.capacity {
            let mut capacity = self.capacity;
            while capacity < needed {
                capacity *= 2;
            }
            self.data.reserve(capacity - self.data.len());
            self.capacity = capacity;
        }
        self.data.extend_from_slice(bytes);
    }

    /// True if the most recently written byte is a newline.
    pub fn has_complete_line(&self) -> bool {
        self.data.last() == Some(&b'\n')
    }

    /// Number of bytes received so far.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Current capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Consume the buffer, yielding the received bytes verbatim.
    pub fn into_packet(self) -> Bytes {
        self.data.freeze()
    }
}

impl Default for ReceiveBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_buffer() {
        let buf = ReceiveBuffer::new();
        assert_eq!(buf.len(), 0);
        assert_eq!(buf.capacity(), BLOCK_SIZE);
        assert!(!buf.has_complete_line());
    }

    #[test]
    fn test_complete_line_tracks_last_byte() {
        let mut buf = ReceiveBuffer::new();
        buf.append(b"hello");
        assert!(!buf.has_complete_line());

        buf.append(b"\n");
        assert!(buf.has_complete_line());

        // A newline in the middle does not count once more bytes follow.
        buf.append(b"trailing");
        assert!(!buf.has_complete_line());
    }

    #[test]
    fn test_doubling_growth() {
        let mut buf = ReceiveBuffer::new();
        buf.append(&[b'a'; BLOCK_SIZE]);
        assert_eq!(buf.capacity(), BLOCK_SIZE);

        buf.append(b"b");
        assert_eq!(buf.capacity(), BLOCK_SIZE * 2);

        buf.append(&[b'c'; BLOCK_SIZE * 2]);
        assert_eq!(buf.capacity(), BLOCK_SIZE * 4);
        assert_eq!(buf.len(), BLOCK_SIZE * 3 + 1);
    }

    #[test]
    fn test_growth_preserves_contents() {
        let mut expected = Vec::new();
        let mut buf = ReceiveBuffer::new();

        for i in 0..20u8 {
            let chunk = vec![i; 1000];
            buf.append(&chunk);
            expected.extend_from_slice(&chunk);
        }
        buf.append(b"\n");
        expected.push(b'\n');

        assert!(buf.capacity() >= expected.len());
        assert!(buf.has_complete_line());
        assert_eq!(&buf.into_packet()[..], &expected[..]);
    }
}
