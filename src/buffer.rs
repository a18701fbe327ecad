//! Pushback Buffer
//!
//! A plain byte vector sitting in front of the transport. It holds bytes
//! that were peeked at but not yet consumed, and bytes the user pushed
//! back with `unrecv`. The receive engine mutates it only while holding
//! the receive permit, so no interior locking is needed here.
//!
//! Invariant: the buffer length is exactly the number of bytes a consuming
//! receive can return without touching the transport.

/// Byte buffer with prepend (unread), peek, and consume operations.
#[derive(Debug, Default)]
pub(crate) struct PushbackBuffer {
    bytes: Vec<u8>,
}

impl PushbackBuffer {
    /// Prepend `data` so the next consuming receive returns it first.
    /// Repeated unreads compose in LIFO-of-chunks order: the last chunk
    /// unread is the first returned.
    pub(crate) fn unread(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let mut front = Vec::with_capacity(data.len() + self.bytes.len());
        front.extend_from_slice(data);
        front.append(&mut self.bytes);
        self.bytes = front;
    }

    /// The first `min(n, len)` bytes, without advancing.
    pub(crate) fn peek(&self, n: usize) -> &[u8] {
        &self.bytes[..n.min(self.bytes.len())]
    }

    /// Drop the first `n` bytes. `n` must not exceed the buffered length.
    pub(crate) fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.bytes.len());
        self.bytes.drain(..n.min(self.bytes.len()));
    }

    /// Number of bytes available without blocking on the transport.
    pub(crate) fn len(&self) -> usize {
        self.bytes.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
