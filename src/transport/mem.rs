//! In-Memory Transports
//!
//! Two test doubles:
//!
//! - [`preloaded`]: a byte source with fixed contents; reads drain it and
//!   then report EOF, writes are discarded. Useful for scripting receive
//!   behavior without a peer.
//! - [`pair`]: two connected tubes over an in-memory duplex pipe, the
//!   in-process analogue of a socket pair. Whatever one side sends, the
//!   other receives; shutting down a send half delivers EOF to the peer.

use std::io;

use tokio::io::DuplexStream;

use super::{TransportReader, TransportWriter};

/// Buffer capacity of each direction of an in-memory pair.
const PAIR_CAPACITY: usize = 64 * 1024;

/// A fixed byte source; EOF once drained.
pub(crate) struct PreloadedReader {
    data: Vec<u8>,
    pos: usize,
}

impl PreloadedReader {
    pub(crate) fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = &self.data[self.pos..];
        let n = buf.len().min(remaining.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }
}

/// Transport halves serving fixed contents; writes are discarded.
pub(crate) fn preloaded(data: Vec<u8>) -> (TransportReader, TransportWriter) {
    (
        TransportReader::Preloaded(PreloadedReader { data, pos: 0 }),
        TransportWriter::Sink,
    )
}

/// Two connected sets of transport halves over an in-memory pipe.
pub(crate) fn pair() -> (
    (TransportReader, TransportWriter),
    (TransportReader, TransportWriter),
) {
    let (left, right): (DuplexStream, DuplexStream) = tokio::io::duplex(PAIR_CAPACITY);
    let (left_read, left_write) = tokio::io::split(left);
    let (right_read, right_write) = tokio::io::split(right);
    (
        (
            TransportReader::Mem(left_read),
            TransportWriter::Mem(left_write),
        ),
        (
            TransportReader::Mem(right_read),
            TransportWriter::Mem(right_write),
        ),
    )
}
