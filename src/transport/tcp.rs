//! TCP Transport
//!
//! Wraps an already-connected `tokio::net::TcpStream`. Dialing is the
//! caller's concern; the tube only needs the two owned halves. The send
//! side supports native half-close (FIN via `shutdown`), which peers see
//! as EOF while the read side keeps draining.

use tokio::net::TcpStream;

use super::{TransportReader, TransportWriter};

/// Split a connected stream into the tube's transport halves.
pub(crate) fn split(stream: TcpStream) -> (TransportReader, TransportWriter) {
    let (read_half, write_half) = stream.into_split();
    (
        TransportReader::Tcp(read_half),
        TransportWriter::Tcp(write_half),
    )
}
