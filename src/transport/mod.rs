//! Transport Adapters
//!
//! Wraps concrete byte-stream endpoints behind two tagged variant enums,
//! one per transport half:
//!
//! - [`TransportReader`]: the receive engine's single read source
//! - [`TransportWriter`]: the write half, including process lifecycle
//!
//! Variants rather than a trait object keep the half-close semantics of
//! each transport a visible, per-variant choice:
//!
//! - `Tcp`: native half-close (FIN) on the send side
//! - `Process`: child stdin/stdout(+stderr merged) pipes, kill + reap on
//!   full close
//! - `Mem` / `Preloaded` / `Sink`: in-memory test doubles
//!
//! Reads and writes target disjoint halves, so a tube can write while a
//! receive is blocked.

pub(crate) mod mem;
pub(crate) mod process;
pub(crate) mod tcp;

use std::io;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use mem::PreloadedReader;
use process::{ProcessReader, ProcessWriter};

/// Which half of a tube an operation applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// The receive half.
    Read,
    /// The send half.
    Send,
    /// Both halves.
    Both,
}

impl Direction {
    pub(crate) fn covers_read(self) -> bool {
        matches!(self, Self::Read | Self::Both)
    }

    pub(crate) fn covers_send(self) -> bool {
        matches!(self, Self::Send | Self::Both)
    }
}

/// The read half of a transport. Owned exclusively by the receive engine.
pub(crate) enum TransportReader {
    /// Read half of a TCP connection.
    Tcp(OwnedReadHalf),
    /// Merged stdout/stderr of a child process.
    Process(ProcessReader),
    /// One end of an in-memory pipe pair.
    Mem(tokio::io::ReadHalf<DuplexStream>),
    /// A preloaded byte source; EOF once drained.
    Preloaded(PreloadedReader),
    /// Locally shut down; every read reports EOF.
    Closed,
}

impl TransportReader {
    /// Fill `buf` with up to `buf.len()` bytes.
    ///
    /// Cancellation-safe for every variant: dropping the returned future
    /// before completion leaves undelivered bytes in the kernel buffer,
    /// the duplex pipe, or the process pump channel.
    pub(crate) async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(r) => r.read(buf).await,
            Self::Process(r) => r.read(buf).await,
            Self::Mem(r) => r.read(buf).await,
            Self::Preloaded(r) => r.read(buf),
            Self::Closed => Ok(0),
        }
    }

    /// Shut down the read half locally. Subsequent reads report EOF.
    pub(crate) fn close(&mut self) {
        *self = Self::Closed;
    }
}

/// The write half of a transport, plus whatever lifecycle state full
/// close needs (the child handle, for processes).
pub(crate) enum TransportWriter {
    /// Write half of a TCP connection.
    Tcp(OwnedWriteHalf),
    /// Child stdin plus the child handle for kill/reap.
    Process(ProcessWriter),
    /// One end of an in-memory pipe pair.
    Mem(tokio::io::WriteHalf<DuplexStream>),
    /// Discards writes; the write side of a preloaded source.
    Sink,
    /// Shut down; writes fail.
    Closed,
}

impl TransportWriter {
    pub(crate) async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            Self::Tcp(w) => w.write_all(data).await,
            Self::Process(w) => w.write_all(data).await,
            Self::Mem(w) => w.write_all(data).await,
            Self::Sink => Ok(()),
            Self::Closed => Err(shut_down()),
        }
    }

    /// Half-close the send side, signalling EOF to the peer where the
    /// transport supports it. A no-op for doubles without a peer.
    pub(crate) async fn shutdown_send(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(w) => {
                w.shutdown().await?;
                *self = Self::Closed;
                Ok(())
            }
            // Keeps the child handle: the tube may still be closed later.
            Self::Process(w) => w.shutdown_send().await,
            Self::Mem(w) => {
                w.shutdown().await?;
                *self = Self::Closed;
                Ok(())
            }
            Self::Sink => {
                *self = Self::Closed;
                Ok(())
            }
            Self::Closed => Ok(()),
        }
    }

    /// Fully close the write side; for processes this kills and reaps the
    /// child.
    pub(crate) async fn close(&mut self) -> io::Result<()> {
        let result = match self {
            Self::Tcp(w) => w.shutdown().await,
            Self::Process(w) => w.close().await,
            Self::Mem(w) => w.shutdown().await,
            Self::Sink | Self::Closed => Ok(()),
        };
        *self = Self::Closed;
        // A transport already torn down by the peer is not an error here.
        match result {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

fn shut_down() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "write half is shut down")
}
