//! Subprocess Transport
//!
//! Wraps an already-spawned `tokio::process::Child`. The child's stdout
//! and stderr are merged into a single read stream: each piped output gets
//! a pump task that forwards chunks into one mpsc channel, and the reader
//! drains that channel. Anonymous pipes have no read deadline of their
//! own; the pump-task-plus-channel arrangement makes the engine's timeout
//! wrapper apply uniformly, and an abandoned read loses nothing because
//! channel receives are cancellation-safe.
//!
//! Half-close of the send side drops child stdin (the peer program sees
//! EOF); full close kills the child and reaps it.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{TubeError, TubeErrorKind};

use super::{TransportReader, TransportWriter};

/// Chunk size used by the output pump tasks.
const PUMP_CHUNK: usize = 4096;
/// Channel depth between the pumps and the reader.
const PUMP_CAPACITY: usize = 32;

/// Split a spawned child into the tube's transport halves.
///
/// Requires piped stdin and stdout; a piped stderr is merged into the
/// read stream when present.
pub(crate) fn split(mut child: Child) -> Result<(TransportReader, TransportWriter), TubeError> {
    let stdin = child
        .stdin
        .take()
        .ok_or(TubeErrorKind::InvalidInput("child stdin must be piped"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or(TubeErrorKind::InvalidInput("child stdout must be piped"))?;
    let stderr = child.stderr.take();

    let (tx, rx) = mpsc::channel(PUMP_CAPACITY);
    spawn_pump("stdout", stdout, tx.clone());
    if let Some(stderr) = stderr {
        spawn_pump("stderr", stderr, tx);
    }

    Ok((
        TransportReader::Process(ProcessReader {
            rx,
            carry: Vec::new(),
        }),
        TransportWriter::Process(ProcessWriter {
            stdin: Some(stdin),
            child,
        }),
    ))
}

/// Forward one child output pipe into the merge channel until EOF.
fn spawn_pump<R>(stream: &'static str, mut pipe: R, tx: mpsc::Sender<io::Result<Vec<u8>>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; PUMP_CHUNK];
        loop {
            match pipe.read(&mut buf).await {
                Ok(0) => {
                    debug!(stream, "child pipe closed");
                    break;
                }
                Ok(n) => {
                    if tx.send(Ok(buf[..n].to_vec())).await.is_err() {
                        debug!(stream, "tube reader dropped, stopping pump");
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    break;
                }
            }
        }
    });
}

/// Merged stdout/stderr reader.
///
/// `carry` holds the tail of a pumped chunk that was larger than the
/// engine's scratch buffer, so a short read never drops bytes.
pub(crate) struct ProcessReader {
    rx: mpsc::Receiver<io::Result<Vec<u8>>>,
    carry: Vec<u8>,
}

impl ProcessReader {
    pub(crate) async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.carry.is_empty() {
            match self.rx.recv().await {
                Some(Ok(chunk)) => self.carry = chunk,
                Some(Err(e)) => return Err(e),
                // All pumps gone: both output pipes are at EOF.
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.carry.len());
        buf[..n].copy_from_slice(&self.carry[..n]);
        self.carry.drain(..n);
        Ok(n)
    }
}

/// Child stdin plus the handle needed to kill and reap the child.
pub(crate) struct ProcessWriter {
    stdin: Option<ChildStdin>,
    child: Child,
}

impl ProcessWriter {
    pub(crate) async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match self.stdin.as_mut() {
            Some(stdin) => stdin.write_all(data).await,
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "child stdin is closed",
            )),
        }
    }

    /// Close child stdin, delivering EOF to the child.
    pub(crate) async fn shutdown_send(&mut self) -> io::Result<()> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin.shutdown().await?;
        }
        Ok(())
    }

    /// Kill the child and wait for it to exit.
    pub(crate) async fn close(&mut self) -> io::Result<()> {
        self.stdin.take();
        if let Err(e) = self.child.start_kill() {
            // Already exited; wait() below still reaps it.
            debug!(error = %e, "kill skipped");
        }
        let status = self.child.wait().await?;
        debug!(%status, "child reaped");
        Ok(())
    }
}
