//! Receive Engine
//!
//! The single timeout-aware receive primitive everything else is built on:
//! `recv(n, timeout, mode)` with two modes, consume and peek. Peek exists
//! because the higher-level patterns (delimiter search, regex search) must
//! inspect bytes before deciding whether to take them.
//!
//! Serialization: one `tokio::sync::Mutex` around the whole receive state
//! (transport read half, pushback buffer, sticky error) is the single-slot
//! receive permit. At most one transport read is outstanding per tube, and
//! the buffer is only ever mutated under the permit. For bounded timeouts
//! the budget covers permit acquisition and the transport read together.
//!
//! No byte is ever lost on timeout: reads on every transport variant are
//! cancellation-safe, so a read future abandoned by the timeout wrapper
//! leaves undelivered bytes in the kernel buffer, duplex pipe, or process
//! pump channel for the next receive.
//!
//! Sticky errors: once the transport reports EOF or an I/O failure, the
//! kind is recorded and attached to every later receive until the tube is
//! dropped. Buffered bytes still drain; they ride in the error's partial
//! payload.

use std::time::Duration;

use tokio::sync::{watch, Mutex, MutexGuard};
use tokio::time::{self, Instant};

use crate::buffer::PushbackBuffer;
use crate::config::RecvTimeout;
use crate::error::{Result, TubeError, TubeErrorKind};
use crate::transport::TransportReader;

/// Whether a receive removes the returned bytes from the logical stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RecvMode {
    /// Returned bytes are gone from the stream.
    Consume,
    /// Returned bytes stay buffered for subsequent receives.
    Peek,
}

/// Everything a receive touches, guarded by the permit.
struct RecvState {
    reader: TransportReader,
    pushback: PushbackBuffer,
    sticky: Option<TubeErrorKind>,
}

/// Serialized, timeout-aware receive primitive for one tube.
pub(crate) struct RecvEngine {
    state: Mutex<RecvState>,
    closed: watch::Receiver<bool>,
}

impl RecvEngine {
    pub(crate) fn new(reader: TransportReader, closed: watch::Receiver<bool>) -> Self {
        Self {
            state: Mutex::new(RecvState {
                reader,
                pushback: PushbackBuffer::default(),
                sticky: None,
            }),
            closed,
        }
    }

    /// Receive up to `n` bytes within `timeout`.
    ///
    /// Serves from the pushback buffer when it holds anything; otherwise
    /// performs exactly one transport read. Peek mode stashes freshly read
    /// bytes back into the buffer before returning a copy.
    pub(crate) async fn recv(
        &self,
        n: usize,
        timeout: RecvTimeout,
        mode: RecvMode,
    ) -> Result<Vec<u8>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let deadline = timeout.deadline();
        let mut state = self.acquire(timeout, deadline).await?;

        if !state.pushback.is_empty() {
            let out = state.pushback.peek(n).to_vec();
            if mode == RecvMode::Consume {
                state.pushback.consume(out.len());
            }
            return match state.sticky.clone() {
                Some(kind) => Err(TubeError::with_partial(kind, out)),
                None => Ok(out),
            };
        }
        if let Some(kind) = state.sticky.clone() {
            return Err(kind.into());
        }

        let mut scratch = vec![0u8; n];
        let mut closed = self.closed.clone();
        let RecvState {
            reader,
            pushback,
            sticky,
        } = &mut *state;

        let outcome = match timeout {
            RecvTimeout::Unlimited => guarded_read(&mut closed, reader, &mut scratch).await,
            RecvTimeout::NonBlocking => {
                // Zero duration grants the read future exactly one poll.
                match time::timeout(
                    Duration::ZERO,
                    guarded_read(&mut closed, reader, &mut scratch),
                )
                .await
                {
                    Ok(res) => res,
                    Err(_) => Err(TubeErrorKind::Timeout),
                }
            }
            RecvTimeout::Bounded(_) => {
                let deadline = deadline.unwrap_or_else(Instant::now);
                match time::timeout_at(
                    deadline,
                    guarded_read(&mut closed, reader, &mut scratch),
                )
                .await
                {
                    Ok(res) => res,
                    Err(_) => Err(TubeErrorKind::Timeout),
                }
            }
        };

        match outcome {
            Ok(0) => {
                *sticky = Some(TubeErrorKind::Eof);
                Err(TubeErrorKind::Eof.into())
            }
            Ok(read) => {
                scratch.truncate(read);
                if mode == RecvMode::Peek {
                    pushback.unread(&scratch);
                }
                Ok(scratch)
            }
            Err(kind) => {
                if matches!(kind, TubeErrorKind::Transport { .. }) {
                    *sticky = Some(kind.clone());
                }
                Err(kind.into())
            }
        }
    }

    /// Push bytes back to the front of the logical stream.
    pub(crate) async fn unread(&self, data: &[u8]) {
        self.state.lock().await.pushback.unread(data);
    }

    /// Drop `n` already-peeked bytes from the buffer.
    pub(crate) async fn consume(&self, n: usize) {
        self.state.lock().await.pushback.consume(n);
    }

    /// Shut down the read half; later reads report EOF.
    pub(crate) async fn close_reader(&self) {
        self.state.lock().await.reader.close();
    }

    /// Acquire the receive permit within the timeout budget.
    async fn acquire(
        &self,
        timeout: RecvTimeout,
        deadline: Option<Instant>,
    ) -> Result<MutexGuard<'_, RecvState>> {
        match timeout {
            RecvTimeout::Unlimited => Ok(self.state.lock().await),
            RecvTimeout::NonBlocking => self
                .state
                .try_lock()
                .map_err(|_| TubeErrorKind::Timeout.into()),
            RecvTimeout::Bounded(_) => {
                let deadline = deadline.unwrap_or_else(Instant::now);
                time::timeout_at(deadline, self.state.lock())
                    .await
                    .map_err(|_| TubeErrorKind::Timeout.into())
            }
        }
    }
}

/// One transport read, interruptible by the tube's close signal.
async fn guarded_read(
    closed: &mut watch::Receiver<bool>,
    reader: &mut TransportReader,
    buf: &mut [u8],
) -> std::result::Result<usize, TubeErrorKind> {
    tokio::select! {
        res = reader.read(buf) => res.map_err(TubeErrorKind::from),
        () = close_signalled(closed) => Err(TubeErrorKind::Cancelled),
    }
}

async fn close_signalled(rx: &mut watch::Receiver<bool>) {
    // The sender lives as long as the tube; if it is somehow gone there is
    // nobody left to signal, so park instead of firing a spurious cancel.
    if rx.wait_for(|closed| *closed).await.is_err() {
        std::future::pending::<()>().await;
    }
}
