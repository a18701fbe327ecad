//! Tube Facade
//!
//! [`Tube`] bundles a transport, a pushback buffer, and receive
//! configuration behind one handle. Receive operations go through the
//! serialized engine; sends go straight to the transport's write half, so
//! a tube can be driven by one reading task and one writing task at the
//! same time.
//!
//! Every receive operation is partial-success aware: on failure the bytes
//! gathered so far ride in [`TubeError::partial`]. Once the transport
//! reports EOF or an I/O error, buffered bytes keep draining (attached to
//! the error) and the same kind resurfaces on later calls.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::net::TcpStream;
use tokio::process::Child;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::debug;

use crate::config::{RecvTimeout, TubeConfig};
use crate::engine::{RecvEngine, RecvMode};
use crate::error::{Result, TubeError, TubeErrorKind};
use crate::transport::{mem, process, tcp, Direction, TransportWriter};

/// Peek granularity for the scanning receives (`recv_until`, `recv_repeat`,
/// `recv_all`).
const CHUNK_SIZE: usize = 4096;

/// A buffered, timeout-aware handle over a bidirectional byte stream.
///
/// Construct one with [`from_tcp`](Self::from_tcp),
/// [`from_child`](Self::from_child), [`from_static`](Self::from_static), or
/// [`pair`](Self::pair), then drive the peer with the `send*`/`recv*`
/// families. The configured [`RecvTimeout`] bounds every receive.
pub struct Tube {
    engine: RecvEngine,
    writer: Mutex<TransportWriter>,
    config: parking_lot::Mutex<TubeConfig>,
    closed: AtomicBool,
    closed_tx: watch::Sender<bool>,
}

impl Tube {
    fn from_halves(
        reader: crate::transport::TransportReader,
        writer: TransportWriter,
    ) -> Self {
        let (closed_tx, closed_rx) = watch::channel(false);
        Self {
            engine: RecvEngine::new(reader, closed_rx),
            writer: Mutex::new(writer),
            config: parking_lot::Mutex::new(TubeConfig::default()),
            closed: AtomicBool::new(false),
            closed_tx,
        }
    }

    /// Wrap an already-connected TCP stream.
    #[must_use]
    pub fn from_tcp(stream: TcpStream) -> Self {
        let (reader, writer) = tcp::split(stream);
        Self::from_halves(reader, writer)
    }

    /// Wrap an already-spawned child process.
    ///
    /// The child must have been spawned with piped stdin and stdout; a
    /// piped stderr is merged into the read stream. Closing the tube kills
    /// the child and reaps it.
    ///
    /// # Errors
    ///
    /// `InvalidInput` when stdin or stdout was not piped; the child is
    /// left untouched otherwise.
    pub fn from_child(child: Child) -> Result<Self> {
        let (reader, writer) = process::split(child)?;
        Ok(Self::from_halves(reader, writer))
    }

    /// A tube serving fixed bytes: reads drain `data` then report EOF,
    /// writes are discarded. Intended for tests.
    #[must_use]
    pub fn from_static(data: impl Into<Vec<u8>>) -> Self {
        let (reader, writer) = mem::preloaded(data.into());
        Self::from_halves(reader, writer)
    }

    /// Two tubes connected back to back over an in-memory pipe: whatever
    /// one sends, the other receives. Intended for tests.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (left, right) = mem::pair();
        (
            Self::from_halves(left.0, left.1),
            Self::from_halves(right.0, right.1),
        )
    }

    /// Replace the whole configuration.
    #[must_use]
    pub fn with_config(self, config: TubeConfig) -> Self {
        *self.config.lock() = config;
        self
    }

    // -------------------------------------------------------------------
    // Configuration
    // -------------------------------------------------------------------

    /// A snapshot of the current configuration.
    #[must_use]
    pub fn config(&self) -> TubeConfig {
        self.config.lock().clone()
    }

    /// The receive timeout inherited by every receive operation.
    #[must_use]
    pub fn recv_timeout(&self) -> RecvTimeout {
        self.config.lock().recv_timeout
    }

    /// Set the receive timeout.
    pub fn set_recv_timeout(&self, timeout: RecvTimeout) {
        self.config.lock().recv_timeout = timeout;
    }

    /// The byte sequence appended by `send_line*`.
    #[must_use]
    pub fn newline(&self) -> Vec<u8> {
        self.config.lock().newline.clone()
    }

    /// Set the byte sequence appended by `send_line*`.
    pub fn set_newline(&self, newline: impl Into<Vec<u8>>) {
        self.config.lock().newline = newline.into();
    }

    /// Whether `recv_line` keeps the trailing line ending.
    #[must_use]
    pub fn keep_line_ending(&self) -> bool {
        self.config.lock().keep_line_ending
    }

    /// Keep (or strip) line endings on `recv_line`.
    pub fn set_keep_line_ending(&self, keep: bool) {
        self.config.lock().keep_line_ending = keep;
    }

    /// True once [`close`](Self::close) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(TubeErrorKind::Closed.into());
        }
        Ok(())
    }

    // -------------------------------------------------------------------
    // Core receives
    // -------------------------------------------------------------------

    /// Receive up to `n` bytes. May return fewer.
    ///
    /// # Errors
    ///
    /// Timeout, EOF, or transport failure; gathered bytes ride in the
    /// error.
    pub async fn recv(&self, n: usize) -> Result<Vec<u8>> {
        self.ensure_open()?;
        self.engine
            .recv(n, self.recv_timeout(), RecvMode::Consume)
            .await
    }

    /// Receive exactly `n` bytes, repeating single receives as needed.
    /// Each inner receive gets the configured timeout.
    ///
    /// # Errors
    ///
    /// Same as [`recv`](Self::recv); whatever was gathered rides in the
    /// error.
    pub async fn recv_n(&self, n: usize) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            match self
                .engine
                .recv(n - out.len(), self.recv_timeout(), RecvMode::Consume)
                .await
            {
                Ok(chunk) => out.extend_from_slice(&chunk),
                Err(e) => {
                    let (kind, partial) = e.into_parts();
                    let drained = partial.is_empty();
                    out.extend_from_slice(&partial);
                    if out.len() >= n {
                        break;
                    }
                    if drained {
                        return Err(TubeError::with_partial(kind, out));
                    }
                }
            }
        }
        Ok(out)
    }

    /// Read until EOF, ignoring the configured timeout.
    ///
    /// # Errors
    ///
    /// Transport failure or cancellation; EOF is the normal terminator.
    pub async fn recv_all(&self) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let mut out = Vec::new();
        loop {
            match self
                .engine
                .recv(CHUNK_SIZE, RecvTimeout::Unlimited, RecvMode::Consume)
                .await
            {
                Ok(chunk) => out.extend_from_slice(&chunk),
                Err(e) => {
                    let (kind, partial) = e.into_parts();
                    let drained = partial.is_empty();
                    out.extend_from_slice(&partial);
                    if !drained {
                        continue;
                    }
                    return if kind == TubeErrorKind::Eof {
                        Ok(out)
                    } else {
                        Err(TubeError::with_partial(kind, out))
                    };
                }
            }
        }
    }

    /// [`recv_all`](Self::recv_all), lossily decoded as UTF-8.
    ///
    /// # Errors
    ///
    /// Same as [`recv_all`](Self::recv_all).
    pub async fn recv_all_string(&self) -> Result<String> {
        let bytes = self.recv_all().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Accumulate everything the transport delivers within the configured
    /// timeout. Timeout and EOF are normal terminators; with an
    /// [`RecvTimeout::Unlimited`] timeout this degrades to
    /// [`recv_all`](Self::recv_all), and with
    /// [`RecvTimeout::NonBlocking`] it drains only what is immediately
    /// available.
    ///
    /// # Errors
    ///
    /// Transport failure or cancellation.
    pub async fn recv_repeat(&self) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let timeout = self.recv_timeout();
        match timeout {
            RecvTimeout::Unlimited => self.recv_all().await,
            RecvTimeout::NonBlocking | RecvTimeout::Bounded(_) => {
                self.drain_until_deadline(timeout.deadline()).await
            }
        }
    }

    async fn drain_until_deadline(&self, deadline: Option<Instant>) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            let step = match deadline {
                None => RecvTimeout::NonBlocking,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(out);
                    }
                    RecvTimeout::Bounded(deadline - now)
                }
            };
            match self.engine.recv(CHUNK_SIZE, step, RecvMode::Consume).await {
                Ok(chunk) => out.extend_from_slice(&chunk),
                Err(e) => {
                    let (kind, partial) = e.into_parts();
                    let drained = partial.is_empty();
                    out.extend_from_slice(&partial);
                    if !drained {
                        continue;
                    }
                    return match kind {
                        TubeErrorKind::Timeout | TubeErrorKind::Eof => Ok(out),
                        other => Err(TubeError::with_partial(other, out)),
                    };
                }
            }
        }
    }

    /// Receive up through the first occurrence of any listed delimiter
    /// byte. The leftmost occurrence wins; at equal positions the first
    /// listed delimiter wins. When `drop_delim` is true the terminating
    /// byte is stripped from the returned slice but still consumed.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for an empty delimiter set; otherwise timeout, EOF,
    /// or transport failure with the bytes scanned so far attached.
    pub async fn recv_until(&self, drop_delim: bool, delims: &[u8]) -> Result<Vec<u8>> {
        self.ensure_open()?;
        if delims.is_empty() {
            return Err(TubeErrorKind::InvalidInput("recv_until needs at least one delimiter").into());
        }
        let timeout = self.recv_timeout();
        let deadline = timeout.deadline();
        let mut out = Vec::new();
        loop {
            let step = match timeout {
                RecvTimeout::Unlimited | RecvTimeout::NonBlocking => timeout,
                RecvTimeout::Bounded(_) => {
                    let deadline = deadline.unwrap_or_else(Instant::now);
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(TubeError::with_partial(TubeErrorKind::Timeout, out));
                    }
                    RecvTimeout::Bounded(deadline - now)
                }
            };
            // Peek so only the matched prefix is consumed; residue that
            // arrives attached to a sticky error is still scanned.
            let (chunk, pending_err) =
                match self.engine.recv(CHUNK_SIZE, step, RecvMode::Peek).await {
                    Ok(chunk) => (chunk, None),
                    Err(e) => {
                        let (kind, partial) = e.into_parts();
                        (partial, Some(kind))
                    }
                };
            if let Some(at) = chunk.iter().position(|b| delims.contains(b)) {
                out.extend_from_slice(&chunk[..=at]);
                self.engine.consume(at + 1).await;
                if drop_delim {
                    out.pop();
                }
                return Ok(out);
            }
            out.extend_from_slice(&chunk);
            self.engine.consume(chunk.len()).await;
            if let Some(kind) = pending_err {
                return Err(TubeError::with_partial(kind, out));
            }
        }
    }

    /// Receive one line, split on `\n`. Unless `keep_line_ending` is set,
    /// the trailing `\n` is stripped, and a preceding `\r` with it.
    ///
    /// # Errors
    ///
    /// Same as [`recv_until`](Self::recv_until); a partial line rides in
    /// the error, with a trailing `\r` stripped under the same rule.
    pub async fn recv_line(&self) -> Result<Vec<u8>> {
        let keep = self.keep_line_ending();
        let mut line = match self.recv_until(!keep, &[b'\n']).await {
            Ok(line) => line,
            Err(e) => {
                let (kind, mut partial) = e.into_parts();
                if !keep && partial.last() == Some(&b'\r') {
                    partial.pop();
                }
                return Err(TubeError::with_partial(kind, partial));
            }
        };
        if !keep && line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(line)
    }

    /// [`recv_line`](Self::recv_line), lossily decoded as UTF-8.
    ///
    /// # Errors
    ///
    /// Same as [`recv_line`](Self::recv_line).
    pub async fn recv_line_string(&self) -> Result<String> {
        let line = self.recv_line().await?;
        Ok(String::from_utf8_lossy(&line).into_owned())
    }

    /// Receive byte by byte until `pred` holds on the accumulation.
    ///
    /// # Errors
    ///
    /// Timeout, EOF, or transport failure, with the accumulation attached.
    pub async fn recv_pred<F>(&self, mut pred: F) -> Result<Vec<u8>>
    where
        F: FnMut(&[u8]) -> bool,
    {
        self.ensure_open()?;
        let mut out = Vec::new();
        loop {
            match self
                .engine
                .recv(1, self.recv_timeout(), RecvMode::Consume)
                .await
            {
                Ok(byte) => {
                    out.extend_from_slice(&byte);
                    if pred(&out) {
                        return Ok(out);
                    }
                }
                Err(e) => {
                    let (kind, partial) = e.into_parts();
                    if partial.is_empty() {
                        return Err(TubeError::with_partial(kind, out));
                    }
                    out.extend_from_slice(&partial);
                    if pred(&out) {
                        return Ok(out);
                    }
                    // Sticky residue keeps draining; the error resurfaces
                    // once the buffer is empty.
                }
            }
        }
    }

    /// Receive byte by byte until the accumulation matches `regex`. With
    /// `exact`, the whole accumulation must match; otherwise any match
    /// within it stops the receive.
    ///
    /// # Errors
    ///
    /// Same as [`recv_pred`](Self::recv_pred).
    pub async fn recv_regex(&self, regex: &regex::bytes::Regex, exact: bool) -> Result<Vec<u8>> {
        if exact {
            self.recv_pred(|acc| {
                regex
                    .find(acc)
                    .is_some_and(|m| m.start() == 0 && m.end() == acc.len())
            })
            .await
        } else {
            self.recv_pred(|acc| regex.is_match(acc)).await
        }
    }

    // -------------------------------------------------------------------
    // Line-matching receives
    // -------------------------------------------------------------------

    /// Receive lines until `pred` holds; returns the matching line. A
    /// partial line delivered with an error is tested too: a hit is a
    /// success, and the underlying error resurfaces on the next receive.
    ///
    /// # Errors
    ///
    /// Same as [`recv_line`](Self::recv_line) when no line matches before
    /// the failure.
    pub async fn recv_line_pred<F>(&self, mut pred: F) -> Result<Vec<u8>>
    where
        F: FnMut(&[u8]) -> bool,
    {
        loop {
            match self.recv_line().await {
                Ok(line) => {
                    if pred(&line) {
                        return Ok(line);
                    }
                }
                Err(e) => {
                    let (kind, partial) = e.into_parts();
                    if pred(&partial) {
                        return Ok(partial);
                    }
                    return Err(TubeError::with_partial(kind, partial));
                }
            }
        }
    }

    /// The first line containing any of `needles`.
    ///
    /// # Errors
    ///
    /// Same as [`recv_line_pred`](Self::recv_line_pred).
    pub async fn recv_line_contains(&self, needles: &[&[u8]]) -> Result<Vec<u8>> {
        self.recv_line_pred(|line| needles.iter().any(|needle| contains(line, needle)))
            .await
    }

    /// The first line starting with any of `prefixes`.
    ///
    /// # Errors
    ///
    /// Same as [`recv_line_pred`](Self::recv_line_pred).
    pub async fn recv_line_starts_with(&self, prefixes: &[&[u8]]) -> Result<Vec<u8>> {
        self.recv_line_pred(|line| prefixes.iter().any(|prefix| line.starts_with(prefix)))
            .await
    }

    /// The first line ending with any of `suffixes`.
    ///
    /// # Errors
    ///
    /// Same as [`recv_line_pred`](Self::recv_line_pred).
    pub async fn recv_line_ends_with(&self, suffixes: &[&[u8]]) -> Result<Vec<u8>> {
        self.recv_line_pred(|line| suffixes.iter().any(|suffix| line.ends_with(suffix)))
            .await
    }

    /// The first line matching `regex` (whole line with `exact`, any
    /// match within it otherwise).
    ///
    /// # Errors
    ///
    /// Same as [`recv_line_pred`](Self::recv_line_pred).
    pub async fn recv_line_regex(
        &self,
        regex: &regex::bytes::Regex,
        exact: bool,
    ) -> Result<Vec<u8>> {
        if exact {
            self.recv_line_pred(|line| {
                regex
                    .find(line)
                    .is_some_and(|m| m.start() == 0 && m.end() == line.len())
            })
            .await
        } else {
            self.recv_line_pred(|line| regex.is_match(line)).await
        }
    }

    /// Receive up to `count` lines. Complete lines gathered before a
    /// failure are returned beside the error (a partial line counts when
    /// non-empty), which is why this is the one receive without a flat
    /// `Result` shape.
    pub async fn recv_lines(&self, count: usize) -> (Vec<Vec<u8>>, Option<TubeError>) {
        let mut lines = Vec::with_capacity(count);
        for _ in 0..count {
            match self.recv_line().await {
                Ok(line) => lines.push(line),
                Err(e) => {
                    if !e.partial().is_empty() {
                        lines.push(e.partial().to_vec());
                    }
                    return (lines, Some(e));
                }
            }
        }
        (lines, None)
    }

    /// True when at least one byte is available within the configured
    /// timeout, buffered or fresh. Bytes tainted by a sticky error still
    /// count.
    pub async fn can_recv(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        match self
            .engine
            .recv(1, self.recv_timeout(), RecvMode::Peek)
            .await
        {
            Ok(_) => true,
            Err(e) => !e.partial().is_empty(),
        }
    }

    /// Push bytes back to the front of the stream; the next receive
    /// returns them before anything from the transport. Repeated calls
    /// compose in LIFO-of-chunks order.
    ///
    /// # Errors
    ///
    /// `Closed` after [`close`](Self::close).
    pub async fn unrecv(&self, data: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.engine.unread(data).await;
        Ok(())
    }

    /// Discard everything the transport delivers within the configured
    /// timeout. Used to flush banners and startup chatter. Transport
    /// failures while draining are swallowed; the bytes were going to be
    /// discarded anyway.
    ///
    /// # Errors
    ///
    /// `Closed` after [`close`](Self::close).
    pub async fn clean(&self) -> Result<()> {
        self.ensure_open()?;
        let _ = self.recv_repeat().await;
        Ok(())
    }

    // -------------------------------------------------------------------
    // Sends
    // -------------------------------------------------------------------

    /// Send all of `data`; returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Transport failure, or `Closed` after [`close`](Self::close).
    pub async fn send(&self, data: &[u8]) -> Result<usize> {
        self.ensure_open()?;
        let mut writer = self.writer.lock().await;
        writer
            .write_all(data)
            .await
            .map_err(|e| TubeError::from(TubeErrorKind::from(e)))?;
        Ok(data.len())
    }

    /// Send `data` followed by the configured newline.
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send).
    pub async fn send_line(&self, data: &[u8]) -> Result<usize> {
        let mut framed = data.to_vec();
        framed.extend_from_slice(&self.newline());
        self.send(&framed).await
    }

    /// Wait for any of `delims` on the receive side (discarding the bytes
    /// read), then send `data`. The delimiter is the synchronization
    /// signal.
    ///
    /// # Errors
    ///
    /// Same as [`recv_until`](Self::recv_until) and [`send`](Self::send).
    pub async fn send_after(&self, data: &[u8], delims: &[u8]) -> Result<usize> {
        self.recv_until(false, delims).await?;
        self.send(data).await
    }

    /// [`send_after`](Self::send_after) with the configured newline
    /// appended.
    ///
    /// # Errors
    ///
    /// Same as [`send_after`](Self::send_after).
    pub async fn send_line_after(&self, data: &[u8], delims: &[u8]) -> Result<usize> {
        self.recv_until(false, delims).await?;
        self.send_line(data).await
    }

    /// Send `data`, then wait for any of `delims` on the receive side
    /// (discarding the bytes read).
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send) and [`recv_until`](Self::recv_until).
    pub async fn send_then(&self, data: &[u8], delims: &[u8]) -> Result<usize> {
        let sent = self.send(data).await?;
        self.recv_until(false, delims).await?;
        Ok(sent)
    }

    /// [`send_then`](Self::send_then) with the configured newline
    /// appended.
    ///
    /// # Errors
    ///
    /// Same as [`send_then`](Self::send_then).
    pub async fn send_line_then(&self, data: &[u8], delims: &[u8]) -> Result<usize> {
        let sent = self.send_line(data).await?;
        self.recv_until(false, delims).await?;
        Ok(sent)
    }

    // -------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------

    /// Half-close the tube in `direction`. Shutting down the send side
    /// signals EOF to the peer where the transport supports it (FIN on
    /// TCP, stdin close for a child process); shutting down the read side
    /// makes later receives report EOF once the buffer drains.
    ///
    /// # Errors
    ///
    /// Transport failure, or `Closed` after [`close`](Self::close).
    pub async fn shutdown(&self, direction: Direction) -> Result<()> {
        self.ensure_open()?;
        if direction.covers_send() {
            let mut writer = self.writer.lock().await;
            writer
                .shutdown_send()
                .await
                .map_err(|e| TubeError::from(TubeErrorKind::from(e)))?;
        }
        if direction.covers_read() {
            self.engine.close_reader().await;
        }
        Ok(())
    }

    /// Close the tube: interrupt any blocked receive, close both
    /// transport halves, and for a child process kill and reap it.
    /// Idempotent; subsequent operations fail with `Closed`.
    ///
    /// # Errors
    ///
    /// Transport failure while tearing down.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!("closing tube");
        let _ = self.closed_tx.send(true);
        let result = {
            let mut writer = self.writer.lock().await;
            writer.close().await
        };
        self.engine.close_reader().await;
        result.map_err(|e| TubeErrorKind::from(e).into())
    }
}

/// Subslice search; an empty needle matches everything.
fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty()
        || haystack
            .windows(needle.len())
            .any(|window| window == needle)
}
