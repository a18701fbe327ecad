//! Tube Configuration
//!
//! Three knobs, all per-tube and all adjustable at runtime:
//!
//! - `newline`: appended by the `send_line*` family (sending only).
//! - `keep_line_ending`: whether `recv_line` keeps the trailing `\n`
//!   (and `\r`, if present).
//! - `recv_timeout`: how long receive operations wait for the transport.

use std::time::Duration;

use tokio::time::Instant;

/// Platform line separator, used as the default `newline`.
#[cfg(windows)]
pub const LINE_SEPARATOR: &[u8] = b"\r\n";
/// Platform line separator, used as the default `newline`.
#[cfg(not(windows))]
pub const LINE_SEPARATOR: &[u8] = b"\n";

/// How long a receive operation waits for the transport.
///
/// `Duration` is unsigned in Rust, so the wait-forever and non-blocking
/// cases are explicit variants rather than sign conventions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecvTimeout {
    /// Wait until the transport delivers bytes or fails.
    Unlimited,
    /// A single non-blocking attempt: serve buffered bytes or whatever the
    /// transport can deliver without waiting, otherwise time out.
    NonBlocking,
    /// Wait at most this long. The budget covers the whole receive,
    /// including acquisition of the internal receive permit.
    Bounded(Duration),
}

impl RecvTimeout {
    /// The default receive timeout: 10 seconds.
    pub const DEFAULT: Self = Self::Bounded(Duration::from_secs(10));

    /// The absolute deadline for a `Bounded` timeout starting now.
    pub(crate) fn deadline(self) -> Option<Instant> {
        match self {
            Self::Bounded(d) => Some(Instant::now() + d),
            Self::Unlimited | Self::NonBlocking => None,
        }
    }
}

impl Default for RecvTimeout {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Per-tube configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TubeConfig {
    /// Byte sequence appended by `send_line*`. Default: the platform line
    /// separator. Used only when sending; line receives always split on
    /// `\n`.
    pub newline: Vec<u8>,
    /// When true, `recv_line` returns the trailing `\n` (and `\r` if
    /// present). Default: false.
    pub keep_line_ending: bool,
    /// Receive timeout inherited by every receive operation.
    pub recv_timeout: RecvTimeout,
}

impl Default for TubeConfig {
    fn default() -> Self {
        Self {
            newline: LINE_SEPARATOR.to_vec(),
            keep_line_ending: false,
            recv_timeout: RecvTimeout::DEFAULT,
        }
    }
}

impl TubeConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the newline sequence appended by `send_line*`.
    #[must_use]
    pub fn with_newline(mut self, newline: impl Into<Vec<u8>>) -> Self {
        self.newline = newline.into();
        self
    }

    /// Keep (or strip) line endings on `recv_line`.
    #[must_use]
    pub fn with_keep_line_ending(mut self, keep: bool) -> Self {
        self.keep_line_ending = keep;
        self
    }

    /// Set the receive timeout.
    #[must_use]
    pub fn with_recv_timeout(mut self, timeout: RecvTimeout) -> Self {
        self.recv_timeout = timeout;
        self
    }
}
