//! Buffered, timeout-aware I/O tubes over sockets, subprocesses, and
//! in-memory streams.
//!
//! A [`Tube`] is one handle over a bidirectional byte stream with the
//! plumbing interactive protocol work keeps needing:
//!
//! - a pushback buffer, so bytes can be peeked or returned with
//!   [`Tube::unrecv`] and re-delivered by the next receive
//! - a configurable receive timeout applied uniformly to every receive,
//!   including non-blocking and wait-forever modes ([`RecvTimeout`])
//! - pattern receives: until a delimiter, by line, by predicate, by regex
//! - partial-success errors: bytes gathered before a timeout or EOF ride
//!   in [`TubeError::partial`] instead of being dropped
//!
//! The same operations work over a TCP stream ([`Tube::from_tcp`]), a
//! child process's stdio ([`Tube::from_child`], stderr merged in), and two
//! in-memory test doubles ([`Tube::from_static`], [`Tube::pair`]).
//!
//! ```
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> tubes::Result<()> {
//! let (local, remote) = tubes::Tube::pair();
//!
//! remote.send_line(b"greeting: hello").await?;
//! let line = local.recv_until(true, b":").await?;
//! assert_eq!(line, b"greeting");
//! assert_eq!(local.recv_line().await?, b" hello");
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod buffer;
pub mod config;
mod engine;
pub mod error;
pub mod transport;
pub mod tube;

pub use config::{RecvTimeout, TubeConfig, LINE_SEPARATOR};
pub use error::{Result, TubeError, TubeErrorKind};
pub use transport::Direction;
pub use tube::Tube;
