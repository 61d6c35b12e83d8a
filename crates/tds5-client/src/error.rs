//! Client error types.
//!
//! The core recognizes exactly three error kinds (see the error handling
//! design in the connection core specification): a transport failure forces
//! the connection closed, a local failure is a protocol/decoder problem this
//! client produced itself, and a remote failure is a `done` segment the
//! server marked `error`.

use thiserror::Error;

/// Errors that can occur while driving a connection.
#[derive(Debug, Error)]
pub enum Error {
    /// The transport failed: connect, send, receive, or a timeout waiting on
    /// one of those. The connection is force-closed and moved to
    /// `Disconnected`; the caller's next request triggers one reconnect
    /// attempt.
    #[error("socket error: {0}")]
    Socket(#[source] std::io::Error),

    /// A protocol-level failure produced by this client: a decoder failure,
    /// or an unsupported server path such as `AuthNegotiate`. The connection
    /// is left in its current state.
    #[error("protocol error: {0}")]
    Local(String),

    /// The server returned a `done` segment with the `error` flag; the
    /// message is the accompanying `message` token's text.
    #[error("server error: {0}")]
    Remote(String),
}

impl Error {
    /// A transport-level failure.
    #[must_use]
    pub fn socket(source: std::io::Error) -> Self {
        Self::Socket(source)
    }

    /// A decoder or unsupported-path failure produced by this client.
    #[must_use]
    pub fn local(reason: impl Into<String>) -> Self {
        Self::Local(reason.into())
    }

    /// A server-reported error segment.
    #[must_use]
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote(message.into())
    }

    /// Whether this error forced the connection closed.
    #[must_use]
    pub fn is_socket(&self) -> bool {
        matches!(self, Self::Socket(_))
    }

    /// Whether this error is a client-side protocol failure.
    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    /// Whether this error came from the server itself.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Socket(e)
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Self::Socket(std::io::Error::new(std::io::ErrorKind::TimedOut, e))
    }
}

impl From<tds5_protocol::ProtocolError> for Error {
    fn from(e: tds5_protocol::ProtocolError) -> Self {
        Self::Local(e.to_string())
    }
}

/// Result type for connection core operations.
pub type Result<T> = std::result::Result<T, Error>;
