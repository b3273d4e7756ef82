use thiserror::Error;

use crate::BoxError;

/// Transport error taxonomy.
///
/// Configuration errors surface synchronously at provider or client
/// construction. Every per-request failure surfaces through the response
/// handler's error callback and the completion signal - never as a panic
/// or an early return from [`execute`][crate::client::Client::execute].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bad key material or trust material source, detected at construction.
    #[error("configuration: {0}")]
    Configuration(#[source] BoxError),

    /// TLS negotiation was rejected: untrusted peer, missing or rejected
    /// client certificate, or a protocol mismatch.
    #[error("tls handshake: {0}")]
    Handshake(#[source] BoxError),

    /// Transport-level I/O failure while establishing a proxy tunnel.
    ///
    /// A proxy that answers the tunnel request with a non-2xx status is
    /// *not* a tunnel error; its response is delivered to the caller as an
    /// ordinary response.
    #[error("proxy tunnel: {0}")]
    Tunnel(#[source] BoxError),

    /// I/O failure, unexpected peer close, or timeout.
    #[error("connection: {0}")]
    Connection(#[source] BoxError),

    /// Malformed response framing.
    #[error("protocol: {0}")]
    Protocol(#[source] BoxError),

    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,

    /// The client was closed before the request was accepted.
    #[error("client closed")]
    Closed,
}

impl Error {
    pub(crate) fn configuration<E: Into<BoxError>>(source: E) -> Self {
        Self::Configuration(source.into())
    }

    pub(crate) fn handshake<E: Into<BoxError>>(source: E) -> Self {
        Self::Handshake(source.into())
    }

    pub(crate) fn tunnel<E: Into<BoxError>>(source: E) -> Self {
        Self::Tunnel(source.into())
    }

    pub(crate) fn connection<E: Into<BoxError>>(source: E) -> Self {
        Self::Connection(source.into())
    }

    pub(crate) fn protocol<E: Into<BoxError>>(source: E) -> Self {
        Self::Protocol(source.into())
    }

    /// The kind of this error, for matching without destructuring sources.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::Handshake(_) => ErrorKind::Handshake,
            Error::Tunnel(_) => ErrorKind::Tunnel,
            Error::Connection(_) => ErrorKind::Connection,
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Closed => ErrorKind::Closed,
        }
    }
}

/// Discriminant-only view of [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`Error::Configuration`].
    Configuration,
    /// See [`Error::Handshake`].
    Handshake,
    /// See [`Error::Tunnel`].
    Tunnel,
    /// See [`Error::Connection`].
    Connection,
    /// See [`Error::Protocol`].
    Protocol,
    /// See [`Error::Cancelled`].
    Cancelled,
    /// See [`Error::Closed`].
    Closed,
}
