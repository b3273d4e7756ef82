//! Connections and request dispatch.
//!
//! A [`Connection`] wraps a negotiated byte stream with HTTP/1.1 framing.
//! Dispatching writes the request head, streams the request body under
//! the body's own pacing, and resolves as soon as the response head has
//! been parsed - before any body byte is pulled from the wire.

use std::sync::atomic::{AtomicU64, Ordering};

use hyper::body::Incoming;
use tracing::{debug, trace};

use crate::bridge::TokioIo;
use crate::client::pool::PoolableConnection;
use crate::{Body, Error};

pub(crate) mod stream;
pub(crate) mod tcp;
pub(crate) mod tls;
pub(crate) mod tunnel;

pub use tcp::TcpConfig;

use stream::Stream;

static CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a physical connection, carried in trace output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A live HTTP/1.1 connection, exclusively owned by one request at a time.
#[derive(Debug)]
pub(crate) struct Connection {
    id: ConnectionId,
    sender: hyper::client::conn::http1::SendRequest<Body>,
}

impl Connection {
    /// Begin HTTP/1.1 framing over a negotiated stream.
    pub(crate) async fn handshake(stream: Stream) -> Result<Self, Error> {
        let (sender, conn) = hyper::client::conn::http1::Builder::new()
            .handshake(TokioIo::new(stream))
            .await
            .map_err(map_hyper_error)?;

        let id = ConnectionId::next();
        tokio::spawn(async move {
            if let Err(error) = conn.await {
                debug!(%id, %error, "connection driver error");
            }
        });

        trace!(%id, "http/1.1 connection ready");
        Ok(Self { id, sender })
    }

    /// Dispatch a request and return the parsed response head with its
    /// not-yet-pulled body stream.
    pub(crate) async fn send_request(
        &mut self,
        mut request: http::Request<Body>,
    ) -> Result<http::Response<Incoming>, Error> {
        prepare(&mut request);

        trace!(conn = %self.id, uri = %request.uri(), "sending request");
        self.sender.ready().await.map_err(map_hyper_error)?;
        self.sender
            .send_request(request)
            .await
            .map_err(map_hyper_error)
    }
}

impl PoolableConnection for Connection {
    fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// Classify a hyper failure into the transport error taxonomy.
pub(crate) fn map_hyper_error(error: hyper::Error) -> Error {
    if error.is_parse() || error.is_parse_status() || error.is_parse_too_large() {
        Error::protocol(error)
    } else if tls::is_tls_rejection(&error) {
        Error::handshake(error)
    } else {
        Error::connection(error)
    }
}

/// Rewrite the request head for the wire: origin-form URI, Host header,
/// and a default User-Agent.
fn prepare(request: &mut http::Request<Body>) {
    set_host_header(request);
    origin_form(request.uri_mut());

    request
        .headers_mut()
        .entry(http::header::USER_AGENT)
        .or_insert_with(|| {
            http::HeaderValue::from_static(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
        });
}

fn origin_form(uri: &mut http::Uri) {
    let path = match uri.path_and_query() {
        Some(path) if path.as_str() != "/" => {
            let mut parts = http::uri::Parts::default();
            parts.path_and_query = Some(path.clone());
            http::Uri::from_parts(parts).expect("path is valid uri")
        }
        _none_or_just_slash => http::Uri::default(),
    };
    *uri = path;
}

fn get_non_default_port(uri: &http::Uri) -> Option<http::uri::Port<&str>> {
    match (uri.port().map(|p| p.as_u16()), is_scheme_secure(uri)) {
        (Some(443), true) => None,
        (Some(80), false) => None,
        _ => uri.port(),
    }
}

fn is_scheme_secure(uri: &http::Uri) -> bool {
    uri.scheme_str()
        .map(|scheme| matches!(scheme, "https" | "wss"))
        .unwrap_or_default()
}

fn set_host_header<B>(request: &mut http::Request<B>) {
    let uri = request.uri().clone();
    let Some(hostname) = uri.host() else {
        return;
    };
    request
        .headers_mut()
        .entry(http::header::HOST)
        .or_insert_with(|| {
            if let Some(port) = get_non_default_port(&uri) {
                http::HeaderValue::from_str(&format!("{hostname}:{port}"))
            } else {
                http::HeaderValue::from_str(hostname)
            }
            .expect("uri host is valid header value")
        });
}
