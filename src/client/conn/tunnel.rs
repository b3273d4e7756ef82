//! Forward-proxy `CONNECT` tunnel negotiation.

use tracing::{debug, trace};

use super::stream::Stream;
use crate::bridge::TokioIo;
use crate::{Body, Error};

/// The result of a tunnel-establishment request.
#[derive(Debug)]
pub(crate) enum TunnelOutcome {
    /// The proxy answered 2xx; the stream now relays bytes to the target.
    Established(Stream),

    /// The proxy answered with a non-2xx status.
    ///
    /// This is not a transport failure: the tunnel request shares the
    /// ordinary response-parsing path, and the proxy's own response is
    /// handed to the caller as the final response for the request.
    Refused(http::Response<hyper::body::Incoming>),
}

/// Request a tunnel to `host:port` over an existing connection to a proxy.
#[tracing::instrument(level = "debug", skip(stream))]
pub(crate) async fn tunnel(
    stream: Stream,
    host: &str,
    port: u16,
) -> Result<TunnelOutcome, Error> {
    let (mut sender, conn) = hyper::client::conn::http1::Builder::new()
        .handshake::<_, Body>(TokioIo::new(stream))
        .await
        .map_err(Error::tunnel)?;

    tokio::spawn(async move {
        if let Err(error) = conn.with_upgrades().await {
            debug!(%error, "tunnel connection driver error");
        }
    });

    let authority = format!("{host}:{port}");
    let uri = http::Uri::try_from(authority.as_str()).map_err(Error::tunnel)?;
    let request = http::Request::builder()
        .method(http::Method::CONNECT)
        .uri(uri)
        .header(http::header::HOST, authority.as_str())
        .body(Body::empty())
        .map_err(Error::tunnel)?;

    let response = sender.send_request(request).await.map_err(Error::tunnel)?;

    if response.status().is_success() {
        trace!(status = %response.status(), "tunnel established");
        let upgraded = hyper::upgrade::on(response).await.map_err(Error::tunnel)?;
        Ok(TunnelOutcome::Established(Stream::Tunnel(TokioIo::new(
            upgraded,
        ))))
    } else {
        trace!(status = %response.status(), "tunnel refused by proxy");
        Ok(TunnelOutcome::Refused(response))
    }
}
