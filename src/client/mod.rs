//! The transport client.
//!
//! [`Client::execute`] hands each request to its own task, which drives
//! the full exchange: pool checkout or dial, optional `CONNECT` tunnel
//! and TLS negotiation, dispatch, and streamed body delivery to the
//! caller's [`ResponseHandler`]. The returned [`CompletionSignal`]
//! resolves as soon as the response head has been handed off; body
//! delivery continues on the request task.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use http_body_util::BodyExt;
use tokio::sync::oneshot;
use tracing::{debug, trace_span, Instrument};

use crate::tls::{KeyMaterialProvider, TrustProvider};
use crate::{Error, Request};

mod builder;
pub(crate) mod conn;
mod handler;
pub(crate) mod pool;

pub use builder::Builder;
pub use conn::TcpConfig;
pub use handler::{Collected, CollectingHandler, ResponseHandler, ResponseHead};

use conn::stream::Stream;
use conn::tls::TlsNegotiator;
use conn::tunnel::TunnelOutcome;
use conn::Connection;
use pool::{Checkout, Pool, PoolKey, Pooled};

/// An asynchronous HTTP/1.1 client with pooling, proxy tunneling and
/// mutual TLS. Cheap to clone; clones share the pool.
#[derive(Debug, Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

#[derive(Debug)]
struct ClientInner {
    pool: Pool<Connection>,
    tcp: conn::tcp::TcpConnector,
    tls: TlsNegotiator,
    proxy: Option<ProxyConfig>,
}

#[derive(Debug)]
struct ProxyConfig {
    host: String,
    port: u16,
    https: bool,
    key: String,
}

impl Client {
    /// Start configuring a client.
    pub fn builder() -> Builder {
        Builder::default()
    }

    fn new(
        tcp: TcpConfig,
        pool: pool::Config,
        proxy: Option<ProxyConfig>,
        keys: Arc<dyn KeyMaterialProvider>,
        trust: TrustProvider,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                pool: Pool::new(pool),
                tcp: conn::tcp::TcpConnector::new(tcp),
                tls: TlsNegotiator::new(keys, trust),
                proxy,
            }),
        }
    }

    /// Dispatch a request, delivering the response to `handler` as it
    /// streams in.
    ///
    /// Returns immediately. The returned [`CompletionSignal`] resolves
    /// once the response head has been handed to the handler, or with
    /// the error that ended the exchange first. Dropping the signal does
    /// not affect the request; call [`CompletionSignal::cancel`] to
    /// abandon it.
    pub fn execute<H>(&self, request: Request, handler: H) -> CompletionSignal
    where
        H: ResponseHandler,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let (cancel_tx, cancel_rx) = oneshot::channel();

        let span = trace_span!("request", uri = %request.uri());
        let inner = self.inner.clone();
        tokio::spawn(
            run_request(inner, request, handler, done_tx, cancel_rx).instrument(span),
        );

        CompletionSignal {
            done: done_rx,
            cancel: Some(cancel_tx),
        }
    }

    /// Shut the client down: discard idle connections and fail waiting
    /// and future requests with [`Error::Closed`]. Requests already past
    /// checkout run to completion.
    pub fn close(&self) {
        self.inner.pool.close();
    }
}

/// Resolves once the response head has been delivered to the handler,
/// or with the error that ended the exchange before that point.
///
/// Dropping the signal detaches it without cancelling the request.
#[derive(Debug)]
pub struct CompletionSignal {
    done: oneshot::Receiver<Result<(), Error>>,
    cancel: Option<oneshot::Sender<()>>,
}

impl CompletionSignal {
    /// Abandon the request. The connection in use is discarded and the
    /// handler receives no further callbacks. Idempotent.
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}

impl Future for CompletionSignal {
    type Output = Result<(), Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.done).poll(cx).map(|received| match received {
            Ok(result) => result,
            Err(_) => Err(Error::Cancelled),
        })
    }
}

/// Completes only if a cancellation was requested. A dropped sender
/// means the signal was detached, not cancelled, so pend forever.
async fn cancelled(receiver: oneshot::Receiver<()>) {
    if receiver.await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn run_request<H>(
    inner: Arc<ClientInner>,
    request: Request,
    mut handler: H,
    done: oneshot::Sender<Result<(), Error>>,
    cancel: oneshot::Receiver<()>,
) where
    H: ResponseHandler,
{
    let cancelled = cancelled(cancel);
    tokio::pin!(cancelled);

    // Establish a connection and exchange the request for a response
    // head. Cancellation drops the in-flight future, which forfeits any
    // checked-out connection.
    let outcome = tokio::select! {
        biased;
        _ = &mut cancelled => {
            debug!("request cancelled before response head");
            let _ = done.send(Err(Error::Cancelled));
            return;
        }
        outcome = exchange(&inner, request) => outcome,
    };

    let Exchange { response, conn } = match outcome {
        Ok(exchange) => exchange,
        Err(error) => {
            handler.on_error(&error);
            let _ = done.send(Err(error));
            return;
        }
    };
    let mut conn = conn;

    let (parts, mut body) = response.into_parts();
    handler.on_headers(parts.into());
    let _ = done.send(Ok(()));

    loop {
        let frame = tokio::select! {
            biased;
            _ = &mut cancelled => {
                debug!("request cancelled mid-body");
                if let Some(conn) = conn.take() {
                    conn.discard();
                }
                return;
            }
            frame = body.frame() => frame,
        };

        match frame {
            Some(Ok(frame)) => {
                if let Ok(data) = frame.into_data() {
                    handler.on_body_chunk(data);
                }
            }
            Some(Err(error)) => {
                let error = conn::map_hyper_error(error);
                debug!(%error, "response body failed");
                if let Some(conn) = conn.take() {
                    conn.discard();
                }
                handler.on_error(&error);
                return;
            }
            None => {
                // Settle the connection before the terminal callback, so
                // a caller resumed by it observes the pool up to date.
                if let Some(conn) = conn.take() {
                    conn.release();
                }
                handler.on_complete();
                return;
            }
        }
    }
}

struct Exchange {
    response: http::Response<hyper::body::Incoming>,
    /// `None` when the response came from a refusing proxy, whose
    /// connection is never pooled.
    conn: Option<Pooled<Connection>>,
}

async fn exchange(
    inner: &ClientInner,
    request: Request,
) -> Result<Exchange, Error> {
    let target = Target::from_uri(request.uri())?;
    let key = target.pool_key(inner);

    let mut conn = match inner.pool.checkout(key).await? {
        Checkout::Reused(conn) => conn,
        Checkout::Dial(permit) => match dial(inner, &target).await {
            Ok(Dialed::Connection(connection)) => permit.complete(connection),
            Ok(Dialed::Refused(response)) => {
                drop(permit);
                return Ok(Exchange {
                    response,
                    conn: None,
                });
            }
            Err(error) => {
                drop(permit);
                return Err(error);
            }
        },
    };

    match conn.send_request(request).await {
        Ok(response) => Ok(Exchange {
            response,
            conn: Some(conn),
        }),
        Err(error) => {
            conn.discard();
            Err(error)
        }
    }
}

enum Dialed {
    Connection(Connection),
    /// The proxy refused to tunnel; its response becomes the final
    /// response of the exchange.
    Refused(http::Response<hyper::body::Incoming>),
}

async fn dial(inner: &ClientInner, target: &Target) -> Result<Dialed, Error> {
    let stream = match &inner.proxy {
        None => Stream::from(inner.tcp.connect(&target.host, target.port).await?),
        Some(proxy) => {
            let mut stream = Stream::from(inner.tcp.connect(&proxy.host, proxy.port).await?);
            if proxy.https {
                stream = inner.tls.negotiate(stream, &proxy.host).await?;
            }
            match conn::tunnel::tunnel(stream, &target.host, target.port).await? {
                TunnelOutcome::Established(stream) => stream,
                TunnelOutcome::Refused(response) => return Ok(Dialed::Refused(response)),
            }
        }
    };

    let stream = if target.https {
        inner.tls.negotiate(stream, &target.host).await?
    } else {
        stream
    };

    let connection = Connection::handshake(stream).await?;
    Ok(Dialed::Connection(connection))
}

#[derive(Debug)]
struct Target {
    https: bool,
    host: String,
    port: u16,
}

impl Target {
    fn from_uri(uri: &http::Uri) -> Result<Self, Error> {
        let https = match uri.scheme_str() {
            Some("http") => false,
            Some("https") => true,
            other => {
                return Err(Error::configuration(format!(
                    "unsupported request scheme {:?}",
                    other.unwrap_or("none")
                )))
            }
        };
        let host = uri
            .host()
            .ok_or_else(|| Error::configuration("request uri has no host"))?
            .trim_matches(|c| c == '[' || c == ']')
            .to_owned();
        let port = uri.port_u16().unwrap_or(if https { 443 } else { 80 });

        Ok(Self { https, host, port })
    }

    fn pool_key(&self, inner: &ClientInner) -> PoolKey {
        let proxied_tls = inner.proxy.as_ref().is_some_and(|proxy| proxy.https);
        PoolKey {
            https: self.https,
            host: self.host.clone(),
            port: self.port,
            proxy: inner.proxy.as_ref().map(|proxy| proxy.key.clone()),
            tls: (self.https || proxied_tls).then(|| inner.tls.id()),
        }
    }
}
