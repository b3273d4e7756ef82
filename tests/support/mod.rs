//! In-process servers for exercising the client end to end.
#![allow(dead_code)]

use std::io::BufReader;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use parking_lot::Mutex;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use towline::bridge::TokioIo;
use towline::client::{ResponseHandler, ResponseHead};
use towline::{Error, ErrorKind};

pub const CA_PEM: &str = include_str!("../minica/minica.pem");
pub const SERVER_CERT_PEM: &str = include_str!("../minica/localhost/cert.pem");
pub const SERVER_KEY_PEM: &str = include_str!("../minica/localhost/key.pem");

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A listening server and the count of TCP connections it has accepted,
/// for observing connection reuse.
pub struct TestServer {
    pub addr: SocketAddr,
    accepts: Arc<AtomicUsize>,
}

impl TestServer {
    pub fn accepts(&self) -> usize {
        self.accepts.load(Ordering::SeqCst)
    }

    pub fn uri(&self, scheme: &str, path: &str) -> http::Uri {
        format!("{scheme}://localhost:{}{path}", self.addr.port())
            .parse()
            .unwrap()
    }
}

/// Plain HTTP/1.1 server answering every request with `200` and `body`.
pub async fn http_server(body: &'static str) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepts = Arc::new(AtomicUsize::new(0));

    tokio::spawn({
        let accepts = accepts.clone();
        async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                accepts.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve_http(stream, StatusCode::OK, body));
            }
        }
    });

    TestServer { addr, accepts }
}

/// TLS HTTP/1.1 server answering every request, `CONNECT` included, with
/// a fixed status and body. With `require_client_auth` the handshake
/// demands a client certificate signed by the test authority.
pub async fn tls_server(
    require_client_auth: bool,
    status: StatusCode,
    body: &'static str,
) -> TestServer {
    let acceptor = TlsAcceptor::from(server_tls_config(require_client_auth));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepts = Arc::new(AtomicUsize::new(0));

    tokio::spawn({
        let accepts = accepts.clone();
        async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                accepts.fetch_add(1, Ordering::SeqCst);
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    match acceptor.accept(stream).await {
                        Ok(stream) => serve_http(stream, status, body).await,
                        // Rejected handshakes are the point of some tests.
                        Err(_) => {}
                    }
                });
            }
        }
    });

    TestServer { addr, accepts }
}

/// Server that writes a canned byte sequence to each connection and then
/// closes it, for provoking parse and truncation failures.
pub async fn raw_server(response: &'static [u8]) -> TestServer {
    raw_server_inner(response, false).await
}

/// Like [`raw_server`], but holds the connection open after writing so
/// the response body never completes.
pub async fn stalling_server(response: &'static [u8]) -> TestServer {
    raw_server_inner(response, true).await
}

async fn raw_server_inner(response: &'static [u8], stall: bool) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepts = Arc::new(AtomicUsize::new(0));

    tokio::spawn({
        let accepts = accepts.clone();
        async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                accepts.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    // Consume the request head before answering.
                    let mut buf = [0u8; 1024];
                    let _ = stream.read(&mut buf).await;
                    let _ = stream.write_all(response).await;
                    let _ = stream.flush().await;
                    if stall {
                        let mut drain = [0u8; 64];
                        while matches!(stream.read(&mut drain).await, Ok(n) if n > 0) {}
                    }
                });
            }
        }
    });

    TestServer { addr, accepts }
}

async fn serve_http<S>(stream: S, status: StatusCode, body: &'static str)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |_request: http::Request<Incoming>| async move {
        http::Response::builder()
            .status(status)
            .body(Full::new(Bytes::from_static(body.as_bytes())))
    });
    let _ = hyper::server::conn::http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .await;
}

fn server_tls_config(require_client_auth: bool) -> Arc<rustls::ServerConfig> {
    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut BufReader::new(SERVER_CERT_PEM.as_bytes()))
            .collect::<Result<_, _>>()
            .unwrap();
    let key: PrivateKeyDer<'static> =
        rustls_pemfile::private_key(&mut BufReader::new(SERVER_KEY_PEM.as_bytes()))
            .unwrap()
            .unwrap();

    let builder = if require_client_auth {
        let mut roots = rustls::RootCertStore::empty();
        let authority: Vec<CertificateDer<'static>> =
            rustls_pemfile::certs(&mut BufReader::new(CA_PEM.as_bytes()))
                .collect::<Result<_, _>>()
                .unwrap();
        roots.add_parsable_certificates(authority);
        let verifier = rustls::server::WebPkiClientVerifier::builder(Arc::new(roots))
            .build()
            .unwrap();
        rustls::ServerConfig::builder().with_client_cert_verifier(verifier)
    } else {
        rustls::ServerConfig::builder().with_no_client_auth()
    };

    Arc::new(builder.with_single_cert(certs, key).unwrap())
}

/// What a handler observed, in order.
#[derive(Debug)]
pub enum Event {
    Headers(StatusCode),
    Chunk(Bytes),
    Complete,
    Error(ErrorKind),
}

/// Handler that records every callback for later assertions.
pub struct RecordingHandler {
    events: Arc<Mutex<Vec<Event>>>,
}

impl RecordingHandler {
    pub fn new() -> (Self, Arc<Mutex<Vec<Event>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                events: events.clone(),
            },
            events,
        )
    }
}

impl ResponseHandler for RecordingHandler {
    fn on_headers(&mut self, head: ResponseHead) {
        self.events.lock().push(Event::Headers(head.status));
    }

    fn on_body_chunk(&mut self, chunk: Bytes) {
        self.events.lock().push(Event::Chunk(chunk));
    }

    fn on_complete(&mut self) {
        self.events.lock().push(Event::Complete);
    }

    fn on_error(&mut self, error: &Error) {
        self.events.lock().push(Event::Error(error.kind()));
    }
}
