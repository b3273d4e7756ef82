//! TCP dialing for client connections.

use std::time::Duration;

use tokio::net::TcpStream;
use tracing::{trace, Instrument};

use crate::Error;

/// Configuration for TCP connections.
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// The timeout for connecting to a remote address.
    pub connect_timeout: Option<Duration>,

    /// Whether to disable Nagle's algorithm.
    pub nodelay: bool,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Some(Duration::from_secs(10)),
            nodelay: true,
        }
    }
}

/// Dials TCP connections to remote hosts.
#[derive(Debug, Clone, Default)]
pub(crate) struct TcpConnector {
    config: TcpConfig,
}

impl TcpConnector {
    pub(crate) fn new(config: TcpConfig) -> Self {
        Self { config }
    }

    /// Connect to a host and port, trying each resolved address in turn.
    pub(crate) async fn connect(&self, host: &str, port: u16) -> Result<TcpStream, Error> {
        let span = tracing::trace_span!("tcp", host = %host, port = %port);
        async {
            let addrs = tokio::net::lookup_host((host, port))
                .await
                .map_err(Error::connection)?;

            let mut last_error = None;
            for addr in addrs {
                match self.attempt(addr).await {
                    Ok(stream) => {
                        trace!(peer.addr = %addr, "tcp connected");
                        if self.config.nodelay {
                            let _ = stream.set_nodelay(true);
                        }
                        return Ok(stream);
                    }
                    Err(error) => {
                        trace!(peer.addr = %addr, %error, "tcp connect attempt failed");
                        last_error = Some(error);
                    }
                }
            }

            Err(Error::connection(last_error.map_or_else(
                || format!("no addresses resolved for {host}:{port}").into(),
                |error| Box::new(error) as crate::BoxError,
            )))
        }
        .instrument(span)
        .await
    }

    async fn attempt(&self, addr: std::net::SocketAddr) -> std::io::Result<TcpStream> {
        let connect = TcpStream::connect(addr);
        match self.config.connect_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, connect).await {
                Ok(outcome) => outcome,
                Err(elapsed) => {
                    trace!(?timeout, "connection attempt timed out");
                    Err(std::io::Error::new(std::io::ErrorKind::TimedOut, elapsed))
                }
            },
            None => connect.await,
        }
    }
}
