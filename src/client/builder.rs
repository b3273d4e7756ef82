//! Configure and construct a [`Client`].

use std::sync::Arc;
use std::time::Duration;

use super::conn::TcpConfig;
use super::{pool, Client, ProxyConfig};
use crate::tls::{EnvKeyMaterial, KeyMaterialProvider, TrustProvider};
use crate::Error;

/// Configure and build a [`Client`].
///
/// Misconfiguration is reported synchronously by [`build`](Builder::build);
/// nothing touches the network until the first request.
#[derive(Debug)]
pub struct Builder {
    tcp: TcpConfig,
    pool: pool::Config,
    proxy: Option<http::Uri>,
    keys: Arc<dyn KeyMaterialProvider>,
    trust: TrustProvider,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            tcp: TcpConfig::default(),
            pool: pool::Config::default(),
            proxy: None,
            keys: Arc::new(EnvKeyMaterial),
            trust: TrustProvider::default(),
        }
    }
}

impl Builder {
    /// Route all requests through a forward proxy. The proxy address is
    /// an `http` or `https` URI; with `https` the connection to the
    /// proxy itself is negotiated over TLS before the `CONNECT` request
    /// is sent.
    pub fn proxy(mut self, proxy: http::Uri) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Supply the client key material used for mutual TLS.
    ///
    /// Passing `None` keeps the default provider, which reads the
    /// `TOWLINE_KEY_STORE` family of environment variables at
    /// negotiation time. To opt out of client authentication entirely,
    /// pass [`NoKeyMaterial`](crate::tls::NoKeyMaterial).
    pub fn key_material(mut self, provider: Option<Arc<dyn KeyMaterialProvider>>) -> Self {
        if let Some(provider) = provider {
            self.keys = provider;
        }
        self
    }

    /// Override the trust anchors used to verify server certificates.
    /// The default trusts the platform's certificate store.
    pub fn trust(mut self, trust: TrustProvider) -> Self {
        self.trust = trust;
        self
    }

    /// Time limit for establishing a TCP connection.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.tcp.connect_timeout = Some(timeout);
        self
    }

    /// Idle connections retained per destination.
    pub fn max_idle_per_key(mut self, max: usize) -> Self {
        self.pool.max_idle_per_key = max;
        self
    }

    /// Total live connections per destination. Requests beyond this wait
    /// for a connection to be returned.
    pub fn max_connections_per_key(mut self, max: usize) -> Self {
        self.pool.max_per_key = max;
        self
    }

    /// Total live connections across every destination. At this cap a
    /// request first evicts an idle connection of another destination,
    /// and otherwise waits for a slot to free anywhere in the pool.
    pub fn max_total_connections(mut self, max: usize) -> Self {
        self.pool.max_total = max;
        self
    }

    /// Discard idle connections older than this on checkout. `None`
    /// keeps them until the peer closes.
    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.pool.idle_timeout = timeout;
        self
    }

    /// Build the client, validating the configuration.
    pub fn build(self) -> Result<Client, Error> {
        let proxy = self.proxy.map(ProxyConfig::from_uri).transpose()?;
        Ok(Client::new(self.tcp, self.pool, proxy, self.keys, self.trust))
    }
}

impl ProxyConfig {
    fn from_uri(uri: http::Uri) -> Result<Self, Error> {
        let https = match uri.scheme_str() {
            Some("http") => false,
            Some("https") => true,
            other => {
                return Err(Error::configuration(format!(
                    "unsupported proxy scheme {:?}",
                    other.unwrap_or("none")
                )))
            }
        };
        let host = uri
            .host()
            .ok_or_else(|| Error::configuration("proxy uri has no host"))?
            .to_owned();
        let port = uri
            .port_u16()
            .unwrap_or(if https { 443 } else { 80 });

        Ok(Self {
            key: format!("{}://{host}:{port}", if https { "https" } else { "http" }),
            host,
            port,
            https,
        })
    }
}
