//! TLS session negotiation.
//!
//! The [`TlsNegotiator`] owns the client-side encryption state: it builds
//! a [`rustls::ClientConfig`] from the configured key and trust providers
//! on first use, and wraps raw streams in authenticated TLS sessions. No
//! other component touches the raw socket once negotiation starts.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rustls::pki_types::ServerName;
use tracing::trace;

use super::stream::Stream;
use crate::tls::{KeyMaterialProvider, TlsConfigId, TrustProvider};
use crate::Error;

pub(crate) struct TlsNegotiator {
    keys: Arc<dyn KeyMaterialProvider>,
    trust: TrustProvider,
    id: TlsConfigId,
    // Built lazily so late-bound providers (environment-backed key
    // material) are read at first use, not at client construction.
    config: Mutex<Option<Arc<rustls::ClientConfig>>>,
}

impl TlsNegotiator {
    pub(crate) fn new(keys: Arc<dyn KeyMaterialProvider>, trust: TrustProvider) -> Self {
        Self {
            keys,
            trust,
            id: TlsConfigId::next(),
            config: Mutex::new(None),
        }
    }

    /// The identity of this negotiator's configuration, for pool keying.
    pub(crate) fn id(&self) -> TlsConfigId {
        self.id
    }

    fn config(&self) -> Result<Arc<rustls::ClientConfig>, Error> {
        let mut slot = self.config.lock();
        if let Some(config) = slot.as_ref() {
            return Ok(config.clone());
        }

        let config = Arc::new(crate::tls::client_config(self.keys.as_ref(), &self.trust)?);
        *slot = Some(config.clone());
        Ok(config)
    }

    /// Negotiate a TLS session over `stream`, verifying `server_name`.
    #[tracing::instrument(level = "debug", skip(self, stream), fields(id = %self.id))]
    pub(crate) async fn negotiate(
        &self,
        stream: Stream,
        server_name: &str,
    ) -> Result<Stream, Error> {
        let config = self.config()?;
        let name = ServerName::try_from(server_name.to_owned()).map_err(Error::handshake)?;

        let connector = tokio_rustls::TlsConnector::from(config);
        let session = connector
            .connect(name, stream)
            .await
            .map_err(Error::handshake)?;

        trace!("tls negotiated");
        Ok(session.into())
    }
}

impl fmt::Debug for TlsNegotiator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsNegotiator")
            .field("keys", &self.keys)
            .field("id", &self.id)
            .finish()
    }
}

/// Whether a rustls failure sits anywhere in this error's source chain.
///
/// Under TLS 1.3 a server rejecting the client certificate surfaces after
/// the local handshake completed, as an alert raised on the first read.
/// Callers use this to classify such failures as handshake rejections
/// rather than generic connection errors.
pub(crate) fn is_tls_rejection(error: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(error);
    while let Some(err) = current {
        if err.is::<rustls::Error>() {
            return true;
        }
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            if let Some(inner) = io.get_ref() {
                if inner.is::<rustls::Error>() {
                    return true;
                }
            }
        }
        current = err.source();
    }
    false
}
