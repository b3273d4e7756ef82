//! Key material, trust material, and TLS configuration assembly.
//!
//! The transport never implements certificate handling itself: it holds a
//! [`KeyMaterialProvider`] and a [`TrustProvider`] and assembles them into
//! a [`rustls::ClientConfig`] when the first handshake is needed.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::Error;

pub mod keys;
pub mod trust;

pub use keys::{
    EnvKeyMaterial, FileStoreKeyMaterial, KeyMaterial, KeyMaterialProvider, NoKeyMaterial,
    StoreFormat,
};
pub use trust::TrustProvider;

static TLS_CONFIG_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a TLS configuration, used in pool keys.
///
/// Two connections are only interchangeable when they were negotiated
/// under the same client configuration; the id tags each assembled
/// configuration so pooled connections never cross configurations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TlsConfigId(u64);

impl TlsConfigId {
    pub(crate) fn next() -> Self {
        Self(TLS_CONFIG_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TlsConfigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tls-{}", self.0)
    }
}

/// Assemble a client configuration from the given providers.
///
/// Presents a client certificate when the key material provider supplies
/// one; otherwise the handshake proceeds without client authentication
/// and mutual-TLS-requiring servers will reject it during negotiation.
pub(crate) fn client_config(
    keys: &dyn KeyMaterialProvider,
    trust: &TrustProvider,
) -> Result<rustls::ClientConfig, Error> {
    let roots = trust.root_store()?;
    let builder = rustls::ClientConfig::builder().with_root_certificates(roots);

    let mut config = match keys.materials()? {
        Some(materials) => {
            let (chain, key) = materials.into_parts();
            builder
                .with_client_auth_cert(chain, key)
                .map_err(Error::configuration)?
        }
        None => builder.with_no_client_auth(),
    };

    config.alpn_protocols.push(b"http/1.1".to_vec());
    Ok(config)
}
