//! Client key material providers for mutual TLS.
//!
//! A [`KeyMaterialProvider`] supplies the private key and certificate chain
//! presented to the server during the TLS handshake. Four variants exist:
//!
//! - [`NoKeyMaterial`]: never presents a client certificate. Servers
//!   requiring mutual TLS will reject the handshake.
//! - [`FileStoreKeyMaterial`]: loads key and chain from a PEM store on
//!   disk at construction, failing fast on unreadable or unparsable
//!   stores.
//! - [`EnvKeyMaterial`]: reads the store location from the process
//!   environment each time [`materials`][KeyMaterialProvider::materials]
//!   is invoked. This is the default provider when none is configured.
//! - Any caller-supplied type implementing the trait.

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use crate::Error;

/// Environment variable naming the PEM store read by [`EnvKeyMaterial`].
pub const KEY_STORE_VAR: &str = "TOWLINE_KEY_STORE";

/// Environment variable naming the store format (defaults to `pem`).
pub const KEY_STORE_TYPE_VAR: &str = "TOWLINE_KEY_STORE_TYPE";

/// Environment variable carrying the store passphrase.
pub const KEY_STORE_PASSWORD_VAR: &str = "TOWLINE_KEY_STORE_PASSWORD";

/// A private key and the certificate chain proving its identity.
pub struct KeyMaterial {
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

impl KeyMaterial {
    /// Create key material from a certificate chain and private key.
    pub fn new(chain: Vec<CertificateDer<'static>>, key: PrivateKeyDer<'static>) -> Self {
        Self { chain, key }
    }

    pub(crate) fn into_parts(self) -> (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>) {
        (self.chain, self.key)
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("chain", &self.chain.len())
            .field("key", &"[redacted]")
            .finish()
    }
}

/// Supplies the client identity credentials used for mutual TLS.
///
/// `materials` is invoked when the client builds its TLS configuration
/// (at first negotiation, not at client construction), so late-bound
/// providers can reflect environment changes made after construction.
pub trait KeyMaterialProvider: Send + Sync + fmt::Debug {
    /// Return the current key material, or `None` to proceed without a
    /// client certificate.
    fn materials(&self) -> Result<Option<KeyMaterial>, Error>;
}

/// Format tag for an on-disk key store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum StoreFormat {
    /// A PEM bundle holding the private key and certificate chain.
    Pem,
}

impl FromStr for StoreFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pem" => Ok(StoreFormat::Pem),
            other => Err(Error::configuration(format!(
                "unsupported key store format {other:?} (supported: pem)"
            ))),
        }
    }
}

/// Provider which never presents a client certificate.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoKeyMaterial;

impl KeyMaterialProvider for NoKeyMaterial {
    fn materials(&self) -> Result<Option<KeyMaterial>, Error> {
        Ok(None)
    }
}

/// Provider backed by a key store file, loaded once at construction.
#[derive(Debug)]
pub struct FileStoreKeyMaterial {
    path: PathBuf,
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

impl FileStoreKeyMaterial {
    /// Load key material from the store at `path`.
    ///
    /// The store is read and parsed eagerly; an unreadable file or a store
    /// without both a private key and a certificate chain fails here with
    /// a [`Configuration`][Error::Configuration] error rather than at
    /// first use. PEM stores carry no passphrase, so `passphrase` is
    /// accepted for interface symmetry and encrypted stores are rejected.
    pub fn load(
        path: impl AsRef<Path>,
        format: StoreFormat,
        passphrase: Option<&str>,
    ) -> Result<Self, Error> {
        let path = path.as_ref();
        let _ = passphrase;
        match format {
            StoreFormat::Pem => {
                let (chain, key) = read_pem_store(path)?;
                Ok(Self {
                    path: path.to_owned(),
                    chain,
                    key,
                })
            }
        }
    }

    /// The path this store was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyMaterialProvider for FileStoreKeyMaterial {
    fn materials(&self) -> Result<Option<KeyMaterial>, Error> {
        Ok(Some(KeyMaterial::new(
            self.chain.clone(),
            self.key.clone_key(),
        )))
    }
}

/// Provider reading the store location from the process environment.
///
/// The `TOWLINE_KEY_STORE`, `TOWLINE_KEY_STORE_TYPE` and
/// `TOWLINE_KEY_STORE_PASSWORD` variables are read inside `materials()`,
/// not at construction, so a client built before the variables were set
/// still picks them up on its first handshake. An unset store variable
/// means "no client certificate".
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvKeyMaterial;

impl KeyMaterialProvider for EnvKeyMaterial {
    fn materials(&self) -> Result<Option<KeyMaterial>, Error> {
        let Some(path) = env_var(KEY_STORE_VAR) else {
            return Ok(None);
        };

        let format = match env_var(KEY_STORE_TYPE_VAR) {
            Some(tag) => tag.parse()?,
            None => StoreFormat::Pem,
        };
        let passphrase = env_var(KEY_STORE_PASSWORD_VAR);

        let store = FileStoreKeyMaterial::load(path, format, passphrase.as_deref())?;
        store.materials()
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn read_pem_store(
    path: &Path,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), Error> {
    let file = File::open(path).map_err(|error| {
        Error::configuration(format!("unreadable key store {}: {error}", path.display()))
    })?;
    let mut reader = BufReader::new(file);

    let mut chain = Vec::new();
    let mut key = None;

    for item in rustls_pemfile::read_all(&mut reader) {
        match item.map_err(|error| {
            Error::configuration(format!(
                "malformed key store {}: {error}",
                path.display()
            ))
        })? {
            rustls_pemfile::Item::X509Certificate(cert) => chain.push(cert),
            rustls_pemfile::Item::Pkcs8Key(der) => key = Some(PrivateKeyDer::Pkcs8(der)),
            rustls_pemfile::Item::Pkcs1Key(der) => key = Some(PrivateKeyDer::Pkcs1(der)),
            rustls_pemfile::Item::Sec1Key(der) => key = Some(PrivateKeyDer::Sec1(der)),
            _ => {}
        }
    }

    let key = key.ok_or_else(|| {
        Error::configuration(format!(
            "key store {} holds no usable private key (encrypted stores are not supported)",
            path.display()
        ))
    })?;

    if chain.is_empty() {
        return Err(Error::configuration(format!(
            "key store {} holds no certificate chain",
            path.display()
        )));
    }

    Ok((chain, key))
}
