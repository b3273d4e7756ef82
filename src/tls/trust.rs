//! Trust material used to validate the remote peer.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use rustls::RootCertStore;

use crate::Error;

/// Source of the trusted-issuer certificates for peer validation.
///
/// Defaults to the platform trust store. An explicit store (or a PEM
/// bundle loaded with [`TrustProvider::pem_file`]) overrides it.
#[derive(Debug, Clone, Default)]
pub enum TrustProvider {
    /// Load the platform's native certificate store.
    #[default]
    Platform,

    /// Use an explicit set of trusted roots.
    Store(RootCertStore),
}

impl TrustProvider {
    /// Load a trust override from a PEM certificate bundle.
    ///
    /// The bundle is read eagerly; an unreadable or empty bundle is a
    /// [`Configuration`][Error::Configuration] error.
    pub fn pem_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|error| {
            Error::configuration(format!(
                "unreadable trust bundle {}: {error}",
                path.display()
            ))
        })?;

        let mut roots = RootCertStore::empty();
        for cert in rustls_pemfile::certs(&mut BufReader::new(file)) {
            let cert = cert.map_err(|error| {
                Error::configuration(format!(
                    "malformed trust bundle {}: {error}",
                    path.display()
                ))
            })?;
            roots.add(cert).map_err(Error::configuration)?;
        }

        if roots.is_empty() {
            return Err(Error::configuration(format!(
                "trust bundle {} holds no certificates",
                path.display()
            )));
        }

        Ok(Self::Store(roots))
    }

    pub(crate) fn root_store(&self) -> Result<RootCertStore, Error> {
        match self {
            TrustProvider::Store(roots) => Ok(roots.clone()),
            TrustProvider::Platform => {
                let loaded = rustls_native_certs::load_native_certs();
                let mut roots = RootCertStore::empty();
                let (_added, _ignored) = roots.add_parsable_certificates(loaded.certs);

                if roots.is_empty() {
                    return match loaded.errors.into_iter().next() {
                        Some(error) => Err(Error::configuration(error)),
                        None => Err(Error::configuration("no platform trust roots found")),
                    };
                }

                Ok(roots)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write as _;

    use crate::ErrorKind;

    const CA_PEM: &str = include_str!("../../tests/minica/minica.pem");

    #[test]
    fn pem_file_loads_roots() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CA_PEM.as_bytes()).unwrap();
        file.flush().unwrap();

        let provider = TrustProvider::pem_file(file.path()).unwrap();
        let roots = provider.root_store().unwrap();
        assert_eq!(roots.len(), 1);
    }

    #[test]
    fn pem_file_missing_fails_fast() {
        let err = TrustProvider::pem_file("/nonexistent/roots.pem").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn pem_file_empty_fails_fast() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = TrustProvider::pem_file(file.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("no certificates"));
    }
}
