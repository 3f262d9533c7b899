//! Server-side TLS material loading.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use thiserror::Error;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

use crate::config::TlsConfig;

/// Errors while building a TLS acceptor. These are configuration errors and
/// fatal at startup: a misconfigured TLS listener must not come up.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse PEM in {path}: {source}")]
    Pem {
        path: String,
        source: std::io::Error,
    },

    #[error("no usable private key found in {0}")]
    NoPrivateKey(String),

    #[error("rejected certificate/key pair: {0}")]
    Material(#[from] tokio_rustls::rustls::Error),
}

/// Load a certificate/key pair into an acceptor shared by the TLS-flavored
/// listeners.
pub fn load_acceptor(tls: &TlsConfig) -> Result<TlsAcceptor, TlsError> {
    let certs = load_certs(&tls.cert_path)?;
    let key = load_private_key(&tls.key_path)?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = File::open(path).map_err(|source| TlsError::Open {
        path: path.to_string(),
        source,
    })?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Pem {
            path: path.to_string(),
            source,
        })
}

fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>, TlsError> {
    let file = File::open(path).map_err(|source| TlsError::Open {
        path: path.to_string(),
        source,
    })?;
    let mut reader = BufReader::new(file);

    for item in rustls_pemfile::read_all(&mut reader) {
        let item = item.map_err(|source| TlsError::Pem {
            path: path.to_string(),
            source,
        })?;
        match item {
            rustls_pemfile::Item::Pkcs8Key(key) => return Ok(PrivateKeyDer::Pkcs8(key)),
            rustls_pemfile::Item::Pkcs1Key(key) => return Ok(PrivateKeyDer::Pkcs1(key)),
            rustls_pemfile::Item::Sec1Key(key) => return Ok(PrivateKeyDer::Sec1(key)),
            _ => continue,
        }
    }

    Err(TlsError::NoPrivateKey(path.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_certificate_file_is_an_open_error() {
        let tls = TlsConfig {
            cert_path: "/nonexistent/cert.pem".into(),
            key_path: "/nonexistent/key.pem".into(),
        };
        assert!(matches!(load_acceptor(&tls), Err(TlsError::Open { .. })));
    }

    #[test]
    fn key_file_without_a_key_is_rejected() {
        let dir = std::env::temp_dir();
        let cert_path = dir.join("netgate-tls-test-cert.pem");
        let key_path = dir.join("netgate-tls-test-empty.pem");
        std::fs::write(&cert_path, "").unwrap();
        std::fs::write(&key_path, "").unwrap();

        let tls = TlsConfig {
            cert_path: cert_path.to_string_lossy().into_owned(),
            key_path: key_path.to_string_lossy().into_owned(),
        };
        assert!(matches!(load_acceptor(&tls), Err(TlsError::NoPrivateKey(_))));

        let _ = std::fs::remove_file(&cert_path);
        let _ = std::fs::remove_file(&key_path);
    }
}
