//! Credential loading.
//!
//! Files are read exactly once, while the configuration is resolved. The
//! raw PEM bytes travel inside the configuration values and are parsed into
//! rustls types by the composers.

use rustls::{Certificate, PrivateKey, RootCertStore};
use rustls_pemfile::Item;
use std::fs;
use std::io::BufReader;
use std::path::Path;

use crate::error::{EchoError, Result};

/// A certificate together with its private key, both PEM encoded.
///
/// Only constructible with both halves, so a certificate without its key
/// cannot reach the composers.
#[derive(Clone)]
pub struct CredentialPair {
    pub cert: Vec<u8>,
    pub key: Vec<u8>,
}

impl std::fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPair")
            .field("cert_len", &self.cert.len())
            .field("key", &"<redacted>")
            .finish()
    }
}

impl CredentialPair {
    /// Loads a certificate/key pair when both paths are given.
    ///
    /// Returns `Ok(None)` when neither is set and a configuration error
    /// when only one of them is.
    pub fn load(
        what: &str,
        cert_path: Option<&Path>,
        key_path: Option<&Path>,
    ) -> Result<Option<Self>> {
        match (cert_path, key_path) {
            (None, None) => Ok(None),
            (Some(cert), Some(key)) => {
                tracing::debug!("loading {} certificate: {:?}", what, cert);
                let cert = read_pem(cert)?;
                tracing::debug!("loading {} private key: {:?}", what, key);
                let key = read_pem(key)?;
                Ok(Some(Self { cert, key }))
            }
            (Some(_), None) => Err(EchoError::config(format!(
                "{} certificate specified without its private key",
                what
            ))),
            (None, Some(_)) => Err(EchoError::config(format!(
                "{} private key specified without its certificate",
                what
            ))),
        }
    }
}

/// Reads a PEM file into memory
pub fn read_pem(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    fs::read(path.as_ref()).map_err(|e| EchoError::credential_io(path.as_ref(), e))
}

/// Parses every certificate in a PEM buffer
pub fn parse_certs(pem: &[u8]) -> Result<Vec<Certificate>> {
    let mut reader = BufReader::new(pem);

    let certs: Vec<Certificate> = rustls_pemfile::certs(&mut reader)
        .map_err(|e| EchoError::config(format!("malformed certificate PEM: {}", e)))?
        .into_iter()
        .map(Certificate)
        .collect();

    if certs.is_empty() {
        return Err(EchoError::config("no certificates found in PEM data"));
    }

    Ok(certs)
}

/// Parses the first private key in a PEM buffer (PKCS#8, PKCS#1 or SEC1)
pub fn parse_private_key(pem: &[u8]) -> Result<PrivateKey> {
    let mut reader = BufReader::new(pem);

    let items = rustls_pemfile::read_all(&mut reader)
        .map_err(|e| EchoError::config(format!("malformed private key PEM: {}", e)))?;

    let mut keys: Vec<Vec<u8>> = items
        .into_iter()
        .filter_map(|item| match item {
            Item::PKCS8Key(key) | Item::RSAKey(key) | Item::ECKey(key) => Some(key),
            _ => None,
        })
        .collect();

    if keys.is_empty() {
        return Err(EchoError::config("no private keys found in PEM data"));
    }

    if keys.len() > 1 {
        tracing::warn!("multiple private keys found, using the first one");
    }

    Ok(PrivateKey(keys.remove(0)))
}

/// Builds a root store out of one or more PEM encoded CA bundles
pub fn root_store<'a>(bundles: impl IntoIterator<Item = &'a Vec<u8>>) -> Result<RootCertStore> {
    let mut root_store = RootCertStore::empty();

    for bundle in bundles {
        for cert in parse_certs(bundle)? {
            root_store
                .add(&cert)
                .map_err(|e| EchoError::config(format!("invalid CA certificate: {}", e)))?;
        }
    }

    if root_store.is_empty() {
        return Err(EchoError::config("no CA certificates provided"));
    }

    Ok(root_store)
}
