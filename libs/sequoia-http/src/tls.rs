//! TLS configuration for the HTTP client.
//!
//! Native roots are loaded once and cached, since OS certificate store
//! lookups can be slow. Mutual TLS material is read from PEM files every
//! time a client is built so rotated certificates are picked up.

use crate::config::MutualTlsConfig;
use crate::error::HttpError;
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use std::path::Path;
use std::sync::{Arc, OnceLock};

/// Always holds `Ok`-equivalent data; empty means nothing was found.
static NATIVE_ROOTS_CACHE: OnceLock<Vec<CertificateDer<'static>>> = OnceLock::new();

fn load_native_certs_inner() -> Vec<CertificateDer<'static>> {
    let result = rustls_native_certs::load_native_certs();

    for err in &result.errors {
        tracing::warn!(error = %err, "error loading native root certificate");
    }

    if result.certs.is_empty() {
        tracing::warn!("no native root CA certificates found");
    } else {
        tracing::debug!(count = result.certs.len(), "loaded native root certificates");
    }

    result.certs
}

/// Cached native root certificates (may be empty).
pub fn native_root_certs() -> &'static [CertificateDer<'static>] {
    NATIVE_ROOTS_CACHE
        .get_or_init(load_native_certs_inner)
        .as_slice()
}

/// The globally installed crypto provider, or a fresh aws-lc-rs one.
///
/// Never installs a global default itself.
pub fn get_crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

fn tls_error(msg: String) -> HttpError {
    HttpError::Tls(msg.into())
}

/// Build a rustls `ClientConfig` trusting the cached native roots.
///
/// # Errors
///
/// Returns `HttpError::Tls` if the OS store is empty or nothing in it parses.
pub fn native_roots_client_config() -> Result<rustls::ClientConfig, HttpError> {
    let certs = native_root_certs();
    if certs.is_empty() {
        return Err(tls_error(
            "no native root CA certificates found in OS certificate store".to_owned(),
        ));
    }

    let mut root_store = rustls::RootCertStore::empty();
    let (added, ignored) = root_store.add_parsable_certificates(certs.iter().cloned());
    if ignored > 0 {
        tracing::warn!(added, ignored, "some native root certificates could not be parsed");
    }
    if added == 0 {
        return Err(tls_error(format!(
            "no valid native root CA certificates parsed ({ignored} rejected)"
        )));
    }

    rustls::ClientConfig::builder_with_provider(get_crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| HttpError::Tls(Box::new(e)))
        .map(|builder| {
            builder
                .with_root_certificates(root_store)
                .with_no_client_auth()
        })
}

fn read_cert_chain(path: &Path) -> Result<Vec<CertificateDer<'static>>, HttpError> {
    let chain = CertificateDer::pem_file_iter(path)
        .and_then(|certs| certs.collect::<Result<Vec<_>, _>>())
        .map_err(|e| tls_error(format!("cannot read certificates from {}: {e}", path.display())))?;

    if chain.is_empty() {
        return Err(tls_error(format!(
            "no PEM certificates found in {}",
            path.display()
        )));
    }
    Ok(chain)
}

fn read_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, HttpError> {
    PrivateKeyDer::from_pem_file(path)
        .map_err(|e| tls_error(format!("cannot read private key from {}: {e}", path.display())))
}

/// Build a rustls `ClientConfig` for mutual TLS.
///
/// The server certificate file is the sole trust anchor; the client chain and key
/// are offered during the handshake.
///
/// # Errors
///
/// Returns `HttpError::Tls` if any file is unreadable, holds no PEM material,
/// or the key does not match the certificate.
pub fn mutual_tls_client_config(
    config: &MutualTlsConfig,
) -> Result<rustls::ClientConfig, HttpError> {
    let server_certs = read_cert_chain(&config.server_cert_path)?;
    let client_chain = read_cert_chain(&config.client_cert_path)?;
    let client_key = read_private_key(&config.client_key_path)?;

    let mut root_store = rustls::RootCertStore::empty();
    let (added, _) = root_store.add_parsable_certificates(server_certs);
    if added == 0 {
        return Err(tls_error(format!(
            "server certificate in {} could not be parsed",
            config.server_cert_path.display()
        )));
    }

    tracing::debug!(
        server_cert = %config.server_cert_path.display(),
        client_cert = %config.client_cert_path.display(),
        "configuring mutual TLS"
    );

    rustls::ClientConfig::builder_with_provider(get_crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| HttpError::Tls(Box::new(e)))?
        .with_root_certificates(root_store)
        .with_client_auth_cert(client_chain, client_key)
        .map_err(|e| HttpError::Tls(Box::new(e)))
}
