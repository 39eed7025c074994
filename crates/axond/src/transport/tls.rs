//! TLS server configuration for encrypted listeners.

use std::fs::{self, File};
use std::io::BufReader;
use std::sync::Arc;

use axon_config::TlsConfig;
use camino::{Utf8Path, Utf8PathBuf};
use rustls::RootCertStore;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::{ServerConfig, WebPkiClientVerifier};
use tracing::{debug, warn};

use super::{LISTENER_TARGET, ListenerError};

/// Builds the rustls server configuration for `listener`.
///
/// Client certificates are required when `verify` is set, checked against
/// `cacert` and every PEM file under `cacert_path`.
pub(crate) fn server_config(
    listener: &str,
    tls: &TlsConfig,
) -> Result<Arc<ServerConfig>, ListenerError> {
    let cert_path = tls.cert.as_deref().ok_or_else(|| ListenerError::TlsMissing {
        listener: listener.to_owned(),
        material: "certificate",
    })?;
    let key_path = tls.key.as_deref().ok_or_else(|| ListenerError::TlsMissing {
        listener: listener.to_owned(),
        material: "private key",
    })?;

    let chain = load_certs(cert_path)?;
    let key = load_key(key_path)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()?;

    let config = if tls.verify {
        let roots = client_roots(listener, tls)?;
        if tls.verdepth.is_some() {
            warn!(
                target: LISTENER_TARGET,
                listener,
                "verification depth is not configurable and will be ignored"
            );
        }
        builder
            .with_client_cert_verifier(client_verifier(roots, provider)?)
            .with_single_cert(chain, key)?
    } else {
        builder.with_no_client_auth().with_single_cert(chain, key)?
    };

    debug!(
        target: LISTENER_TARGET,
        listener,
        cert = %cert_path,
        verify = tls.verify,
        "TLS configuration loaded"
    );
    Ok(Arc::new(config))
}

fn client_verifier(
    roots: RootCertStore,
    provider: Arc<CryptoProvider>,
) -> Result<Arc<dyn rustls::server::danger::ClientCertVerifier>, ListenerError> {
    WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
        .build()
        .map_err(|error| ListenerError::TlsVerifier {
            message: error.to_string(),
        })
}

fn client_roots(listener: &str, tls: &TlsConfig) -> Result<RootCertStore, ListenerError> {
    let mut files: Vec<Utf8PathBuf> = tls.cacert.iter().cloned().collect();
    if let Some(dir) = &tls.cacert_path {
        let entries = fs::read_dir(dir).map_err(|source| ListenerError::TlsMaterial {
            path: dir.clone(),
            source,
        })?;
        let mut found: Vec<Utf8PathBuf> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| Utf8PathBuf::from_path_buf(entry.path()).ok())
            .filter(|path| path.is_file())
            .collect();
        found.sort();
        files.extend(found);
    }

    let mut roots = RootCertStore::empty();
    for path in &files {
        for cert in load_certs(path)? {
            if let Err(error) = roots.add(cert) {
                warn!(
                    target: LISTENER_TARGET,
                    listener,
                    path = %path,
                    error = %error,
                    "skipping unusable client CA certificate"
                );
            }
        }
    }
    if roots.is_empty() {
        return Err(ListenerError::TlsMissing {
            listener: listener.to_owned(),
            material: "client certificate authority",
        });
    }
    Ok(roots)
}

fn open(path: &Utf8Path) -> Result<BufReader<File>, ListenerError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| ListenerError::TlsMaterial {
            path: path.to_path_buf(),
            source,
        })
}

fn load_certs(path: &Utf8Path) -> Result<Vec<CertificateDer<'static>>, ListenerError> {
    let mut reader = open(path)?;
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| ListenerError::TlsMaterial {
            path: path.to_path_buf(),
            source,
        })
}

fn load_key(path: &Utf8Path) -> Result<PrivateKeyDer<'static>, ListenerError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| ListenerError::TlsMaterial {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| ListenerError::TlsNoKey {
            path: path.to_path_buf(),
        })
}
