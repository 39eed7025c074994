//! Error types for listener operations.

use std::io;
use std::net::SocketAddr;

use axon_config::TransportKind;
use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors surfaced while binding or running a listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to resolve address {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("no {transport} addresses resolved for {host}:{port}")]
    ResolveEmpty {
        host: String,
        port: u16,
        transport: TransportKind,
    },
    #[error("failed to prepare socket for {addr}: {source}")]
    Socket {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to bind TCP listener at {addr}: {source}")]
    BindTcp {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to bind UDP socket at {addr}: {source}")]
    BindUdp {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to enable non-blocking listener: {source}")]
    NonBlocking {
        #[source]
        source: io::Error,
    },
    #[error("unix listener '{listener}' has no socket path")]
    MissingSocketPath { listener: String },
    #[error("failed to bind unix listener at {path}: {source}")]
    BindUnix {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("existing unix socket {path} is already in use")]
    UnixInUse { path: Utf8PathBuf },
    #[error("unix socket path {path} is not a socket")]
    UnixNotSocket { path: Utf8PathBuf },
    #[error("failed to read metadata for unix socket {path}: {source}")]
    UnixMetadata {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to connect to existing unix socket {path}: {source}")]
    UnixConnect {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to remove stale unix socket {path}: {source}")]
    UnixCleanup {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("TLS listener '{listener}' has no {material} configured")]
    TlsMissing {
        listener: String,
        material: &'static str,
    },
    #[error("failed to read TLS material {path}: {source}")]
    TlsMaterial {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no private key found in {path}")]
    TlsNoKey { path: Utf8PathBuf },
    #[error("invalid TLS configuration: {0}")]
    Tls(#[from] rustls::Error),
    #[error("invalid client verification settings: {message}")]
    TlsVerifier { message: String },
    #[error("listener '{listener}' already has a handler")]
    AlreadyAttached { listener: String },
    #[error("listener '{listener}' is not listening")]
    NotListening { listener: String },
    #[error("failed to spawn listener thread: {source}")]
    Spawn {
        #[source]
        source: io::Error,
    },
    #[error("listener thread panicked")]
    ThreadPanic,
}
