//! Error surface for configuration loading, migration and persistence.

use std::io;

use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors raised while loading, merging or writing the daemon configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading the configuration file failed.
    #[error("failed to read configuration file '{path}': {source}")]
    Read {
        /// Configuration file path.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The file is not valid YAML.
    #[error("failed to parse configuration file '{path}': {message}")]
    Parse {
        /// Configuration file path.
        path: Utf8PathBuf,
        /// Parser diagnostic.
        message: String,
    },
    /// The document did not have the single top-level key holding the daemon.
    #[error("configuration file '{path}' must contain exactly one top-level key, found {found}")]
    Shape {
        /// Configuration file path.
        path: Utf8PathBuf,
        /// Number of top-level keys present.
        found: usize,
    },
    /// A migration step rejected the stored document.
    #[error("failed to migrate configuration file '{path}': {source}")]
    Migration {
        /// Configuration file path.
        path: Utf8PathBuf,
        /// Underlying migration error.
        #[source]
        source: MigrationError,
    },
    /// The migrated document did not match the configuration model.
    #[error("configuration file '{path}' is invalid: {message}")]
    Schema {
        /// Configuration file path.
        path: Utf8PathBuf,
        /// Deserialiser diagnostic.
        message: String,
    },
    /// Command-line parsing failed or help/version output was requested.
    #[error(transparent)]
    Cli(#[from] clap::Error),
    /// A dynamic listener override could not be parsed.
    #[error("invalid override '{argument}': {reason}")]
    Override {
        /// Offending argument.
        argument: String,
        /// Why the override was rejected.
        reason: String,
    },
    /// A dynamic override referenced a listener that is not configured.
    #[error("override '{argument}' names unknown listener '{listener}'")]
    UnknownListener {
        /// Offending argument.
        argument: String,
        /// Listener named by the override.
        listener: String,
    },
    /// Serialising the configuration failed.
    #[error("failed to serialise configuration: {message}")]
    Serialise {
        /// Serialiser diagnostic.
        message: String,
    },
    /// Writing the configuration file failed.
    #[error("failed to write configuration file '{path}': {source}")]
    Write {
        /// Configuration file path.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The current directory could not be resolved.
    #[error("failed to resolve the working directory: {source}")]
    WorkingDirectory {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A path was not valid UTF-8.
    #[error("path '{path}' is not valid UTF-8")]
    NonUtf8Path {
        /// Lossy rendering of the path.
        path: String,
    },
    /// The daemon name was not set before it was needed.
    #[error("daemon name must be set before the configuration is applied")]
    MissingName,
    /// The configured secret is too short for cookie encryption.
    #[error("secret must be at least {minimum} bytes for cookie encryption, found {actual}")]
    SecretTooShort {
        /// Minimum accepted length.
        minimum: usize,
        /// Length of the configured secret.
        actual: usize,
    },
    /// A registry operation failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// Resolving a user or group name failed.
    #[error(transparent)]
    Identity(#[from] IdentityError),
}

/// Errors raised by a migration step.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The stored version is newer than this build understands.
    #[error("file version {stored} is newer than the supported version {current}")]
    FromFuture {
        /// Version recorded in the file.
        stored: u64,
        /// Version understood by this build.
        current: u32,
    },
    /// The version tag was not an unsigned integer.
    #[error("file_version must be an unsigned integer, found {found}")]
    InvalidVersion {
        /// Rendering of the offending value.
        found: String,
    },
    /// A section had an unexpected shape.
    #[error("'{section}' must be {expected}")]
    UnexpectedShape {
        /// Section of the document being migrated.
        section: &'static str,
        /// Description of the expected shape.
        expected: &'static str,
    },
}

/// Errors raised by named registries.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The requested entry exists but is disabled.
    #[error("service '{name}' is disabled")]
    ServiceDisabled {
        /// Name of the disabled entry.
        name: String,
    },
    /// Two entries share a name.
    #[error("duplicate {kind} name '{name}'")]
    DuplicateName {
        /// Registry kind, such as `listener` or `store`.
        kind: &'static str,
        /// Repeated name.
        name: String,
    },
}

/// Errors raised while resolving user and group identities.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// No user with the given name exists.
    #[error("unknown user '{name}'")]
    UnknownUser {
        /// Requested user.
        name: String,
    },
    /// No group with the given name exists.
    #[error("unknown group '{name}'")]
    UnknownGroup {
        /// Requested group.
        name: String,
    },
    /// The system user or group database could not be read.
    #[error("failed to query the account database for '{name}': {message}")]
    Lookup {
        /// Requested user or group.
        name: String,
        /// Error reported by the system.
        message: String,
    },
    /// Name lookups are not available on this platform.
    #[error("resolving '{name}' by name is unsupported on this platform")]
    Unsupported {
        /// Requested user or group.
        name: String,
    },
}
