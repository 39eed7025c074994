//! Typed configuration record describing a daemon.

mod limits;
mod listener;
mod store;

use std::collections::BTreeSet;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::cli::ListenerOverride;
use crate::error::{ConfigError, IdentityError, RegistryError};
use crate::identity::{self, MIN_COOKIE_SECRET_LEN, Secret};
use crate::registry::NamedRegistry;

pub use limits::{LimitAction, LimitKind, Limits, LimitsChoice, TimedLimit, TimedLimits};
pub use listener::{
    DEFAULT_BACKLOG, DEFAULT_HOST, DEFAULT_VERIFY_DEPTH, HttpServerConfig, ListenerConfig,
    PlainServerConfig, ServerConfig, SiteMap, SslServerConfig, SubApp, TlsConfig, TransportKind,
};
pub use store::{
    DEFAULT_STORE_NAME, FileStoreConfig, LdapMethod, LdapStoreConfig, PoolClass,
    RelationalStoreConfig, StoreConfig,
};

/// Schema version written by this build.
pub const CONFIG_FILE_VERSION: u32 = 2;

/// Supported logging output formats.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// Structured JSON suitable for ingestion by logging stacks.
    Json,
    /// Human-readable single line output.
    #[default]
    Compact,
}

/// How often the log file is rotated.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, EnumString, Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum RotationPeriod {
    /// Rotate at the first write of each day.
    Daily,
    /// Rotate when the ISO week changes.
    Weekly,
    /// Rotate when the month changes.
    Monthly,
}

/// Compression applied to rotated log files.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, EnumString, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Compression {
    /// Gzip, producing `.gz` files.
    Gzip,
}

/// Log level of a [`Logger`] entry.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum LogLevel {
    /// Diagnostic detail.
    #[default]
    Debug,
    /// Routine events.
    Info,
    /// Unexpected but recoverable events.
    #[serde(alias = "WARN")]
    Warning,
    /// Failures.
    Error,
    /// Failures that stop the daemon.
    Critical,
}

impl LogLevel {
    /// Equivalent `tracing` filter level.
    #[must_use]
    pub const fn as_filter(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
            Self::Error | Self::Critical => "error",
        }
    }
}

/// Level assignment for one logger path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Logger {
    /// Dotted or `::` separated target; `.` or empty is the root logger.
    #[serde(default)]
    pub path: String,
    /// Level applied to the target and its children.
    #[serde(default)]
    pub level: LogLevel,
}

impl Logger {
    /// Builds a logger entry.
    #[must_use]
    pub fn new(path: impl Into<String>, level: LogLevel) -> Self {
        Self {
            path: path.into(),
            level,
        }
    }

    /// Whether the entry sets the root level.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.path.is_empty() || self.path == "."
    }
}

/// Tagged wrapper used for logger entries in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoggerEntry {
    /// A logger level assignment.
    Logger(Logger),
}

impl LoggerEntry {
    /// Wrapped logger.
    #[must_use]
    pub const fn logger(&self) -> &Logger {
        match self {
            Self::Logger(logger) => logger,
        }
    }
}

/// E-mail alert target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailAlert {
    /// SMTP host.
    pub host: String,
    /// SMTP port.
    pub port: u16,
    /// SMTP user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// `From` header.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    /// Envelope sender.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub envelope_from: Option<String>,
    /// SMTP password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Alert recipients.
    pub recipients: Vec<String>,
}

impl Default for EmailAlert {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: 25,
            user: None,
            sender: None,
            envelope_from: None,
            password: None,
            recipients: Vec::new(),
        }
    }
}

/// Where operational alerts are delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertDestination {
    /// Alerts sent by e-mail.
    EmailAlert(EmailAlert),
}

/// Which daemon the configuration describes; decides the document's root key
/// and the defaults of a fresh configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DaemonFlavor {
    /// Process management, logging and listeners only.
    Daemon,
    /// Adds data stores and a main store.
    #[default]
    Service,
}

impl DaemonFlavor {
    /// Root key of the configuration document.
    #[must_use]
    pub const fn root_key(self) -> &'static str {
        match self {
            Self::Daemon => "Daemon",
            Self::Service => "ServiceDaemon",
        }
    }

    /// Whether stores are applied at boot.
    #[must_use]
    pub const fn has_stores(self) -> bool {
        matches!(self, Self::Service)
    }
}

/// One-shot actions requested on the command line; never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunFlags {
    /// Print version information and exit.
    pub version: bool,
    /// Create databases and schemas, then exit.
    pub bootstrap: bool,
    /// Write the merged configuration and exit.
    pub write_config: bool,
    /// Load and validate everything without serving.
    pub dry_run: bool,
    /// Drop every table of the main store, then exit.
    pub drop_all_tables: bool,
    /// Write interface documents into this directory, then exit.
    pub write_interface: Option<Utf8PathBuf>,
}

/// Root configuration record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Daemon name; must be set before the configuration is applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Schema version of the persisted document.
    pub file_version: u32,
    /// Unique instance id, generated once.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,
    /// Cookie and session key, generated once and never replaced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<Secret>,
    /// Whether to detach into the background.
    pub daemonize: bool,
    /// Working directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workdir: Option<Utf8PathBuf>,
    /// User to switch to after binding.
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "identity::deserialize_account"
    )]
    pub uid: Option<String>,
    /// Group to switch to after binding.
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "identity::deserialize_account"
    )]
    pub gid: Option<String>,
    /// Supplementary groups; an empty list drops all of them.
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "identity::deserialize_accounts"
    )]
    pub gids: Option<Vec<String>>,
    /// Resource limits.
    #[serde(skip_serializing_if = "LimitsChoice::is_empty")]
    pub limits: LimitsChoice,
    /// Pid file path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid_file: Option<Utf8PathBuf>,
    /// Log file path; standard error when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logger_dest: Option<Utf8PathBuf>,
    /// Log line format.
    pub logger_format: LogFormat,
    /// Log file rotation period.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logger_dest_rotation_period: Option<RotationPeriod>,
    /// Compression of rotated log files.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logger_dest_rotation_compression: Option<Compression>,
    /// Refuse to start when a log subscriber is already installed, unless
    /// `log_optional` is also set.
    pub log_exclusive: bool,
    /// Keep an already installed log subscriber without warning.
    pub log_optional: bool,
    /// Prefix log lines with the resident memory size.
    pub log_rss: bool,
    /// Log connection level protocol events.
    pub log_protocol: bool,
    /// Log SQL statements.
    pub log_queries: bool,
    /// Log SQL statements with their results.
    pub log_results: bool,
    /// Log SQL driver and pool internals.
    pub log_sql: bool,
    /// Alert targets.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub alert_dests: Vec<AlertDestination>,
    /// Debug mode; enables tracebacks in application responses.
    pub debug: bool,
    /// Warn when blocking work runs on an accept loop thread.
    pub debug_reactor: bool,
    /// Store bound as the default for the data layer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main_store: Option<String>,
    /// Skip schema migrations of the main store.
    pub skip_migration: bool,
    /// Listeners by name.
    pub services: NamedRegistry<ListenerConfig>,
    /// Data stores by name.
    pub stores: NamedRegistry<StoreConfig>,
    /// Logger level assignments.
    pub loggers: Vec<LoggerEntry>,
    /// One-shot actions from the command line.
    #[serde(skip)]
    pub run: RunFlags,
    /// Command-line listener overrides waiting for their listener to be
    /// defined.
    #[serde(skip)]
    pub pending_overrides: Vec<ListenerOverride>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: None,
            file_version: CONFIG_FILE_VERSION,
            uuid: None,
            secret: None,
            daemonize: false,
            workdir: None,
            uid: None,
            gid: None,
            gids: None,
            limits: LimitsChoice::default(),
            pid_file: None,
            logger_dest: None,
            logger_format: LogFormat::default(),
            logger_dest_rotation_period: None,
            logger_dest_rotation_compression: None,
            log_exclusive: false,
            log_optional: false,
            log_rss: false,
            log_protocol: false,
            log_queries: false,
            log_results: false,
            log_sql: false,
            alert_dests: Vec::new(),
            debug: false,
            debug_reactor: false,
            main_store: None,
            skip_migration: false,
            services: NamedRegistry::default(),
            stores: NamedRegistry::default(),
            loggers: Vec::new(),
            run: RunFlags::default(),
            pending_overrides: Vec::new(),
        }
    }
}

impl Config {
    /// Builds the configuration used when no file exists yet.
    #[must_use]
    pub fn defaults(name: &str, flavor: DaemonFlavor, workdir: &Utf8Path) -> Self {
        let mut config = Self {
            name: Some(name.to_owned()),
            workdir: Some(workdir.to_path_buf()),
            debug: true,
            loggers: vec![LoggerEntry::Logger(Logger::new(".", LogLevel::Debug))],
            ..Self::default()
        };
        config.ensure_identity();
        if flavor.has_stores() {
            let user = identity::current_user_name();
            config.stores.insert(StoreConfig::RelationalStore(RelationalStoreConfig {
                name: DEFAULT_STORE_NAME.to_owned(),
                conn_str: RelationalStoreConfig::default_conn_str(name, &user),
                ..RelationalStoreConfig::default()
            }));
            config.main_store = Some(DEFAULT_STORE_NAME.to_owned());
            config.logger_dest_rotation_period = Some(RotationPeriod::Weekly);
            config.logger_dest_rotation_compression = Some(Compression::Gzip);
        }
        config
    }

    /// Generates the instance uuid and secret when absent.
    ///
    /// Returns `true` when anything was generated.
    pub fn ensure_identity(&mut self) -> bool {
        let mut generated = false;
        if self.uuid.is_none() {
            self.uuid = Some(Uuid::new_v4());
            generated = true;
        }
        if self.secret.is_none() {
            self.secret = Some(Secret::generate());
            generated = true;
        }
        generated
    }

    /// Daemon name, required before the configuration is applied.
    pub fn require_name(&self) -> Result<&str, ConfigError> {
        self.name.as_deref().ok_or(ConfigError::MissingName)
    }

    /// Secret suitable for cookie encryption.
    pub fn cookie_secret(&self) -> Result<&Secret, ConfigError> {
        let actual = self.secret.as_ref().map_or(0, Secret::len);
        match &self.secret {
            Some(secret) if secret.len() >= MIN_COOKIE_SECRET_LEN => Ok(secret),
            _ => Err(ConfigError::SecretTooShort {
                minimum: MIN_COOKIE_SECRET_LEN,
                actual,
            }),
        }
    }

    /// Numeric user id to switch to, or `-1` when no switch is requested.
    pub fn get_uid(&self) -> Result<i64, IdentityError> {
        self.uid
            .as_deref()
            .map_or(Ok(-1), |spec| identity::resolve_user(spec).map(i64::from))
    }

    /// Numeric group id to switch to, or `-1` when no switch is requested.
    pub fn get_gid(&self) -> Result<i64, IdentityError> {
        self.gid
            .as_deref()
            .map_or(Ok(-1), |spec| identity::resolve_group(spec).map(i64::from))
    }

    /// Supplementary group ids, or `None` when they are left untouched.
    pub fn get_gids(&self) -> Result<Option<Vec<u32>>, IdentityError> {
        self.gids
            .as_ref()
            .map(|gids| {
                gids.iter()
                    .map(|gid| identity::resolve_group(gid))
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()
    }

    /// Makes file paths absolute against `base` so they survive a later
    /// change of directory.
    pub fn sanitize(&mut self, base: &Utf8Path) {
        for path in [&mut self.logger_dest, &mut self.pid_file].into_iter().flatten() {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        if let Some(workdir) = &mut self.workdir
            && workdir.is_relative()
        {
            *workdir = base.join(&*workdir);
        }
    }

    /// Registers a listener unless one of the same name exists, then applies
    /// the pending command-line overrides and `force` to it, in that order.
    /// The stored entry wins over `default`; `force` wins over everything.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::ServiceDisabled`] when the listener is
    /// disabled.
    pub fn define_service(
        &mut self,
        default: ListenerConfig,
        force: impl FnOnce(&mut ListenerConfig),
    ) -> Result<&ListenerConfig, RegistryError> {
        let name = crate::registry::Named::name(&default).to_owned();
        let entry = self.services.insert_or_get(&name, || default)?;
        let pending = std::mem::take(&mut self.pending_overrides);
        self.pending_overrides = pending
            .into_iter()
            .filter(|pending| !pending.apply_to(entry))
            .collect();
        force(entry);
        Ok(&*entry)
    }

    /// Registers a store unless one of the same name exists.
    pub fn define_store(&mut self, default: StoreConfig) -> Result<&StoreConfig, RegistryError> {
        let name = crate::registry::Named::name(&default).to_owned();
        self.stores.insert_or_get(&name, || default).map(|entry| &*entry)
    }

    /// Recipients of every e-mail alert destination.
    #[must_use]
    pub fn email_alert_addresses(&self) -> Vec<&str> {
        self.alert_dests
            .iter()
            .flat_map(|dest| match dest {
                AlertDestination::EmailAlert(email) => email.recipients.iter(),
            })
            .map(String::as_str)
            .collect()
    }

    /// Logger entries without their tag wrapper.
    pub fn loggers(&self) -> impl Iterator<Item = &Logger> {
        self.loggers.iter().map(LoggerEntry::logger)
    }

    /// Listener and store names, used to detect changes that require the
    /// file to be rewritten.
    #[must_use]
    pub fn registered_names(&self) -> (BTreeSet<String>, BTreeSet<String>) {
        (self.services.names(), self.stores.names())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn config_with_uid(uid: Option<&str>) -> Config {
        Config {
            uid: uid.map(str::to_owned),
            ..Config::default()
        }
    }

    #[rstest]
    fn unset_uid_means_no_switch() {
        assert_eq!(config_with_uid(None).get_uid().expect("no lookup"), -1);
        assert_eq!(Config::default().get_gid().expect("no lookup"), -1);
    }

    #[cfg(unix)]
    #[rstest]
    fn root_uid_resolves_to_zero() {
        assert_eq!(config_with_uid(Some("root")).get_uid().expect("root"), 0);
    }

    #[rstest]
    fn service_defaults_include_the_main_store() {
        let config = Config::defaults("test", DaemonFlavor::Service, Utf8Path::new("/srv"));
        assert_eq!(config.main_store.as_deref(), Some(DEFAULT_STORE_NAME));
        let Some(StoreConfig::RelationalStore(store)) = config.stores.get(DEFAULT_STORE_NAME)
        else {
            panic!("expected the default relational store");
        };
        assert!(store.conn_str.starts_with("postgresql://"));
        assert!(store.conn_str.ends_with(&format!("/test_{}", identity::current_user_name())));
        assert_eq!(config.logger_dest_rotation_period, Some(RotationPeriod::Weekly));
    }

    #[rstest]
    fn plain_defaults_have_no_stores() {
        let config = Config::defaults("test", DaemonFlavor::Daemon, Utf8Path::new("/srv"));
        assert!(config.stores.is_empty());
        assert!(config.uuid.is_some());
        assert!(config.secret.is_some());
    }

    #[rstest]
    fn identity_is_generated_only_once() {
        let mut config = Config::default();
        assert!(config.ensure_identity());
        let secret = config.secret.clone();
        assert!(!config.ensure_identity());
        assert_eq!(config.secret, secret);
    }

    #[rstest]
    fn short_secrets_are_rejected_for_cookies() {
        let config = Config {
            secret: Some(Secret::from_bytes(vec![1; 8])),
            ..Config::default()
        };
        assert!(matches!(
            config.cookie_secret(),
            Err(ConfigError::SecretTooShort { actual: 8, .. })
        ));
    }

    #[rstest]
    fn sanitize_makes_paths_absolute() {
        let mut config = Config {
            logger_dest: Some(Utf8PathBuf::from("logs/daemon.log")),
            pid_file: Some(Utf8PathBuf::from("/run/daemon.pid")),
            ..Config::default()
        };
        config.sanitize(Utf8Path::new("/srv/app"));
        assert_eq!(
            config.logger_dest.as_deref(),
            Some(Utf8Path::new("/srv/app/logs/daemon.log"))
        );
        assert_eq!(config.pid_file.as_deref(), Some(Utf8Path::new("/run/daemon.pid")));
    }

    #[rstest]
    fn define_service_prefers_stored_entries_and_applies_force() {
        let mut config = Config::default();
        config
            .services
            .insert(ListenerConfig::Server(ServerConfig::tcp("api", "127.0.0.1", 7000)));

        let listener = config
            .define_service(
                ListenerConfig::Server(ServerConfig::tcp("api", "0.0.0.0", 8000)),
                |listener| listener.server_mut().backlog = 5,
            )
            .expect("listener is enabled");

        assert_eq!(listener.server().port, 7000);
        assert_eq!(listener.server().backlog, 5);
    }

    #[rstest]
    fn define_service_applies_pending_overrides_before_force() {
        let mut config = Config {
            pending_overrides: vec![
                ListenerOverride::Port {
                    listener: "web".to_owned(),
                    port: 9090,
                },
                ListenerOverride::Host {
                    listener: "web".to_owned(),
                    host: "::1".to_owned(),
                },
                ListenerOverride::Port {
                    listener: "admin".to_owned(),
                    port: 9191,
                },
            ],
            ..Config::default()
        };

        let listener = config
            .define_service(
                ListenerConfig::Server(ServerConfig::tcp("web", "0.0.0.0", 8080)),
                |listener| listener.server_mut().port = 7070,
            )
            .expect("listener is enabled");

        assert_eq!(listener.server().host, "::1");
        assert_eq!(listener.server().port, 7070);
        assert_eq!(
            config.pending_overrides,
            vec![ListenerOverride::Port {
                listener: "admin".to_owned(),
                port: 9191,
            }]
        );
    }

    #[rstest]
    fn define_service_rejects_disabled_listeners() {
        let mut config = Config::default();
        let mut disabled = ServerConfig::tcp("ws", "127.0.0.1", 7001);
        disabled.disabled = true;
        config.services.insert(ListenerConfig::Server(disabled));

        let error = config
            .define_service(
                ListenerConfig::Server(ServerConfig::tcp("ws", "0.0.0.0", 8001)),
                |_| {},
            )
            .expect_err("disabled listener");
        assert_eq!(error, RegistryError::ServiceDisabled { name: "ws".to_owned() });
    }

    #[rstest]
    fn email_recipients_are_collected() {
        let config = Config {
            alert_dests: vec![AlertDestination::EmailAlert(EmailAlert {
                recipients: vec!["ops@example.org".to_owned()],
                ..EmailAlert::default()
            })],
            ..Config::default()
        };
        assert_eq!(config.email_alert_addresses(), vec!["ops@example.org"]);
    }
}
