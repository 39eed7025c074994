use std::cell::RefCell;
use std::ffi::OsString;
use std::fs;

use camino::Utf8PathBuf;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use tempfile::TempDir;

use axon_config::{
    CONFIG_FILE_VERSION, ConfigLoader, DaemonFlavor, ListenerConfig, LoadedConfig, ServerConfig,
    parse_document,
};

const DAEMON: &str = "precedence";

struct Harness {
    temp_dir: TempDir,
    cli_args: RefCell<Vec<OsString>>,
    loaded: RefCell<Option<LoadedConfig>>,
    error: RefCell<Option<String>>,
}

impl Harness {
    fn new() -> Self {
        let temp_dir = match TempDir::new() {
            Ok(dir) => dir,
            Err(error) => panic!("failed to create temporary directory: {error}"),
        };
        Self {
            temp_dir,
            cli_args: RefCell::new(vec![OsString::from(DAEMON)]),
            loaded: RefCell::new(None),
            error: RefCell::new(None),
        }
    }

    fn base_dir(&self) -> Utf8PathBuf {
        match Utf8PathBuf::from_path_buf(self.temp_dir.path().to_path_buf()) {
            Ok(path) => path,
            Err(path) => panic!("temporary directory is not UTF-8: {}", path.display()),
        }
    }

    fn config_path(&self) -> Utf8PathBuf {
        self.base_dir().join(format!("{DAEMON}.yaml"))
    }

    fn write_config(&self, body: &str) {
        let document = format!("ServiceDaemon:\n  file_version: 2\n{body}");
        if let Err(error) = fs::write(self.config_path(), document) {
            panic!("failed to write configuration: {error}");
        }
    }

    fn push_cli_arg(&self, arg: impl Into<OsString>) {
        self.cli_args.borrow_mut().push(arg.into());
    }

    fn load(&self) {
        if self.loaded.borrow().is_some() || self.error.borrow().is_some() {
            return;
        }

        let loader = ConfigLoader::in_dir(self.base_dir(), DaemonFlavor::Service);
        let args = self.cli_args.borrow().clone();
        match loader.parse_config(DAEMON, args) {
            Ok(config) => {
                *self.loaded.borrow_mut() = Some(config);
            }
            Err(error) => {
                *self.error.borrow_mut() = Some(error.to_string());
            }
        }
    }

    fn with_loaded<R>(&self, check: impl FnOnce(&mut LoadedConfig) -> R) -> R {
        self.load();

        if let Some(error) = self.error.borrow().as_ref() {
            panic!("configuration failed to load: {error}");
        }

        let mut loaded = self.loaded.borrow_mut();
        match loaded.as_mut() {
            Some(config) => check(config),
            None => panic!("configuration was not loaded"),
        }
    }
}

#[fixture]
fn harness() -> Harness {
    Harness::new()
}

#[given("a configuration file setting the port of \"{listener}\" to \"{port}\"")]
fn given_listener_port(harness: &Harness, listener: String, port: u16) {
    harness.write_config(&format!(
        "  services:\n    - Server:\n        name: {listener}\n        host: 127.0.0.1\n        port: {port}\n"
    ));
}

#[given("a configuration file enabling debug mode")]
fn given_debug_enabled(harness: &Harness) {
    harness.write_config("  debug: true\n");
}

#[given("no configuration file")]
fn given_no_file(harness: &Harness) {
    assert!(!harness.config_path().exists());
}

#[when("the CLI sets the port of \"{listener}\" to \"{port}\"")]
fn when_cli_port(harness: &Harness, listener: String, port: u16) {
    harness.push_cli_arg(format!("--port-{listener}={port}"));
}

#[when("the application forces the port of \"{listener}\" to \"{port}\"")]
fn when_forced_port(harness: &Harness, listener: String, port: u16) {
    harness.with_loaded(|loaded| {
        let default = ListenerConfig::Server(ServerConfig::tcp(listener.as_str(), "0.0.0.0", 1));
        if let Err(error) = loaded
            .config
            .define_service(default, |entry| entry.server_mut().port = port)
        {
            panic!("listener should be enabled: {error}");
        }
    });
}

#[when("the application defines \"{listener}\" on port \"{port}\"")]
fn when_defined_port(harness: &Harness, listener: String, port: u16) {
    harness.with_loaded(|loaded| {
        let default = ListenerConfig::Server(ServerConfig::tcp(listener.as_str(), "0.0.0.0", port));
        if let Err(error) = loaded.config.define_service(default, |_| {}) {
            panic!("listener should be enabled: {error}");
        }
    });
}

#[when("the configuration loads without overrides")]
fn when_load_without_overrides(harness: &Harness) {
    harness.load();
}

#[then("the port of \"{listener}\" resolves to \"{port}\"")]
fn then_listener_port(harness: &Harness, listener: String, port: u16) {
    harness.with_loaded(|loaded| {
        let Some(entry) = loaded.config.services.get(&listener) else {
            panic!("listener {listener} missing");
        };
        assert_eq!(entry.server().port, port);
    });
}

#[then("no listener override is left unapplied")]
fn then_overrides_applied(harness: &Harness) {
    harness.with_loaded(|loaded| {
        if let Err(error) = loaded.finish_overrides() {
            panic!("override left unapplied: {error}");
        }
    });
}

#[then("debug mode is enabled")]
fn then_debug_enabled(harness: &Harness) {
    harness.with_loaded(|loaded| assert!(loaded.config.debug));
}

#[then("the configuration file exists with the current version")]
fn then_file_written(harness: &Harness) {
    harness.load();
    let path = harness.config_path();
    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(error) => panic!("configuration file was not written: {error}"),
    };
    let (_, config, _) = match parse_document(&path, &text) {
        Ok(parsed) => parsed,
        Err(error) => panic!("written configuration does not parse: {error}"),
    };
    assert_eq!(config.file_version, CONFIG_FILE_VERSION);
}

#[scenario(
    path = "tests/features/configuration_precedence.feature",
    name = "File values override built-in defaults"
)]
fn file_overrides_defaults(#[from(harness)] harness: Harness) {
    drop(harness);
}

#[scenario(
    path = "tests/features/configuration_precedence.feature",
    name = "Command line values override file values"
)]
fn cli_overrides_file(#[from(harness)] harness: Harness) {
    drop(harness);
}

#[scenario(
    path = "tests/features/configuration_precedence.feature",
    name = "Forced values override the command line"
)]
fn force_overrides_cli(#[from(harness)] harness: Harness) {
    drop(harness);
}

#[scenario(
    path = "tests/features/configuration_precedence.feature",
    name = "Absent command line flags keep file values"
)]
fn absent_flags_keep_file_values(#[from(harness)] harness: Harness) {
    drop(harness);
}

#[scenario(
    path = "tests/features/configuration_precedence.feature",
    name = "Missing files fall back to defaults and are written"
)]
fn missing_file_is_written(#[from(harness)] harness: Harness) {
    drop(harness);
}

#[scenario(
    path = "tests/features/configuration_precedence.feature",
    name = "Command line values reach listeners the application defines"
)]
fn cli_reaches_defined_listeners(#[from(harness)] harness: Harness) {
    drop(harness);
}
