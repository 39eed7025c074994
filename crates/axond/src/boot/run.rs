//! Process entry point: load, apply, serve, shut down.

use std::ffi::OsString;
use std::io::{self, Write};

use axon_config::{ConfigError, ConfigLoader, DaemonFlavor, LoadedConfig};
use tracing::{error, info};

use super::{ApplyMode, BOOT_TARGET, Boot, BootDeps, BootError};
use crate::app::Application;
use crate::exit::{EXIT_SUCCESS, EXIT_UNKNOWN, EarlyExit};

/// Inputs of [`run_with`] besides the command line.
#[derive(Debug)]
pub struct RunPlan {
    /// Locates and reads the configuration file.
    pub loader: ConfigLoader,
    /// Daemon flavour, deciding whether stores are applied.
    pub flavour: DaemonFlavor,
    /// Boot collaborators.
    pub deps: BootDeps,
}

/// Runs `application` as the daemon `daemon_name` and returns the process
/// exit code.
///
/// `argv` includes the program name.
pub fn run<I, T>(
    daemon_name: &str,
    argv: I,
    application: &dyn Application,
    flavour: DaemonFlavor,
) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut stdout = io::stdout();
    let mut stderr = io::stderr();
    let loader = match ConfigLoader::current(flavour) {
        Ok(loader) => loader,
        Err(error) => {
            let _ = writeln!(stderr, "{error}");
            return EXIT_UNKNOWN;
        }
    };
    let plan = RunPlan {
        loader,
        flavour,
        deps: BootDeps::system(),
    };
    run_with(plan, daemon_name, argv, application, &mut stdout, &mut stderr)
}

/// Runs `application` with injected collaborators and output streams.
pub fn run_with<I, T>(
    plan: RunPlan,
    daemon_name: &str,
    argv: I,
    application: &dyn Application,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let RunPlan {
        loader,
        flavour,
        deps,
    } = plan;

    let loaded = match loader.parse_config(daemon_name, argv) {
        Ok(loaded) => loaded,
        Err(ConfigError::Cli(usage)) => {
            let rendered = usage.render();
            let _ = if usage.use_stderr() {
                write!(stderr, "{rendered}")
            } else {
                write!(stdout, "{rendered}")
            };
            return usage.exit_code();
        }
        Err(failure) => {
            let _ = writeln!(stderr, "{failure}");
            return EXIT_UNKNOWN;
        }
    };

    match execute(loaded, flavour, deps, application, stdout) {
        Ok(code) => code,
        Err(failure) => {
            error!(
                target: BOOT_TARGET,
                exit_code = failure.exit_code(),
                error = %failure,
                "daemon failed"
            );
            let _ = writeln!(stderr, "{failure}");
            failure.exit_code()
        }
    }
}

fn execute(
    mut loaded: LoadedConfig,
    flavour: DaemonFlavor,
    deps: BootDeps,
    application: &dyn Application,
    stdout: &mut dyn Write,
) -> Result<i32, BootError> {
    if loaded.config.run.version {
        let name = loaded.config.require_name()?;
        let _ = writeln!(stdout, "{name} {}", application.version());
        return Ok(EarlyExit::Version.code());
    }

    application.configure(&mut loaded.config)?;
    loaded.finish_overrides()?;
    loaded.persist_if_changed()?;

    let run = loaded.config.run.clone();
    if run.bootstrap {
        let mut boot = Boot::new(loaded.config, flavour, deps);
        boot.apply(ApplyMode::Tooling)?;
        let outcome = application.bootstrap(&boot.context());
        boot.shutdown();
        outcome?;
        return Ok(EarlyExit::Bootstrap.code());
    }
    if run.drop_all_tables {
        let mut config = loaded.config;
        config.log_queries = true;
        let mut boot = Boot::new(config, flavour, deps);
        boot.apply(ApplyMode::Tooling)?;
        let outcome = application.drop_all_tables(&boot.context());
        boot.shutdown();
        outcome?;
        return Ok(EarlyExit::DropAllTables.code());
    }
    if run.write_config {
        loaded.write()?;
        return Ok(EarlyExit::WriteConfig.code());
    }

    let mut boot = Boot::new(loaded.config, flavour, deps);
    boot.apply(ApplyMode::Full)?;
    let handlers = application.init(&boot.context())?;
    let attached = boot.attach(handlers)?;

    if let Some(dir) = &run.write_interface {
        let outcome = application.write_interface(&boot.context(), dir);
        boot.shutdown();
        outcome?;
        return Ok(EarlyExit::WriteInterface.code());
    }
    if run.dry_run {
        info!(target: BOOT_TARGET, "dry run complete");
        boot.shutdown();
        return Ok(EXIT_SUCCESS);
    }

    boot.deps.reporter.serving(attached);
    let waited = boot.wait_for_shutdown();
    boot.shutdown();
    waited?;
    Ok(EXIT_SUCCESS)
}
