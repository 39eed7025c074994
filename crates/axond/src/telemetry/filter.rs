use axon_config::{Config, StoreConfig};

use crate::stores::POOL_ECHO_TARGET;

const TRANSPORT_DIRECTIVE: &str = concat!(env!("CARGO_PKG_NAME"), "::transport=debug");
const QUERY_TARGET: &str = "sqlx::query";
const SQL_DIRECTIVE: &str = "sqlx=debug";

/// Builds the `EnvFilter` directives for `config`.
///
/// The root logger (`.` or an empty path) sets the default level; without
/// one, `debug` mode logs at debug and everything else at info. Other logger
/// paths become `target=level` directives, followed by the subsystem
/// switches.
#[must_use]
pub fn directives(config: &Config) -> String {
    let fallback = if config.debug { "debug" } else { "info" };
    let root = config
        .loggers()
        .filter(|logger| logger.is_root())
        .last()
        .map_or(fallback, |logger| logger.level.as_filter());

    let mut directives = vec![root.to_owned()];
    directives.extend(
        config
            .loggers()
            .filter(|logger| !logger.is_root())
            .map(|logger| format!("{}={}", logger.path, logger.level.as_filter())),
    );

    if config.log_protocol {
        directives.push(TRANSPORT_DIRECTIVE.to_owned());
    }
    if config.log_sql {
        directives.push(SQL_DIRECTIVE.to_owned());
    }
    if echoes_pool(config) {
        directives.push(format!("{POOL_ECHO_TARGET}=debug"));
    }
    if config.log_results {
        directives.push(format!("{QUERY_TARGET}=debug"));
    } else if config.log_queries {
        directives.push(format!("{QUERY_TARGET}=info"));
    }
    directives.join(",")
}

fn echoes_pool(config: &Config) -> bool {
    config
        .stores
        .iter()
        .any(|store| matches!(store, StoreConfig::RelationalStore(sql) if sql.echo_pool))
}
