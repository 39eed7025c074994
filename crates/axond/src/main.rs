//! Sample daemon serving a line echo on every configured listener.

use std::sync::Arc;

use axon_config::{Config, DaemonFlavor, ListenerConfig, RegistryError, ServerConfig};
use axond::{
    Application, ApplicationError, ConnectionHandler, EchoHandler, ServiceContext,
    ServiceHandlers, run,
};

const DAEMON_NAME: &str = "axond";
const ECHO_PORT: u16 = 7007;

struct EchoApp;

impl Application for EchoApp {
    fn configure(&self, config: &mut Config) -> Result<(), ApplicationError> {
        let echo = ListenerConfig::Server(ServerConfig::tcp("echo", "127.0.0.1", ECHO_PORT));
        match config.define_service(echo, |_| {}) {
            Ok(_) | Err(RegistryError::ServiceDisabled { .. }) => Ok(()),
            Err(error) => Err(ApplicationError::with_source(
                "cannot register echo listener",
                error,
            )),
        }
    }

    fn init(&self, context: &ServiceContext<'_>) -> Result<ServiceHandlers, ApplicationError> {
        let handler: Arc<dyn ConnectionHandler> = Arc::new(EchoHandler);
        Ok(context
            .config()
            .services
            .enabled()
            .map(|service| (service.server().name.clone(), Arc::clone(&handler)))
            .collect())
    }
}

fn main() {
    let code = run(DAEMON_NAME, std::env::args_os(), &EchoApp, DaemonFlavor::Daemon);
    std::process::exit(code);
}
