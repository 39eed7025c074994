//! Process exit codes.
//!
//! Listener failures encode the failing port so supervisors can tell which
//! endpoint was busy: `100000 + port` for TCP and `200000 + port` for UDP.
//! Operating systems that truncate exit statuses to eight bits lose that
//! information.

use axon_config::TransportKind;

/// Clean shutdown.
pub const EXIT_SUCCESS: i32 = 0;
/// Failure without a more specific code.
pub const EXIT_UNKNOWN: i32 = 1;
/// Resource exhaustion, including out-of-memory conditions.
pub const EXIT_RESOURCE_LIMIT: i32 = 201;
/// Base added to the port of a TCP listener that failed to bind.
pub const TCP_EXIT_BASE: i32 = 100_000;
/// Base added to the port of a UDP listener that failed to bind.
pub const UDP_EXIT_BASE: i32 = 200_000;

/// Run modes that stop the process after a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EarlyExit {
    /// `--version`: print version information.
    Version,
    /// `--write-config`: persist the merged configuration.
    WriteConfig,
    /// `--write-interface`: export the interface documents.
    WriteInterface,
    /// `--drop-all-tables`: drop every table of the main store.
    DropAllTables,
    /// `--bootstrap`: create the initial database state.
    Bootstrap,
}

impl EarlyExit {
    /// Exit code reported after the task completes.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Version => 10,
            Self::WriteConfig => 11,
            Self::WriteInterface => 12,
            Self::DropAllTables => 13,
            Self::Bootstrap => 14,
        }
    }
}

/// Exit code for a listener that failed to bind.
#[must_use]
pub fn listen_failure_code(transport: TransportKind, port: u16) -> i32 {
    if transport.is_tcp() {
        TCP_EXIT_BASE + i32::from(port)
    } else if transport.is_udp() {
        UDP_EXIT_BASE + i32::from(port)
    } else {
        EXIT_UNKNOWN
    }
}
