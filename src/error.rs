//! Router-level error hierarchy plus the
//! aggregating `RouterError` at the binary's outer boundary.
//!
//! Library errors (`SchemaError`, `DecodeError`, `FastPacketError`,
//! `IsoTpError`) live in `nmea2k::error` next to the types that raise them;
//! this module covers only what the router binary itself introduces:
//! coupler lifecycle failures and publisher backpressure.

use thiserror::Error;

/// A coupler's `open()` explicitly refused to proceed (e.g. a log-replay
/// file already exhausted). Unlike `CouplerReadError`, this is not retried.
#[derive(Debug, Error)]
#[error("coupler '{coupler}' refused to open: {reason}")]
pub struct CouplerOpenRefused {
    pub coupler: String,
    pub reason: String,
}

#[derive(Debug, Error)]
#[error("coupler '{coupler}' read error: {source}")]
pub struct CouplerReadError {
    pub coupler: String,
    #[source]
    pub source: std::io::Error,
}

#[derive(Debug, Error)]
#[error("coupler '{coupler}' write error: {source}")]
pub struct CouplerWriteError {
    pub coupler: String,
    #[source]
    pub source: std::io::Error,
}

/// A publisher's lost-message count exceeded `max_lost`. The router evicts
/// the publisher unless it was configured with `suspend_on_overflow`.
#[derive(Debug, Error)]
#[error("publisher '{publisher}' overflowed: {lost} messages lost (max {max_lost})")]
pub struct PublisherOverflow {
    pub publisher: String,
    pub lost: u64,
    pub max_lost: u64,
}

/// Top-level error the binary's `main` turns into a process exit code.
/// 1 = fatal startup error, 2 = dependency failure encountered after
/// startup (CAN interface gone, config reload failed, ...).
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("failed to load configuration from {path}: {source}")]
    ConfigLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_yaml::Error),
    #[error("failed to initialize logging: {0}")]
    LoggingInit(String),
    #[error(transparent)]
    SchemaError(#[from] nmea2k::error::SchemaError),
    #[error("dependency failure: {0}")]
    Dependency(String),
}

impl RouterError {
    /// Process exit code per the CLI's documented contract: 0 on clean
    /// shutdown (not represented here), 1 on fatal startup error, 2 on a
    /// dependency failure discovered once running.
    pub fn exit_code(&self) -> i32 {
        match self {
            RouterError::Dependency(_) => 2,
            _ => 1,
        }
    }
}
