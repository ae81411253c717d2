//! CLI error types with miette diagnostics.
//!
//! Maps library errors into user-facing errors with actionable help text.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use marquee_config::ConfigError;
use marquee_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const CONFIG: i32 = 3;
    pub const IO: i32 = 4;
    pub const NETWORK: i32 = 5;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(
        code(marquee::validation),
        help("Check {path}, or override the key with a MARQUEE_* environment variable.")
    )]
    Validation {
        field: String,
        reason: String,
        path: String,
    },

    #[error("Failed to load configuration from {path}")]
    #[diagnostic(
        code(marquee::config),
        help("Run `marquee validate --config {path}` after fixing the file.")
    )]
    Config {
        path: String,
        #[source]
        source: ConfigError,
    },

    #[error("Device config is invalid")]
    #[diagnostic(
        code(marquee::device_config),
        help("Every device needs a unique, non-empty `name`; `settings` must be a map.")
    )]
    DeviceConfig {
        #[source]
        source: ConfigError,
    },

    // ── Runtime ──────────────────────────────────────────────────────

    #[error("Cannot bind the status server to {addr}")]
    #[diagnostic(
        code(marquee::bind),
        help("Pick another ui_server_port, or stop whatever is listening there.")
    )]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("mDNS discovery failed: {message}")]
    #[diagnostic(
        code(marquee::discovery),
        help("Check discovery_network_interface; it must name an interface or one of its addresses.")
    )]
    Discovery { message: String },

    #[error(transparent)]
    #[diagnostic(code(marquee::core))]
    Core(#[from] CoreError),

    #[error("I/O error on {path}")]
    #[diagnostic(code(marquee::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Validation { .. } | Self::Config { .. } | Self::DeviceConfig { .. } => {
                exit_code::CONFIG
            }
            Self::Io { .. } => exit_code::IO,
            Self::Bind { .. } | Self::Discovery { .. } => exit_code::NETWORK,
            Self::Core(_) => exit_code::GENERAL,
        }
    }

    /// Attach the config file path to an error raised while loading it.
    pub fn from_config(err: ConfigError, path: &std::path::Path) -> Self {
        let path = path.display().to_string();
        match err {
            ConfigError::Validation { field, reason } => Self::Validation {
                field,
                reason,
                path,
            },
            err @ ConfigError::Yaml(_) => Self::DeviceConfig { source: err },
            ConfigError::Io { path, source } => Self::Io { path, source },
            other => Self::Config {
                path,
                source: other,
            },
        }
    }
}
