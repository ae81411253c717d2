//! Configuration for marquee.
//!
//! Two files: the application config (`marquee.toml`, layered with
//! `MARQUEE_*` environment variables through figment) and the device config
//! (`devices.yml`) it points at. The device file is also watched for edits
//! while running; see [`watcher`].

pub mod devices;
pub mod watcher;

use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use marquee_core::{BackoffPolicy, SupervisorConfig};

pub use devices::{load_device_config, parse_device_config};
pub use watcher::DeviceConfigWatcher;

const CONFIG_FILE_NAME: &str = "marquee.toml";
const ALL_HOSTS: &str = "*";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("invalid device config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// ── TOML config ─────────────────────────────────────────────────────

/// `marquee.toml`. Every key is optional.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// Cast receiver application to launch on every device.
    pub receiver_app_id: String,

    /// Address of the status page, `*` for all interfaces.
    pub ui_server_host: String,
    pub ui_server_port: u16,

    /// Interface name or IP address to run discovery on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery_network_interface: Option<String>,

    /// Relative paths are resolved against the config file's directory.
    pub device_config_file: PathBuf,

    pub base_reconnect_seconds: u64,
    pub reconnect_noise_seconds: u64,
    pub max_reconnect_seconds: u64,
    pub heartbeat_interval_seconds: u64,
    pub heartbeat_timeout_seconds: u64,
    pub connect_timeout_millis: u64,
    pub tls_handshake_timeout_millis: u64,
    pub device_config_poll_millis: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            receiver_app_id: marquee_core::config::SupervisorConfig::default().app_id,
            ui_server_host: ALL_HOSTS.into(),
            ui_server_port: 8000,
            discovery_network_interface: None,
            device_config_file: PathBuf::from("devices.yml"),
            base_reconnect_seconds: 15,
            reconnect_noise_seconds: 5,
            max_reconnect_seconds: 3600,
            heartbeat_interval_seconds: 5,
            heartbeat_timeout_seconds: 30,
            connect_timeout_millis: 1000,
            tls_handshake_timeout_millis: 10_000,
            device_config_poll_millis: 2000,
        }
    }
}

impl Config {
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Default location of `marquee.toml` per platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "marquee", "marquee").map_or_else(
        || PathBuf::from(CONFIG_FILE_NAME),
        |dirs| dirs.config_dir().join(CONFIG_FILE_NAME),
    )
}

// ── Loading ─────────────────────────────────────────────────────────

/// Defaults, then the TOML file (if present), then `MARQUEE_*` variables.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("MARQUEE_"));

    Ok(figment.extract()?)
}

/// A validated config with every path and address resolved.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub config: Config,
    pub device_config_path: PathBuf,
    pub ui_server_addr: SocketAddr,
}

impl AppConfig {
    /// Load and validate the config at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = load_config(path)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::resolve(config, base_dir)
    }

    pub fn resolve(config: Config, base_dir: &Path) -> Result<Self, ConfigError> {
        validate_app_id(&config.receiver_app_id)?;

        for (field, value) in [
            ("heartbeat_interval_seconds", config.heartbeat_interval_seconds),
            ("heartbeat_timeout_seconds", config.heartbeat_timeout_seconds),
            ("device_config_poll_millis", config.device_config_poll_millis),
            ("tls_handshake_timeout_millis", config.tls_handshake_timeout_millis),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid(field, "must be greater than zero"));
            }
        }
        if config.max_reconnect_seconds < config.base_reconnect_seconds {
            return Err(ConfigError::invalid(
                "max_reconnect_seconds",
                "must not be less than base_reconnect_seconds",
            ));
        }

        let device_config_path = base_dir.join(&config.device_config_file);
        if !device_config_path.is_file() {
            return Err(ConfigError::invalid(
                "device_config_file",
                format!("{} does not exist", device_config_path.display()),
            ));
        }

        let ui_server_addr = resolve_ui_addr(&config.ui_server_host, config.ui_server_port)?;

        Ok(Self {
            config,
            device_config_path,
            ui_server_addr,
        })
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        let c = &self.config;
        SupervisorConfig {
            app_id: c.receiver_app_id.clone(),
            heartbeat_interval: Duration::from_secs(c.heartbeat_interval_seconds),
            heartbeat_timeout: Duration::from_secs(c.heartbeat_timeout_seconds),
            connect_timeout: Duration::from_millis(c.connect_timeout_millis),
            handshake_timeout: Duration::from_millis(c.tls_handshake_timeout_millis),
            backoff: BackoffPolicy {
                base: Duration::from_secs(c.base_reconnect_seconds),
                jitter: Duration::from_secs(c.reconnect_noise_seconds),
                max: Duration::from_secs(c.max_reconnect_seconds),
            },
        }
    }

    pub fn device_config_poll(&self) -> Duration {
        Duration::from_millis(self.config.device_config_poll_millis)
    }
}

fn validate_app_id(app_id: &str) -> Result<(), ConfigError> {
    let valid = !app_id.is_empty()
        && app_id
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            "receiver_app_id",
            format!("'{app_id}' must match ^[A-Z0-9]+$"),
        ))
    }
}

fn resolve_ui_addr(host: &str, port: u16) -> Result<SocketAddr, ConfigError> {
    if host == ALL_HOSTS {
        return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    (host, port)
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| ConfigError::invalid("ui_server_host", format!("cannot resolve '{host}'")))
}
