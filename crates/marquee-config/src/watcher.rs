// ── Device config watcher ──
//
// Polls the device file and hands every changed, valid snapshot to a
// callback. A file that fails to parse is logged once and otherwise
// ignored, so the last good snapshot stays in effect.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use marquee_core::DeviceConfig;

use crate::ConfigError;
use crate::devices::parse_device_config;

pub struct DeviceConfigWatcher {
    path: PathBuf,
    poll: Duration,
    last_contents: Option<String>,
}

impl DeviceConfigWatcher {
    pub fn new(path: impl Into<PathBuf>, poll: Duration) -> Self {
        Self {
            path: path.into(),
            poll,
            last_contents: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the file now. Errors are returned rather than logged, so the
    /// caller can refuse to start on a broken file.
    pub async fn load(&mut self) -> Result<DeviceConfig, ConfigError> {
        let contents = self.read().await?;
        let config = parse_device_config(&contents)?;
        self.last_contents = Some(contents);
        Ok(config)
    }

    /// Poll until `cancel` fires, then deliver an empty snapshot so every
    /// device is released.
    pub async fn run<F>(mut self, cancel: CancellationToken, mut on_change: F)
    where
        F: FnMut(DeviceConfig),
    {
        let mut interval = tokio::time::interval(self.poll);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await; // consume the immediate first tick

        let mut read_failed = false;
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let contents = match self.read().await {
                        Ok(contents) => {
                            read_failed = false;
                            contents
                        }
                        Err(e) => {
                            if !read_failed {
                                warn!(error = %e, "cannot read device config");
                            }
                            read_failed = true;
                            continue;
                        }
                    };
                    if self.last_contents.as_deref() == Some(contents.as_str()) {
                        continue;
                    }

                    info!(path = %self.path.display(), "reloading device config");
                    match parse_device_config(&contents) {
                        Ok(config) => on_change(config),
                        Err(e) => warn!(error = %e, "keeping previous device config"),
                    }
                    self.last_contents = Some(contents);
                }
            }
        }

        debug!("device config watcher stopped");
        on_change(DeviceConfig::default());
    }

    async fn read(&self) -> Result<String, ConfigError> {
        tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| ConfigError::Io {
                path: self.path.clone(),
                source,
            })
    }
}
