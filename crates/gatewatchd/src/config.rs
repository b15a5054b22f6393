use gatewatch_core::{CooldownPolicy, DEFAULT_TOLERANCE};
use gatewatch_notify::TransportConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::enroll::EnrollSettings;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Daemon configuration.
///
/// Built from defaults, then an optional TOML file named by `GATEWATCH_CONFIG`,
/// then `GATEWATCH_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Recorded capture session to replay (JSON lines).
    pub manifest_path: PathBuf,
    /// Gallery file.
    pub gallery_path: PathBuf,
    /// Replay pacing between frames.
    pub frame_interval_ms: u64,
    /// Maximum Euclidean distance for a positive match.
    pub tolerance: f32,
    pub known_cooldown_secs: u64,
    pub unknown_cooldown_secs: u64,
    /// Samples an enrollment aims to capture.
    pub enroll_target: usize,
    /// Fewest samples an enrollment may commit with.
    pub enroll_minimum: usize,
    /// Pause after each accepted enrollment sample.
    pub enroll_sample_interval_ms: u64,
    /// Upper bound on one enrollment session.
    pub enroll_timeout_secs: u64,
    /// Timeout for one outbound notification.
    pub transport_timeout_secs: u64,
    /// How long shutdown waits for queued notifications.
    pub shutdown_grace_secs: u64,
    /// Ring the terminal bell for each captured enrollment sample.
    pub feedback_bell: bool,
    pub transport: TransportConfig,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            manifest_path: data_dir.join("capture.jsonl"),
            gallery_path: data_dir.join("gallery.json"),
            frame_interval_ms: 100,
            tolerance: DEFAULT_TOLERANCE,
            known_cooldown_secs: 120,
            unknown_cooldown_secs: 30,
            enroll_target: 10,
            enroll_minimum: 8,
            enroll_sample_interval_ms: 1000,
            enroll_timeout_secs: 120,
            transport_timeout_secs: 30,
            shutdown_grace_secs: 5,
            feedback_bell: true,
            transport: TransportConfig::Log,
        }
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("gatewatch")
}

impl Config {
    /// Load configuration from the optional file and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os("GATEWATCH_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `GATEWATCH_*` overrides read through `get`.
    pub fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(v) = get("GATEWATCH_MANIFEST_PATH") {
            self.manifest_path = PathBuf::from(v);
        }
        if let Some(v) = get("GATEWATCH_GALLERY_PATH") {
            self.gallery_path = PathBuf::from(v);
        }
        override_parsed(&get, "GATEWATCH_FRAME_INTERVAL_MS", &mut self.frame_interval_ms);
        override_parsed(&get, "GATEWATCH_TOLERANCE", &mut self.tolerance);
        override_parsed(&get, "GATEWATCH_KNOWN_COOLDOWN_SECS", &mut self.known_cooldown_secs);
        override_parsed(&get, "GATEWATCH_UNKNOWN_COOLDOWN_SECS", &mut self.unknown_cooldown_secs);
        override_parsed(&get, "GATEWATCH_ENROLL_TARGET", &mut self.enroll_target);
        override_parsed(&get, "GATEWATCH_ENROLL_MINIMUM", &mut self.enroll_minimum);
        override_parsed(
            &get,
            "GATEWATCH_ENROLL_SAMPLE_INTERVAL_MS",
            &mut self.enroll_sample_interval_ms,
        );
        override_parsed(&get, "GATEWATCH_ENROLL_TIMEOUT_SECS", &mut self.enroll_timeout_secs);
        override_parsed(&get, "GATEWATCH_TRANSPORT_TIMEOUT_SECS", &mut self.transport_timeout_secs);
        override_parsed(&get, "GATEWATCH_SHUTDOWN_GRACE_SECS", &mut self.shutdown_grace_secs);
        if let Some(v) = get("GATEWATCH_FEEDBACK_BELL") {
            self.feedback_bell = v != "0";
        }

        match get("GATEWATCH_TRANSPORT").as_deref() {
            Some("log") => self.transport = TransportConfig::Log,
            Some("http") => {
                self.transport = TransportConfig::Http {
                    url: get("GATEWATCH_HTTP_URL").unwrap_or_default(),
                }
            }
            Some("telegram") => {
                self.transport = TransportConfig::Telegram {
                    token: get("GATEWATCH_TELEGRAM_TOKEN")
                        .or_else(|| get("TELEGRAM_BOT_TOKEN"))
                        .unwrap_or_default(),
                    chat_id: get("GATEWATCH_TELEGRAM_CHAT_ID")
                        .or_else(|| get("CHAT_ID"))
                        .unwrap_or_default(),
                }
            }
            Some(other) => {
                tracing::warn!(transport = other, "unknown GATEWATCH_TRANSPORT; keeping configured transport")
            }
            None => {}
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "tolerance must be a non-negative number, got {}",
                self.tolerance
            )));
        }
        if self.enroll_minimum == 0 || self.enroll_minimum > self.enroll_target {
            return Err(ConfigError::Invalid(format!(
                "enroll_minimum must be between 1 and enroll_target ({}), got {}",
                self.enroll_target, self.enroll_minimum
            )));
        }
        Ok(())
    }

    pub fn cooldowns(&self) -> CooldownPolicy {
        CooldownPolicy {
            known: Duration::from_secs(self.known_cooldown_secs),
            unknown: Duration::from_secs(self.unknown_cooldown_secs),
        }
    }

    pub fn enroll_settings(&self) -> EnrollSettings {
        EnrollSettings {
            target: self.enroll_target,
            minimum: self.enroll_minimum,
            sample_interval: Duration::from_millis(self.enroll_sample_interval_ms),
            timeout: Duration::from_secs(self.enroll_timeout_secs),
        }
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn transport_timeout(&self) -> Duration {
        Duration::from_secs(self.transport_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

fn override_parsed<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    let Some(raw) = get(key) else {
        return;
    };
    match raw.parse() {
        Ok(v) => *slot = v,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable override"),
    }
}
