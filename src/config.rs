//! Configuration module for wsprwatch.
//!
//! Process settings come from environment variables with sensible defaults.
//! The station layout (receiver instances and bands) comes from a JSON file
//! that can be re-read at runtime.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("unknown instance '{instance}' referenced by band '{band}'")]
    UnknownInstance { band: String, instance: String },
    #[error("duplicate {kind} name '{name}'")]
    Duplicate { kind: &'static str, name: String },
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the status server (default: 8080)
    pub http_port: u16,
    /// Path to the station config file (default: "wsprwatch.json")
    pub config_path: PathBuf,
    /// Base directory for captures and decoder output (default: "/tmp/wsprwatch")
    pub work_dir: PathBuf,
    /// Decoder binary (default: "wsprd")
    pub decoder_path: PathBuf,
    /// Recorder command used to open receiver sessions (default: "kiwirecorder.py")
    pub recorder_path: PathBuf,
    /// Spot publish endpoint; `None` disables publishing
    pub publish_url: Option<String>,
    /// Record into one fixed file per band and never delete it
    pub keep_wav: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            config_path: PathBuf::from("wsprwatch.json"),
            work_dir: PathBuf::from("/tmp/wsprwatch"),
            decoder_path: PathBuf::from("wsprd"),
            recorder_path: PathBuf::from("kiwirecorder.py"),
            publish_url: None,
            keep_wav: false,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `WSPRWATCH_HTTP_PORT`: HTTP port (default: 8080)
    /// - `WSPRWATCH_CONFIG`: station config file (default: "wsprwatch.json")
    /// - `WSPRWATCH_WORK_DIR`: work directory (default: "/tmp/wsprwatch")
    /// - `WSPRWATCH_DECODER`: decoder binary (default: "wsprd")
    /// - `WSPRWATCH_RECORDER`: recorder command (default: "kiwirecorder.py")
    /// - `WSPRWATCH_PUBLISH_URL`: spot publish endpoint (default: unset)
    /// - `WSPRWATCH_KEEP_WAV`: "1"/"true" to keep a fixed capture file per band
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(port) = lookup("WSPRWATCH_HTTP_PORT").and_then(|s| s.parse().ok()) {
            cfg.http_port = port;
        }
        if let Some(path) = lookup("WSPRWATCH_CONFIG") {
            cfg.config_path = PathBuf::from(path);
        }
        if let Some(dir) = lookup("WSPRWATCH_WORK_DIR") {
            cfg.work_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup("WSPRWATCH_DECODER") {
            cfg.decoder_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("WSPRWATCH_RECORDER") {
            cfg.recorder_path = PathBuf::from(path);
        }
        cfg.publish_url = lookup("WSPRWATCH_PUBLISH_URL").filter(|s| !s.trim().is_empty());
        if let Some(flag) = lookup("WSPRWATCH_KEEP_WAV") {
            cfg.keep_wav = matches!(flag.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }

        cfg
    }
}

/// Identity of the receiving station, attached to published spots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReceiverIdentity {
    pub callsign: String,
    pub locator: String,
}

/// Connection parameters for one remote receiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub name: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// One monitored channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub name: String,
    pub instance: String,
    /// Dial frequency in Hz.
    pub frequency_hz: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Fixed receiver gain in dB; unset leaves AGC on.
    #[serde(default)]
    pub gain_db: Option<f64>,
}

fn default_enabled() -> bool {
    true
}

impl Band {
    /// Whether a running worker for `self` must be replaced to serve `other`.
    pub fn differs_from(&self, other: &Band) -> bool {
        self.frequency_hz != other.frequency_hz
            || self.instance != other.instance
            || self.gain_db != other.gain_db
    }
}

/// Station layout: receiver identity, instance table and band list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StationConfig {
    #[serde(default)]
    pub receiver: ReceiverIdentity,
    #[serde(default)]
    pub instances: Vec<Instance>,
    #[serde(default)]
    pub bands: Vec<Band>,
}

impl StationConfig {
    /// Read and validate a station config file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Parse and validate a station config from JSON text.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let cfg: StationConfig = serde_json::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject duplicate band or instance names.
    ///
    /// Bands pointing at unknown instances are accepted here; the manager
    /// skips them individually at start time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for instance in &self.instances {
            if !seen.insert(instance.name.as_str()) {
                return Err(ConfigError::Duplicate {
                    kind: "instance",
                    name: instance.name.clone(),
                });
            }
        }

        let mut seen = HashSet::new();
        for band in &self.bands {
            if !seen.insert(band.name.as_str()) {
                return Err(ConfigError::Duplicate {
                    kind: "band",
                    name: band.name.clone(),
                });
            }
        }

        Ok(())
    }

    /// Bands with `enabled` set, keyed by band name.
    pub fn enabled_bands(&self) -> HashMap<String, Band> {
        self.bands
            .iter()
            .filter(|b| b.enabled)
            .map(|b| (b.name.clone(), b.clone()))
            .collect()
    }

    /// Look up the instance a band refers to.
    pub fn instance_for(&self, band: &Band) -> Result<&Instance, ConfigError> {
        self.instances
            .iter()
            .find(|i| i.name == band.instance)
            .ok_or_else(|| ConfigError::UnknownInstance {
                band: band.name.clone(),
                instance: band.instance.clone(),
            })
    }
}
