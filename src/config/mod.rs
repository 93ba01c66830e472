//! Project configuration for framehook
//!
//! A project file describes one deployment: the frame layout, dispatcher
//! timing, sink limits, the hook script and logging. It is read from
//! `.toml` or `.json` depending on the file extension and saved the same way.
//!
//! # Example
//!
//! ```toml
//! name = "air-quality"
//! script = "pms5003.rhai"
//!
//! [frame]
//! prefix = "424D"
//! max_payload_size = 64
//!
//! [frame.length_field]
//! kind = "encoded"
//! width = 2
//! endian = "big"
//! meaning = "payload_plus_checksum"
//!
//! [frame.checksum]
//! algorithm = "sum16"
//! scope = ["header", "length", "payload"]
//!
//! [dispatcher]
//! timer_period_ms = 1000
//! ```
//!
//! Validation happens once at load and again when the runtime is built, so
//! an invalid frame description never reaches a decoder.

use crate::codec::{
    ChecksumAlgorithm, ChecksumRegion, ChecksumSpec, FrameLayout, FrameSpec, LengthField,
    LengthMeaning,
};
use crate::decode::Endian;
use crate::error::{FrameHookError, Result};
use crate::hooks::DEFAULT_STOP_GRACE;
use crate::pipeline::{ConnectionIdPolicy, RuntimeConfig, DEFAULT_QUEUE_CAPACITY};
use crate::sink::{
    BatchMode, SinkGatewayConfig, DEFAULT_CALL_TIMEOUT, DEFAULT_DRAIN_DEADLINE,
    DEFAULT_SINK_QUEUE_CAPACITY,
};
use crate::timer::{DEFAULT_TIMER_PERIOD, MIN_TIMER_PERIOD};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Default `tracing` filter directive
pub const DEFAULT_LOG_LEVEL: &str = "info,framehook=debug";

/// On-disk format, chosen by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("toml") => Ok(ConfigFormat::Toml),
            Some("json") => Ok(ConfigFormat::Json),
            _ => Err(FrameHookError::Config(format!(
                "Unsupported project file extension {:?} (expected .toml or .json)",
                path
            ))),
        }
    }
}

/// Project file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project file format version for future compatibility
    #[serde(default = "default_project_version")]
    pub version: u32,

    #[serde(default)]
    pub name: String,

    /// Hook script, relative to the project file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<PathBuf>,

    #[serde(default)]
    pub frame: FrameSpec,

    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    #[serde(default)]
    pub sinks: SinksConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_project_version() -> u32 {
    1
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            version: 1,
            name: "Untitled Project".to_string(),
            script: None,
            frame: FrameSpec::default(),
            dispatcher: DispatcherConfig::default(),
            sinks: SinksConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ProjectConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// A PMS5003 particulate sensor project.
    pub fn sample() -> Self {
        Self {
            name: "pms5003".to_string(),
            frame: FrameSpec {
                prefix: vec![0x42, 0x4D],
                max_payload_size: 64,
                length_field: LengthField::Encoded {
                    width: 2,
                    endian: Endian::Big,
                    meaning: LengthMeaning::PayloadPlusChecksum,
                },
                checksum: ChecksumSpec {
                    algorithm: ChecksumAlgorithm::Sum16,
                    endian: Endian::Big,
                    scope: vec![
                        ChecksumRegion::Header,
                        ChecksumRegion::Length,
                        ChecksumRegion::Payload,
                    ],
                },
                ..FrameSpec::default()
            },
            ..Default::default()
        }
    }

    /// Load and validate a project file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;
        let content = std::fs::read_to_string(path).map_err(|e| {
            FrameHookError::Config(format!("Failed to read project file {:?}: {}", path, e))
        })?;

        let config: Self = match format {
            ConfigFormat::Toml => toml::from_str(&content).map_err(|e| {
                FrameHookError::Config(format!("Failed to parse project file {:?}: {}", path, e))
            })?,
            ConfigFormat::Json => serde_json::from_str(&content).map_err(|e| {
                FrameHookError::Config(format!("Failed to parse project file {:?}: {}", path, e))
            })?,
        };
        config
            .validate()
            .map_err(|e| e.with_context(format!("Invalid project file {:?}", path)))?;
        tracing::debug!(path = %path.display(), name = %config.name, "project loaded");
        Ok(config)
    }

    /// Save the project in the format its extension names
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                FrameHookError::Config(format!("Failed to create project directory: {}", e))
            })?;
        }

        let content = match format {
            ConfigFormat::Toml => toml::to_string_pretty(self)
                .map_err(|e| FrameHookError::Serialization(e.to_string()))?,
            ConfigFormat::Json => serde_json::to_string_pretty(self)
                .map_err(|e| FrameHookError::Serialization(e.to_string()))?,
        };

        std::fs::write(path, content).map_err(|e| {
            FrameHookError::Config(format!("Failed to write project file {:?}: {}", path, e))
        })
    }

    /// Check every section and compile the frame layout.
    pub fn validate(&self) -> Result<FrameLayout> {
        let layout = self.frame.compile()?;
        self.dispatcher.validate()?;
        self.sinks.validate()?;
        Ok(layout)
    }

    /// Settings for [`crate::pipeline::Runtime`]
    pub fn runtime_config(&self) -> Result<RuntimeConfig> {
        let layout = self.validate()?;
        Ok(RuntimeConfig {
            layout: Arc::new(layout),
            timer_period: self.dispatcher.timer_period(),
            stop_grace: Duration::from_millis(self.dispatcher.stop_grace_ms),
            queue_capacity: self.dispatcher.queue_capacity,
            id_policy: self.dispatcher.id_policy,
        })
    }

    /// Settings for [`crate::sink::SinkGateway`]
    pub fn gateway_config(&self) -> SinkGatewayConfig {
        SinkGatewayConfig {
            call_timeout: Duration::from_millis(self.sinks.call_timeout_ms),
            drain_deadline: Duration::from_millis(self.sinks.drain_deadline_ms),
            queue_capacity: self.sinks.queue_capacity,
            batch_mode: self.sinks.batch_mode,
        }
    }

    /// Script path resolved against the directory of the project file
    pub fn script_path(&self, project_file: &Path) -> Option<PathBuf> {
        let script = self.script.as_ref()?;
        if script.is_absolute() {
            return Some(script.clone());
        }
        let base = project_file.parent().unwrap_or_else(|| Path::new(""));
        Some(base.join(script))
    }
}

/// Hook dispatch settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// `on_timer` period in milliseconds
    pub timer_period_ms: u64,

    /// Budget for sink calls made from `on_stop`
    pub stop_grace_ms: u64,

    pub id_policy: ConnectionIdPolicy,

    /// Chunks buffered per connection before feeding blocks
    pub queue_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            timer_period_ms: DEFAULT_TIMER_PERIOD.as_millis() as u64,
            stop_grace_ms: DEFAULT_STOP_GRACE.as_millis() as u64,
            id_policy: ConnectionIdPolicy::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl DispatcherConfig {
    pub fn timer_period(&self) -> Duration {
        Duration::from_millis(self.timer_period_ms)
    }

    fn validate(&self) -> Result<()> {
        let min_ms = MIN_TIMER_PERIOD.as_millis() as u64;
        if self.timer_period_ms < min_ms {
            return Err(FrameHookError::Config(format!(
                "dispatcher.timer_period_ms must be at least {} (got {})",
                min_ms, self.timer_period_ms
            )));
        }
        if self.queue_capacity == 0 {
            return Err(FrameHookError::Config(
                "dispatcher.queue_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Sink gateway settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinksConfig {
    pub call_timeout_ms: u64,
    pub drain_deadline_ms: u64,
    /// Per-sink queue length for asynchronous calls
    pub queue_capacity: usize,
    pub batch_mode: BatchMode,
}

impl Default for SinksConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: DEFAULT_CALL_TIMEOUT.as_millis() as u64,
            drain_deadline_ms: DEFAULT_DRAIN_DEADLINE.as_millis() as u64,
            queue_capacity: DEFAULT_SINK_QUEUE_CAPACITY,
            batch_mode: BatchMode::default(),
        }
    }
}

impl SinksConfig {
    fn validate(&self) -> Result<()> {
        if self.call_timeout_ms == 0 {
            return Err(FrameHookError::Config(
                "sinks.call_timeout_ms must be positive".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(FrameHookError::Config(
                "sinks.queue_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Logging settings used by the binary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter directive; `RUST_LOG` takes precedence
    pub level: String,

    /// Also write logs to this file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_toml_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("project.toml");
        let mut config = ProjectConfig::sample();
        config.script = Some(PathBuf::from("pms5003.rhai"));
        config.dispatcher.id_policy = ConnectionIdPolicy::ReusePerEndpoint;

        config.save(&path).unwrap();
        let loaded = ProjectConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_json_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("project.json");
        let config = ProjectConfig::sample();

        config.save(&path).unwrap();
        assert_eq!(ProjectConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_parse_handwritten_toml() {
        let text = r#"
            name = "nmea"

            [frame]
            prefix = "24"
            tailer_marker = "0D0A"
            max_payload_size = 82

            [frame.length_field]
            kind = "absent"

            [dispatcher]
            timer_period_ms = 500

            [sinks]
            batch_mode = "skip_malformed"
        "#;
        let config: ProjectConfig = toml::from_str(text).unwrap();
        assert_eq!(config.frame.tailer_marker.as_deref(), Some(&b"\r\n"[..]));
        assert_eq!(config.dispatcher.timer_period(), Duration::from_millis(500));
        assert_eq!(config.dispatcher.stop_grace_ms, 2000);
        assert_eq!(config.sinks.batch_mode, BatchMode::SkipMalformed);
        assert_eq!(config.logging.level, DEFAULT_LOG_LEVEL);
        config.validate().unwrap();
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("project.yaml");
        assert!(ProjectConfig::sample().save(&path).is_err());
        assert!(ProjectConfig::load(&path).is_err());
    }

    #[test]
    fn test_short_timer_rejected() {
        let mut config = ProjectConfig::sample();
        config.dispatcher.timer_period_ms = 5;
        assert!(config.validate().is_err());
        assert!(config.runtime_config().is_err());
    }

    #[test]
    fn test_invalid_frame_rejected_at_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        let mut config = ProjectConfig::sample();
        config.frame.max_payload_size = 0;
        config.save(&path).unwrap();
        assert!(ProjectConfig::load(&path).is_err());
    }

    #[test]
    fn test_script_path_is_relative_to_project() {
        let mut config = ProjectConfig::new("p");
        assert_eq!(config.script_path(Path::new("/etc/fh/p.toml")), None);
        config.script = Some(PathBuf::from("hooks/p.rhai"));
        assert_eq!(
            config.script_path(Path::new("/etc/fh/p.toml")),
            Some(PathBuf::from("/etc/fh/hooks/p.rhai"))
        );
    }

    #[test]
    fn test_gateway_config_mapping() {
        let mut config = ProjectConfig::default();
        config.sinks.call_timeout_ms = 250;
        let gateway = config.gateway_config();
        assert_eq!(gateway.call_timeout, Duration::from_millis(250));
        assert_eq!(gateway.queue_capacity, DEFAULT_SINK_QUEUE_CAPACITY);
    }
}
