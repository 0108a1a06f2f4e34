//! Bridge configuration.
//!
//! Loaded from JSON, with selected fields overridable from the process
//! environment at module load time.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};
use crate::logging::LogLevel;
use crate::resolver::ExportPolicy;
use crate::status::JniVersion;

/// Default values.
pub mod defaults {
    /// Local frame capacity reserved for managed-to-native calls.
    pub const FRAME_CAPACITY: i32 = 16;

    /// Tag passed to the log sink.
    pub const LOG_TAG: &str = "jvm-bridge";

    /// Managed class whose natives the bridge itself implements.
    pub const SUPPORT_CLASS: &str = "dev.jvmbridge.NativeExporter";

    /// Annotation marking classes and members as callable from native code.
    pub const EXPORT_MARKER: &str = "dev.jvmbridge.ExportToNative";

    /// Environment variable overriding the minimum log level.
    pub const ENV_LOG_LEVEL: &str = "JVM_BRIDGE_LOG_LEVEL";

    /// Environment variable overriding the local frame capacity.
    pub const ENV_FRAME_CAPACITY: &str = "JVM_BRIDGE_FRAME_CAPACITY";

    /// Environment variable enabling debug mode.
    pub const ENV_DEBUG: &str = "JVM_BRIDGE_DEBUG";
}

/// Complete bridge configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Interface version requested from the runtime.
    #[serde(default)]
    pub version: JniVersion,

    /// Capacity of local frames opened by the bridge.
    #[serde(default = "default_frame_capacity")]
    pub local_frame_capacity: i32,

    /// Messages below this level are not sent to the sink.
    #[serde(default = "default_min_log_level")]
    pub min_log_level: LogLevel,

    /// Tag for bridge diagnostics.
    #[serde(default = "default_log_tag")]
    pub log_tag: String,

    /// Dotted name of the support class.
    #[serde(default = "default_support_class")]
    pub support_class: String,

    /// Package prefix to whether members need the export marker.
    #[serde(default)]
    pub export_required: BTreeMap<String, bool>,

    /// Verbose diagnostics at debug level.
    #[serde(default)]
    pub debug_mode: bool,
}

fn default_frame_capacity() -> i32 {
    defaults::FRAME_CAPACITY
}

fn default_min_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_log_tag() -> String {
    defaults::LOG_TAG.to_string()
}

fn default_support_class() -> String {
    defaults::SUPPORT_CLASS.to_string()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            version: JniVersion::default(),
            local_frame_capacity: default_frame_capacity(),
            min_log_level: default_min_log_level(),
            log_tag: default_log_tag(),
            support_class: default_support_class(),
            export_required: BTreeMap::new(),
            debug_mode: false,
        }
    }
}

impl BridgeConfig {
    /// Parses and validates a JSON document.
    pub fn from_json_str(json: &str) -> BridgeResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| BridgeError::config("json", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a JSON file, falling back to defaults if it does not exist.
    pub fn load_or_default(path: impl AsRef<Path>) -> BridgeResult<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(content) => Self::from_json_str(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Config file {} not found, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(BridgeError::config(
                path.display().to_string(),
                e.to_string(),
            )),
        }
    }

    /// Applies overrides from the process environment.
    pub fn with_env_overrides(self) -> BridgeResult<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from `lookup`, keyed by environment variable name.
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> BridgeResult<Self> {
        if let Some(level) = lookup(defaults::ENV_LOG_LEVEL) {
            self.min_log_level = LogLevel::parse(&level).ok_or_else(|| {
                BridgeError::config(defaults::ENV_LOG_LEVEL, format!("unknown level '{}'", level))
            })?;
        }
        if let Some(capacity) = lookup(defaults::ENV_FRAME_CAPACITY) {
            self.local_frame_capacity = capacity.trim().parse().map_err(|_| {
                BridgeError::config(
                    defaults::ENV_FRAME_CAPACITY,
                    format!("'{}' is not an integer", capacity),
                )
            })?;
        }
        if let Some(flag) = lookup(defaults::ENV_DEBUG) {
            self.debug_mode = matches!(
                flag.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        if self.debug_mode {
            debug!("Bridge debug mode enabled");
            self.min_log_level = LogLevel::Debug;
        }
        self.validate()?;
        Ok(self)
    }

    /// Validates field values.
    pub fn validate(&self) -> BridgeResult<()> {
        if self.local_frame_capacity <= 0 {
            return Err(BridgeError::config(
                "local_frame_capacity",
                "must be greater than 0",
            ));
        }
        if self.support_class.trim().is_empty() {
            return Err(BridgeError::config("support_class", "must not be empty"));
        }
        if self.log_tag.is_empty() {
            return Err(BridgeError::config("log_tag", "must not be empty"));
        }
        Ok(())
    }

    /// Export policy built from `export_required`.
    pub fn export_policy(&self) -> ExportPolicy {
        ExportPolicy::new(self.export_required.clone())
    }
}
