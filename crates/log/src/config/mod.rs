//! Logger configuration

mod presets;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::LogError;

/// Logger configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Filter directive, `EnvFilter` syntax (e.g. `info,stockpile_pool=debug`)
    pub level: String,
    /// Output format
    pub format: Format,
    /// Display toggles
    pub display: DisplayConfig,
    /// Output destination
    pub writer: Writer,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: Format::default(),
            display: DisplayConfig::default(),
            writer: Writer::default(),
        }
    }
}

impl Config {
    /// Replace the filter directive
    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Replace the output format
    #[must_use]
    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// Reject settings the builder cannot honor
    pub fn validate(&self) -> Result<(), LogError> {
        if self.level.trim().is_empty() {
            return Err(LogError::Config("level must not be empty".to_string()));
        }
        if self.display.flatten && self.format != Format::Json {
            return Err(LogError::Config(
                "flatten only applies to the json format".to_string(),
            ));
        }
        Ok(())
    }
}

/// Output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Multi-line, human readable
    Pretty,
    /// Single line per event
    #[default]
    Compact,
    /// One JSON object per event
    Json,
}

impl FromStr for Format {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(LogError::Config(format!("unknown log format `{other}`"))),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pretty => "pretty",
            Self::Compact => "compact",
            Self::Json => "json",
        })
    }
}

/// Where formatted events go
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Writer {
    #[default]
    Stderr,
    Stdout,
    /// Captured by the libtest harness
    Test,
}

/// Display toggles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// ANSI colors
    pub colors: bool,
    /// File and line of the callsite
    pub source: bool,
    /// Event target (module path)
    pub target: bool,
    /// Timestamps
    pub time: bool,
    /// Thread ids
    pub thread_ids: bool,
    /// Flatten event fields into the top-level JSON object
    pub flatten: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            colors: true,
            source: false,
            target: true,
            time: true,
            thread_ids: false,
            flatten: false,
        }
    }
}

impl DisplayConfig {
    /// Apply `STOCKPILE_LOG_*` toggles and `NO_COLOR`
    pub fn parse_env(&mut self) {
        Self::apply("STOCKPILE_LOG_COLORS", &mut self.colors);
        Self::apply("STOCKPILE_LOG_SOURCE", &mut self.source);
        Self::apply("STOCKPILE_LOG_TARGET", &mut self.target);
        Self::apply("STOCKPILE_LOG_TIME", &mut self.time);
        Self::apply("STOCKPILE_LOG_THREAD_IDS", &mut self.thread_ids);
        if std::env::var_os("NO_COLOR").is_some_and(|v| !v.is_empty()) {
            self.colors = false;
        }
    }

    fn apply(var: &str, slot: &mut bool) {
        if let Some(value) = std::env::var(var).ok().and_then(|v| parse_flag(&v)) {
            *slot = value;
        }
    }
}

/// Lenient boolean parsing for environment toggles
pub(crate) fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
