//! Configuration management for the streaming engine.
//!
//! This module handles loading configuration from YAML files with support for
//! environment variable expansion, layered with `TURN_STREAM__*` overrides.
//! Every field is optional and falls back to the documented default.

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;

use crate::core::tokenizer::Encoding;

/// Prefix of environment overrides, e.g. `TURN_STREAM__STREAMING__USAGE_DRAIN_TIMEOUT_MS`.
pub const ENV_PREFIX: &str = "TURN_STREAM";

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub streaming: StreamingConfig,
    pub loop_guard: LoopGuardConfig,
    pub tokenizer: TokenizerConfig,
    pub retry: RetryConfig,
    pub logging: LoggingConfig,
}

/// Engine behaviour switches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamingConfig {
    /// Run the loop guard on reasoning growth
    pub dead_loop_detection: bool,

    /// Keep draining the provider stream for trailing usage after the turn ends
    pub background_usage_drain: bool,

    /// Upper bound for the background drain
    pub usage_drain_timeout_ms: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            dead_loop_detection: true,
            background_usage_drain: true,
            usage_drain_timeout_ms: 5000,
        }
    }
}

/// Loop guard checkpoints and thresholds. Lengths are in characters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoopGuardConfig {
    /// Ascending text lengths at which detection runs
    pub checkpoints: Vec<usize>,

    /// Trailing window scanned for short repeated sequences
    pub short_sequence_window: usize,

    /// Minimum consecutive repeats of a short sequence
    pub min_repeats: usize,

    /// Trailing window scanned for paragraph/list repetition
    pub paragraph_window: usize,

    /// Minimum number of blocks a periodic run must cover
    pub min_periodic_elements: usize,

    /// Longest period considered for paragraph/list repetition
    pub max_period_length: usize,
}

impl Default for LoopGuardConfig {
    fn default() -> Self {
        Self {
            checkpoints: vec![2000, 3000, 5000, 8000, 13000, 21000, 34000, 55000],
            short_sequence_window: 300,
            min_repeats: 4,
            paragraph_window: 2000,
            min_periodic_elements: 6,
            max_period_length: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TokenizerConfig {
    pub encoding: Encoding,
}

/// Backoff and context-reduction parameters used by the retry coordinator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
    pub max_attempts: u32,
    /// Share of the context kept when condensing after a context-window error
    pub context_reduction_percent: u8,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: 5,
            max_delay_secs: 600,
            max_attempts: 5,
            context_reduction_percent: 75,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,turn_stream=debug".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file, then apply environment overrides.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use turn_stream::core::config::AppConfig;
    ///
    /// let config = AppConfig::load("turn-stream.yaml").expect("Failed to load config");
    /// ```
    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        Self::from_yaml_str(&content).with_context(|| format!("Failed to parse config file: {}", path))
    }

    /// Build configuration from YAML text plus environment overrides.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);

        let config: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(&expanded, config::FileFormat::Yaml))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("loop_guard.checkpoints")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for running without a file.
    pub fn from_env() -> Result<Self> {
        Self::from_yaml_str("")
    }

    /// Reject settings the engine cannot honour.
    pub fn validate(&self) -> Result<()> {
        let guard = &self.loop_guard;
        if guard.checkpoints.is_empty() {
            bail!("loop_guard.checkpoints must not be empty");
        }
        if guard.checkpoints.windows(2).any(|w| w[0] >= w[1]) {
            bail!("loop_guard.checkpoints must be strictly ascending");
        }
        if guard.min_repeats < 2 || guard.min_periodic_elements < 2 {
            bail!("loop_guard thresholds must be at least 2");
        }
        if guard.max_period_length == 0 {
            bail!("loop_guard.max_period_length must be positive");
        }
        if self.streaming.usage_drain_timeout_ms == 0 {
            bail!("streaming.usage_drain_timeout_ms must be positive");
        }
        if self.retry.context_reduction_percent == 0 || self.retry.context_reduction_percent > 100 {
            bail!("retry.context_reduction_percent must be within 1..=100");
        }
        Ok(())
    }
}

/// Expand environment variables in configuration content.
///
/// Supports patterns: ${VAR}, ${VAR:-default}, ${VAR:default}
fn expand_env_vars(content: &str) -> String {
    static ENV_VAR_RE: once_cell::sync::Lazy<Regex> = once_cell::sync::Lazy::new(|| {
        Regex::new(r"\$\{([^}:]+)(?::-?([^}]*))?\}").expect("valid env var pattern")
    });

    ENV_VAR_RE
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_value = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(var_name).unwrap_or_else(|_| default_value.to_string())
        })
        .to_string()
}

/// Convert string to boolean.
///
/// Accepts: "true", "1", "yes", "on" (case-insensitive)
pub fn str_to_bool(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}
