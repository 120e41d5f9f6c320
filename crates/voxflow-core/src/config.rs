//! Configuration loading and validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level Voxflow configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub limits: Option<LimitsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentence: Option<SentenceConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub commands: Option<CommandsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,
}

fn default_port() -> u16 {
    18650
}

/// Backpressure and lifecycle limits. All independently configurable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum concurrent stream leases (default: 50).
    #[serde(default = "default_max_streams")]
    pub max_streams: usize,

    /// Per-stream message ceiling inside a one-second sliding window (default: 10).
    #[serde(default = "default_max_messages_per_second")]
    pub max_messages_per_second: usize,

    /// Leases idle longer than this are evicted (default: 300s).
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Reaper sweep interval (default: 30s).
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Abandoned pending-request buffers older than this are destroyed
    /// by the sweep (default: 300s).
    #[serde(default = "default_pending_buffer_ttl_secs")]
    pub pending_buffer_ttl_secs: u64,

    /// How long a superseding commit waits for the interrupted turn to
    /// unwind before proceeding anyway (default: 2000ms).
    #[serde(default = "default_interrupt_wait_ms")]
    pub interrupt_wait_ms: u64,
}

fn default_max_streams() -> usize {
    50
}

fn default_max_messages_per_second() -> usize {
    10
}

fn default_idle_timeout_secs() -> u64 {
    300
}

fn default_sweep_interval_secs() -> u64 {
    30
}

fn default_pending_buffer_ttl_secs() -> u64 {
    300
}

fn default_interrupt_wait_ms() -> u64 {
    2000
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_streams: default_max_streams(),
            max_messages_per_second: default_max_messages_per_second(),
            idle_timeout_secs: default_idle_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            pending_buffer_ttl_secs: default_pending_buffer_ttl_secs(),
            interrupt_wait_ms: default_interrupt_wait_ms(),
        }
    }
}

/// Sentence flush policy for streaming synthesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentenceConfig {
    /// Minimum characters before a length-based flush (default: 40).
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,

    /// Minimum words before a length-based flush (default: 6).
    #[serde(default = "default_min_words")]
    pub min_words: usize,

    /// Lower word minimum for the first sentence, keeping time-to-first-audio
    /// low (default: 3).
    #[serde(default = "default_first_sentence_min_words")]
    pub first_sentence_min_words: usize,

    /// Hard ceiling after which the buffer is flushed regardless of
    /// punctuation, bounding one pathological run-on sentence (default: 280).
    #[serde(default = "default_force_flush_chars")]
    pub force_flush_chars: usize,

    /// Strict mode flushes only on `.`, `!`, `?`; relaxed mode also accepts
    /// `;` and `:` (default: false).
    #[serde(default)]
    pub strict_punctuation: bool,
}

fn default_min_chars() -> usize {
    40
}

fn default_min_words() -> usize {
    6
}

fn default_first_sentence_min_words() -> usize {
    3
}

fn default_force_flush_chars() -> usize {
    280
}

impl Default for SentenceConfig {
    fn default() -> Self {
        Self {
            min_chars: default_min_chars(),
            min_words: default_min_words(),
            first_sentence_min_words: default_first_sentence_min_words(),
            force_flush_chars: default_force_flush_chars(),
            strict_punctuation: false,
        }
    }
}

/// Which action commands are currently enabled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandsConfig {
    /// Enabled command names. Empty = all known commands enabled.
    #[serde(default)]
    pub enabled: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "voxflow_gateway=debug").
    #[serde(default)]
    pub filters: Vec<String>,
}

fn default_log_format() -> String {
    "plain".into()
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").unwrap();
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(crate::error::VoxflowError::Io)?;
        let substituted = substitute_env_vars(&raw);

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::VoxflowError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Default config file location: `~/.voxflow/config.json`
    pub fn default_path() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn gateway_port(&self) -> u16 {
        self.gateway.as_ref().map(|g| g.port).unwrap_or_else(default_port)
    }

    pub fn limits(&self) -> LimitsConfig {
        self.limits.clone().unwrap_or_default()
    }

    pub fn sentence(&self) -> SentenceConfig {
        self.sentence.clone().unwrap_or_default()
    }

    pub fn enabled_commands(&self) -> Vec<String> {
        self.commands
            .as_ref()
            .map(|c| c.enabled.clone())
            .unwrap_or_default()
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if let Some(gw) = &self.gateway {
            if gw.port == 0 {
                errors.push("Gateway port cannot be 0".to_string());
            }
        }

        if let Some(limits) = &self.limits {
            if limits.max_streams == 0 {
                errors.push("limits.max_streams cannot be 0".to_string());
            }
            if limits.max_messages_per_second == 0 {
                errors.push("limits.max_messages_per_second cannot be 0".to_string());
            }
            if limits.idle_timeout_secs < limits.sweep_interval_secs {
                warnings.push(
                    "limits.idle_timeout_secs is shorter than the sweep interval".to_string(),
                );
            }
        }

        if let Some(sentence) = &self.sentence {
            if sentence.force_flush_chars <= sentence.min_chars {
                errors.push(
                    "sentence.force_flush_chars must exceed sentence.min_chars".to_string(),
                );
            }
            if sentence.first_sentence_min_words > sentence.min_words {
                warnings.push(
                    "sentence.first_sentence_min_words exceeds sentence.min_words".to_string(),
                );
            }
        }

        (warnings, errors)
    }
}

/// Base directory for Voxflow data: `~/.voxflow/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".voxflow")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_substitution() {
        // SAFETY: test-only, single-threaded test runner
        unsafe { std::env::set_var("TEST_VF_BIND", "127.0.0.1") };
        let input = r#"{"bind": "${TEST_VF_BIND}", "other": "plain"}"#;
        let result = substitute_env_vars(input);
        assert!(result.contains("127.0.0.1"));
        assert!(result.contains("plain"));
        unsafe { std::env::remove_var("TEST_VF_BIND") };
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.gateway_port(), 18650);

        let limits = config.limits();
        assert_eq!(limits.max_streams, 50);
        assert_eq!(limits.max_messages_per_second, 10);
        assert_eq!(limits.idle_timeout_secs, 300);
        assert_eq!(limits.sweep_interval_secs, 30);

        let sentence = config.sentence();
        assert_eq!(sentence.min_chars, 40);
        assert_eq!(sentence.min_words, 6);
        assert_eq!(sentence.first_sentence_min_words, 3);
        assert_eq!(sentence.force_flush_chars, 280);
        assert!(!sentence.strict_punctuation);
    }

    #[test]
    fn test_partial_section_uses_serde_defaults() {
        let json_str = r#"{ "limits": { "max_streams": 4 } }"#;
        let config: Config = json5::from_str(json_str).unwrap();
        let limits = config.limits();
        assert_eq!(limits.max_streams, 4);
        assert_eq!(limits.max_messages_per_second, 10);
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let config = Config::load(Path::new("/nonexistent/voxflow.json")).unwrap();
        assert!(config.gateway.is_none());
        assert_eq!(config.gateway_port(), 18650);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ gateway: { port: 9000 }, sentence: { strict_punctuation: true } }"#,
        )
        .unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.gateway_port(), 9000);
        assert!(config.sentence().strict_punctuation);
    }

    #[test]
    fn test_validate_flags_bad_values() {
        let config = Config {
            gateway: Some(GatewayConfig { port: 0, bind: None }),
            sentence: Some(SentenceConfig {
                min_chars: 300,
                force_flush_chars: 280,
                ..Default::default()
            }),
            ..Default::default()
        };
        let (_warnings, errors) = config.validate();
        assert!(errors.iter().any(|e| e.contains("port")));
        assert!(errors.iter().any(|e| e.contains("force_flush_chars")));
    }

    #[test]
    fn test_logging_config_defaults() {
        let json_str = r#"{ "logging": {} }"#;
        let config: Config = json5::from_str(json_str).unwrap();
        let logging = config.logging.expect("logging should be present");
        assert_eq!(logging.format, "plain");
        assert!(logging.level.is_none());
        assert!(logging.filters.is_empty());
    }
}
