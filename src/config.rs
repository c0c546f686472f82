//! Broker configuration
//!
//! Layered lowest to highest: [`BrokerConfig::default`], an optional JSON file,
//! environment variables, then command line flags (applied by the binary).
//! Durations are expressed in milliseconds in the JSON file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CompanionError, Result};

/// Serde adapter storing a [`Duration`] as integer milliseconds
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// Paths an agent may never be bound to
const DEFAULT_FORBIDDEN_PATHS: &[&str] = &[
    "/", "/etc", "/bin", "/sbin", "/usr", "/boot", "/dev", "/proc", "/sys", "/var", "/System",
    "/Library", "/private/etc",
];

/// Runtime configuration of the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrokerConfig {
    /// TCP port of the WebSocket server
    pub port: u16,
    /// Bind address
    pub bind: String,
    /// Shared secret clients must present; `None` disables the check
    pub auth_token: Option<String>,
    /// Ceiling on live sessions and on live agent processes
    pub max_concurrent_sessions: usize,
    /// Idle timeout of a foregrounded session
    #[serde(with = "millis")]
    pub foreground_timeout: Duration,
    /// Idle timeout of a backgrounded session
    #[serde(with = "millis")]
    pub background_timeout: Duration,
    /// Lower bound on a re-armed idle timer
    #[serde(with = "millis")]
    pub min_rearm_delay: Duration,
    /// Hard lifetime of one agent process
    #[serde(with = "millis")]
    pub session_ttl: Duration,
    /// Remaining lifetime below which an expiry warning is emitted
    #[serde(with = "millis")]
    pub session_warning_threshold: Duration,
    /// Period of process health and reconciliation checks
    #[serde(with = "millis")]
    pub health_check_interval: Duration,
    /// WebSocket ping period
    #[serde(with = "millis")]
    pub heartbeat_interval: Duration,
    /// Client considered dead after this long without a pong
    #[serde(with = "millis")]
    pub client_timeout: Duration,
    /// A new connection within this window of a drop is a probable reconnect
    #[serde(with = "millis")]
    pub reconnection_window: Duration,
    /// Lifetime of a queued delivery
    #[serde(with = "millis")]
    pub message_ttl: Duration,
    /// Identical payloads enqueued within this window are deduplicated
    #[serde(with = "millis")]
    pub dedup_window: Duration,
    /// Pause between drained deliveries
    #[serde(with = "millis")]
    pub drain_spacing: Duration,
    /// Default bounded wait for `ask`
    #[serde(with = "millis")]
    pub request_timeout: Duration,
    /// Unanswered permission prompts are denied after this long
    #[serde(with = "millis")]
    pub permission_timeout: Duration,
    /// Time between the termination signal and a forced kill
    #[serde(with = "millis")]
    pub termination_grace: Duration,
    /// Restored sessions without a process older than this are reconciled away
    #[serde(with = "millis")]
    pub max_session_age: Duration,
    /// Maximum prompt length in characters
    pub max_prompt_length: usize,
    /// Directory for the session snapshot and the delivery queue
    pub data_dir: PathBuf,
    /// Agent executable; autodetected when absent
    pub cli_path: Option<PathBuf>,
    /// Arguments placed before the agent flags
    pub cli_prefix_args: Vec<String>,
    /// Whether clients may ask the agent to skip confirmations
    pub allow_skip_permissions: bool,
    /// Working directories (and their subtrees) agents may not use
    pub forbidden_paths: Vec<PathBuf>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            port: 3001,
            bind: "0.0.0.0".to_string(),
            auth_token: None,
            max_concurrent_sessions: 5,
            foreground_timeout: Duration::from_secs(30 * 60),
            background_timeout: Duration::from_secs(24 * 60 * 60),
            min_rearm_delay: Duration::from_secs(60),
            session_ttl: Duration::from_secs(4 * 60 * 60),
            session_warning_threshold: Duration::from_secs(15 * 60),
            health_check_interval: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(30),
            client_timeout: Duration::from_secs(90),
            reconnection_window: Duration::from_secs(60),
            message_ttl: Duration::from_secs(24 * 60 * 60),
            dedup_window: Duration::from_secs(5),
            drain_spacing: Duration::from_millis(50),
            request_timeout: Duration::from_secs(5 * 60),
            permission_timeout: Duration::from_secs(5 * 60),
            termination_grace: Duration::from_secs(5),
            max_session_age: Duration::from_secs(7 * 24 * 60 * 60),
            max_prompt_length: 100_000,
            data_dir: default_data_dir(),
            cli_path: None,
            cli_prefix_args: Vec::new(),
            allow_skip_permissions: false,
            forbidden_paths: DEFAULT_FORBIDDEN_PATHS.iter().map(PathBuf::from).collect(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
        .join(".kodegen")
        .join("claude-companion")
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

impl BrokerConfig {
    /// Load a JSON config file; missing keys keep their defaults
    ///
    /// # Errors
    /// Returns `CompanionError::Validation` if the file cannot be read or parsed
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CompanionError::validation(format!("Cannot read config {}: {e}", path.display()))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            CompanionError::validation(format!("Invalid config {}: {e}", path.display()))
        })
    }

    /// Defaults, then `CONFIG_PATH` if set, then environment overrides
    ///
    /// # Errors
    /// Returns `CompanionError::Validation` for an unreadable config file or a
    /// malformed numeric environment variable
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var_os("CONFIG_PATH").map(PathBuf::from);
        let mut config = match config_path.map(Path::to_path_buf).or(env_path) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply environment overrides read through `lookup`
    ///
    /// # Errors
    /// Returns `CompanionError::Validation` when a numeric variable does not parse
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(port) = lookup("PORT") {
            self.port = port
                .trim()
                .parse()
                .map_err(|e| CompanionError::validation(format!("Invalid PORT '{port}': {e}")))?;
        }
        if let Some(token) = lookup("AUTH_TOKEN").filter(|t| !t.is_empty()) {
            self.auth_token = Some(token);
        }
        if let Some(max) = lookup("MAX_CONCURRENT_SESSIONS") {
            self.max_concurrent_sessions = max.trim().parse().map_err(|e| {
                CompanionError::validation(format!("Invalid MAX_CONCURRENT_SESSIONS '{max}': {e}"))
            })?;
        }
        if let Some(path) = lookup("CLAUDE_CLI_PATH").filter(|p| !p.is_empty()) {
            self.cli_path = Some(PathBuf::from(path));
        }
        if let Some(flag) = lookup("CLAUDE_SKIP_PERMISSIONS") {
            self.allow_skip_permissions = parse_bool(&flag);
        }
        if let Some(dir) = lookup("COMPANION_DATA_DIR").filter(|d| !d.is_empty()) {
            self.data_dir = PathBuf::from(dir);
        }
        Ok(())
    }

    /// Reject configurations the broker cannot run with
    ///
    /// # Errors
    /// Returns `CompanionError::Validation` describing the first problem found
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_sessions == 0 {
            return Err(CompanionError::validation(
                "maxConcurrentSessions must be at least 1",
            ));
        }
        if self.max_prompt_length == 0 {
            return Err(CompanionError::validation("maxPromptLength must be at least 1"));
        }
        if self.foreground_timeout.is_zero() || self.background_timeout.is_zero() {
            return Err(CompanionError::validation("Session timeouts must be non-zero"));
        }
        if self.background_timeout < self.foreground_timeout {
            return Err(CompanionError::validation(
                "backgroundTimeout must not be shorter than foregroundTimeout",
            ));
        }
        if self.session_warning_threshold >= self.session_ttl {
            return Err(CompanionError::validation(
                "sessionWarningThreshold must be shorter than sessionTtl",
            ));
        }
        if self.client_timeout <= self.heartbeat_interval {
            return Err(CompanionError::validation(
                "clientTimeout must be longer than heartbeatInterval",
            ));
        }
        if self.health_check_interval.is_zero() || self.heartbeat_interval.is_zero() {
            return Err(CompanionError::validation("Check intervals must be non-zero"));
        }
        Ok(())
    }

    /// Path of the session snapshot
    #[must_use]
    pub fn sessions_path(&self) -> PathBuf {
        self.data_dir.join("sessions.json")
    }

    /// Path of the persisted delivery queue
    #[must_use]
    pub fn queue_path(&self) -> PathBuf {
        self.data_dir.join("delivery-queue.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let config = BrokerConfig::default();
        assert_eq!(config.port, 3001);
        assert_eq!(config.max_concurrent_sessions, 5);
        assert_eq!(config.foreground_timeout, Duration::from_secs(1800));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: BrokerConfig =
            serde_json::from_str(r#"{"port": 4000, "foregroundTimeout": 1000}"#).unwrap();
        assert_eq!(config.port, 4000);
        assert_eq!(config.foreground_timeout, Duration::from_secs(1));
        assert_eq!(config.background_timeout, Duration::from_secs(86_400));
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("PORT", "8080"),
            ("AUTH_TOKEN", "secret"),
            ("MAX_CONCURRENT_SESSIONS", "2"),
            ("CLAUDE_SKIP_PERMISSIONS", "true"),
        ]);
        let mut config = BrokerConfig::default();
        config
            .apply_env(|k| env.get(k).map(|v| (*v).to_string()))
            .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.auth_token.as_deref(), Some("secret"));
        assert_eq!(config.max_concurrent_sessions, 2);
        assert!(config.allow_skip_permissions);
    }

    #[test]
    fn bad_env_number_is_validation_error() {
        let mut config = BrokerConfig::default();
        let err = config
            .apply_env(|k| (k == "PORT").then(|| "http".to_string()))
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn validate_rejects_zero_capacity_and_inverted_timeouts() {
        let config = BrokerConfig {
            max_concurrent_sessions: 0,
            ..BrokerConfig::default()
        };
        assert!(config.validate().is_err());

        let config = BrokerConfig {
            background_timeout: Duration::from_secs(1),
            ..BrokerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn from_file_reads_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"maxConcurrentSessions": 3, "cliPrefixArgs": ["x.sh"]}"#).unwrap();
        let config = BrokerConfig::from_file(&path).unwrap();
        assert_eq!(config.max_concurrent_sessions, 3);
        assert_eq!(config.cli_prefix_args, vec!["x.sh".to_string()]);
        assert!(BrokerConfig::from_file(&dir.path().join("missing.json")).is_err());
    }
}
