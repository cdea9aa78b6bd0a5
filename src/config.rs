//! Configuration management for cmdstream.
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. Configuration file (JSON)
//! 4. Default values

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::SshTransport;
use crate::cli::{parse_timeout, Args};
use crate::execution::RunnerOptions;

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Runner configuration.
    pub runner: RunnerSection,
    /// SSH transport configuration.
    pub ssh: SshSection,
    /// Logging configuration.
    pub logging: LoggingSection,
}

/// Runner configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSection {
    /// Default timeout in seconds; none means wait forever.
    pub timeout_secs: Option<f64>,
    /// SIGTERM-to-SIGKILL grace in milliseconds (0 kills at once).
    pub kill_grace_ms: u64,
    /// How long to wait for output streams to close after exit.
    pub drain_timeout_ms: u64,
    /// Exit/cancel/deadline check interval.
    pub poll_interval_ms: u64,
    /// Echo `$ command` before each run.
    pub echo: bool,
}

impl Default for RunnerSection {
    fn default() -> Self {
        let defaults = RunnerOptions::default();
        Self {
            timeout_secs: None,
            kill_grace_ms: defaults.kill_grace.as_millis() as u64,
            drain_timeout_ms: defaults.drain_timeout.as_millis() as u64,
            poll_interval_ms: defaults.poll_interval.as_millis() as u64,
            echo: defaults.echo,
        }
    }
}

/// SSH transport configuration section.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSection {
    /// Client binary.
    pub program: String,
    /// Extra client arguments for every connection.
    pub args: Vec<String>,
    /// Connect timeout in seconds (0 leaves it to the client).
    pub connect_timeout_secs: u64,
    /// Fail instead of prompting for passwords.
    pub batch_mode: bool,
    /// Local account the connection is made as (defaults to the invoking user).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_user: Option<String>,
    /// Login password, passed through `sshpass`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl std::fmt::Debug for SshSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshSection")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("batch_mode", &self.batch_mode)
            .field("local_user", &self.local_user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

impl Default for SshSection {
    fn default() -> Self {
        Self {
            program: "ssh".to_string(),
            args: Vec::new(),
            connect_timeout_secs: crate::backend::DEFAULT_CONNECT_TIMEOUT.as_secs(),
            batch_mode: true,
            local_user: None,
            password: None,
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level (error, warn, info, debug, trace) or filter directives.
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        let config: Config = serde_json::from_str(&content).map_err(ConfigError::Json)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(timeout) = lookup("CMDSTREAM_TIMEOUT") {
            let secs = parse_timeout(&timeout)
                .map_err(|_| ConfigError::InvalidValue("CMDSTREAM_TIMEOUT", timeout.clone()))?;
            self.runner.timeout_secs = Some(secs.as_secs_f64());
        }

        if let Some(program) = lookup("CMDSTREAM_SSH_PROGRAM") {
            if !program.is_empty() {
                self.ssh.program = program;
            }
        }

        if let Some(level) = lookup("CMDSTREAM_LOG_LEVEL") {
            self.logging.level = level;
        } else if let Some(level) = lookup("RUST_LOG") {
            self.logging.level = level;
        }
        Ok(())
    }

    /// Apply CLI argument overrides.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(timeout) = args.timeout {
            self.runner.timeout_secs = Some(timeout.as_secs_f64());
        }

        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Load configuration with full priority chain.
    ///
    /// Priority: CLI args > env vars > config file > defaults
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let mut config = match args.config {
            Some(ref path) => Config::from_file(path)?,
            None => Config::default(),
        };

        config.apply_env()?;
        config.apply_args(args);

        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(secs) = self.runner.timeout_secs {
            if Duration::try_from_secs_f64(secs).is_err() {
                return Err(ConfigError::InvalidValue("runner.timeout_secs", secs.to_string()));
            }
        }
        if self.ssh.program.trim().is_empty() {
            return Err(ConfigError::InvalidValue("ssh.program", self.ssh.program.clone()));
        }
        Ok(())
    }

    /// Runner options from the `runner` section.
    pub fn runner_options(&self) -> RunnerOptions {
        RunnerOptions {
            kill_grace: Duration::from_millis(self.runner.kill_grace_ms),
            drain_timeout: Duration::from_millis(self.runner.drain_timeout_ms),
            poll_interval: Duration::from_millis(self.runner.poll_interval_ms.max(1)),
            default_timeout: self
                .runner
                .timeout_secs
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok()),
            echo: self.runner.echo,
        }
    }

    /// SSH transport from the `ssh` section.
    pub fn ssh_transport(&self) -> SshTransport {
        let connect_timeout = match self.ssh.connect_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let mut transport = SshTransport::new()
            .program(self.ssh.program.clone())
            .args(self.ssh.args.iter().cloned())
            .connect_timeout(connect_timeout)
            .batch_mode(self.ssh.batch_mode);
        if let Some(user) = &self.ssh.local_user {
            transport = transport.local_user(user.clone());
        }
        if let Some(password) = &self.ssh.password {
            transport = transport.password(password.clone());
        }
        transport
    }

    /// Get the log level filter string.
    pub fn log_filter(&self) -> &str {
        &self.logging.level
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    Io(std::io::Error),
    /// JSON parsing error.
    Json(serde_json::Error),
    /// A setting is out of range.
    InvalidValue(&'static str, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read config file: {}", e),
            Self::Json(e) => write!(f, "failed to parse config file: {}", e),
            Self::InvalidValue(name, value) => write!(f, "invalid value for {}: '{}'", name, value),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(json: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.runner.timeout_secs.is_none());
        assert_eq!(config.runner.drain_timeout_ms, 2000);
        assert_eq!(config.ssh.program, "ssh");
        assert!(config.ssh.batch_mode);
        assert_eq!(config.runner_options(), RunnerOptions::default());
    }

    #[test]
    fn test_config_from_json() {
        let file = write_config(
            r#"{
                "runner": {
                    "timeout_secs": 2.5,
                    "kill_grace_ms": 500,
                    "echo": false
                },
                "ssh": {
                    "program": "/opt/bin/ssh",
                    "args": ["-F", "/etc/ssh/ci_config"],
                    "connect_timeout_secs": 0
                }
            }"#,
        );

        let config = Config::from_file(file.path()).unwrap();
        let options = config.runner_options();
        assert_eq!(options.default_timeout, Some(Duration::from_millis(2500)));
        assert_eq!(options.kill_grace, Duration::from_millis(500));
        assert!(!options.echo);

        let argv = config
            .ssh_transport()
            .argv(&crate::RemoteTarget::new("h"), &crate::Command::new(["true"]));
        assert_eq!(
            argv,
            vec!["/opt/bin/ssh", "-o", "BatchMode=yes", "-F", "/etc/ssh/ci_config", "-T", "h", "true"]
        );
    }

    #[test]
    fn test_config_ssh_password() {
        let file = write_config(
            r#"{ "ssh": { "connect_timeout_secs": 0, "local_user": "ci", "password": "pw" } }"#,
        );
        let config = Config::from_file(file.path()).unwrap();
        assert!(!format!("{:?}", config).contains("\"pw\""));

        let transport = config.ssh_transport();
        let target = crate::RemoteTarget::new("h");
        assert_eq!(transport.login_user(&target).as_deref(), Some("ci"));
        assert_eq!(
            transport.argv(&target, &crate::Command::new(["true"])),
            vec!["sshpass", "-p", "pw", "ssh", "-T", "h", "true"]
        );
    }

    #[test]
    fn test_config_partial_json() {
        let file = write_config(r#"{ "logging": { "level": "debug" } }"#);
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.log_filter(), "debug");
        assert_eq!(config.runner.poll_interval_ms, 10);
    }

    #[test]
    fn test_config_rejects_negative_timeout() {
        let file = write_config(r#"{ "runner": { "timeout_secs": -3 } }"#);
        assert!(matches!(
            Config::from_file(file.path()),
            Err(ConfigError::InvalidValue("runner.timeout_secs", _))
        ));
    }

    #[test]
    fn test_config_rejects_out_of_range_timeout() {
        let file = write_config(r#"{ "runner": { "timeout_secs": 1e20 } }"#);
        assert!(matches!(
            Config::from_file(file.path()),
            Err(ConfigError::InvalidValue("runner.timeout_secs", _))
        ));

        let mut config = Config::default();
        let result = config.apply_env_from(|key| (key == "CMDSTREAM_TIMEOUT").then(|| "1e20".to_string()));
        assert!(matches!(result, Err(ConfigError::InvalidValue("CMDSTREAM_TIMEOUT", _))));
    }

    #[test]
    fn test_runner_options_ignore_unrepresentable_timeout() {
        let mut config = Config::default();
        config.runner.timeout_secs = Some(f64::MAX);
        assert_eq!(config.runner_options().default_timeout, None);
    }

    #[test]
    fn test_config_invalid_json() {
        let file = write_config("{ not json");
        assert!(matches!(Config::from_file(file.path()), Err(ConfigError::Json(_))));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CMDSTREAM_TIMEOUT", "7"),
            ("CMDSTREAM_SSH_PROGRAM", "dbclient"),
            ("RUST_LOG", "trace"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env_from(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.runner.timeout_secs, Some(7.0));
        assert_eq!(config.ssh.program, "dbclient");
        assert_eq!(config.log_filter(), "trace");
    }

    #[test]
    fn test_log_level_env_beats_rust_log() {
        let mut config = Config::default();
        config
            .apply_env_from(|key| match key {
                "CMDSTREAM_LOG_LEVEL" => Some("warn".into()),
                "RUST_LOG" => Some("trace".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.log_filter(), "warn");
    }

    #[test]
    fn test_invalid_env_timeout() {
        let mut config = Config::default();
        let result = config.apply_env_from(|key| (key == "CMDSTREAM_TIMEOUT").then(|| "later".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_args_beat_env() {
        let mut config = Config::default();
        config
            .apply_env_from(|key| (key == "CMDSTREAM_TIMEOUT").then(|| "7".to_string()))
            .unwrap();

        let args = Args {
            timeout: Some(Duration::from_secs(3)),
            log_level: Some("debug".to_string()),
            ..Args::default()
        };
        config.apply_args(&args);

        assert_eq!(config.runner_options().default_timeout, Some(Duration::from_secs(3)));
        assert_eq!(config.log_filter(), "debug");
    }

    #[test]
    fn test_load_from_args() {
        let file = write_config(r#"{ "runner": { "drain_timeout_ms": 250 } }"#);
        let args = Args {
            config: Some(file.path().to_path_buf()),
            ..Args::default()
        };
        let config = Config::load(&args).unwrap();
        assert_eq!(config.runner_options().drain_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_config_serialization() {
        let json = serde_json::to_string_pretty(&Config::default()).unwrap();
        assert!(json.contains("\"runner\""));
        assert!(json.contains("\"connect_timeout_secs\""));
    }
}
