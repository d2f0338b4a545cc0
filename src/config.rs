use crate::error::GuardError;
use clap::Parser;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime tunables for the protection engine. Invalid thresholds are
/// detected at construction and are fatal before any traffic is served.
#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// Fixed rate-limit window.
    pub window_ms: u64,
    /// Max requests per fixed window.
    pub max_requests_per_window: u32,
    /// Sliding-window deny threshold, requests per second.
    pub max_requests_per_second: f64,
    /// Advisory spike threshold, requests per second.
    pub spike_threshold: f64,
    /// Sliding window for burst detection.
    pub spike_window_ms: u64,
    /// Matched-pattern count at or above which traffic is suspicious.
    pub suspicious_pattern_threshold: usize,
    /// Violation count that triggers a block.
    pub violation_threshold: u32,
    /// Duration of a temporary block.
    pub block_duration_secs: u64,
    /// Temporary-block count at which blocks become permanent.
    pub permanent_block_threshold: u32,
    /// Idle TTL for fingerprint records.
    pub fingerprint_ttl_secs: u64,
    /// Distinct addresses per fingerprint before it counts as abuse.
    pub max_addresses_per_fingerprint: usize,
    /// Violation count past which challenge headers are attached.
    pub challenge_threshold: u32,
    /// Addresses exempt from every check (exact or substring match).
    pub whitelist: Vec<String>,
    /// Janitor sweep interval.
    pub janitor_interval_secs: u64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            max_requests_per_window: 100,
            max_requests_per_second: 30.0,
            spike_threshold: 20.0,
            spike_window_ms: 5_000,
            suspicious_pattern_threshold: 2,
            violation_threshold: 5,
            block_duration_secs: 300,
            permanent_block_threshold: 10,
            fingerprint_ttl_secs: 3_600,
            max_addresses_per_fingerprint: 10,
            challenge_threshold: 3,
            whitelist: Vec::new(),
            janitor_interval_secs: 60,
        }
    }
}

impl GuardConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn spike_window(&self) -> Duration {
        Duration::from_millis(self.spike_window_ms)
    }

    pub fn block_duration(&self) -> Duration {
        Duration::from_secs(self.block_duration_secs)
    }

    pub fn fingerprint_ttl(&self) -> Duration {
        Duration::from_secs(self.fingerprint_ttl_secs)
    }

    pub fn janitor_interval(&self) -> Duration {
        Duration::from_secs(self.janitor_interval_secs)
    }

    /// Fail fast on thresholds that would make the engine meaningless.
    pub fn validate(&self) -> Result<(), GuardError> {
        if self.window_ms == 0 {
            return Err(GuardError::Config("window_ms must be > 0".to_string()));
        }
        if self.max_requests_per_window == 0 {
            return Err(GuardError::Config(
                "max_requests_per_window must be > 0".to_string(),
            ));
        }
        if self.spike_window_ms == 0 {
            return Err(GuardError::Config("spike_window_ms must be > 0".to_string()));
        }
        if self.max_requests_per_second <= 0.0 {
            return Err(GuardError::Config(
                "max_requests_per_second must be > 0".to_string(),
            ));
        }
        if self.spike_threshold <= 0.0 {
            return Err(GuardError::Config("spike_threshold must be > 0".to_string()));
        }
        if self.suspicious_pattern_threshold == 0 {
            return Err(GuardError::Config(
                "suspicious_pattern_threshold must be >= 1".to_string(),
            ));
        }
        if self.violation_threshold == 0 {
            return Err(GuardError::Config(
                "violation_threshold must be > 0".to_string(),
            ));
        }
        if self.block_duration_secs == 0 {
            return Err(GuardError::Config(
                "block_duration_secs must be > 0".to_string(),
            ));
        }
        if self.permanent_block_threshold == 0 {
            return Err(GuardError::Config(
                "permanent_block_threshold must be > 0".to_string(),
            ));
        }
        if self.max_addresses_per_fingerprint == 0 {
            return Err(GuardError::Config(
                "max_addresses_per_fingerprint must be > 0".to_string(),
            ));
        }
        if self.janitor_interval_secs == 0 {
            return Err(GuardError::Config(
                "janitor_interval_secs must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Full process configuration.
///
/// Config precedence: CLI args > env vars > config file > defaults
pub struct Config {
    pub listen_addr: String,
    pub log_level: String,
    pub guard: GuardConfig,
}

/// CLI arguments structure for clap
#[derive(Debug, Default, Parser)]
#[command(name = "rampart")]
#[command(about = "Rampart - adaptive request-protection middleware")]
pub struct CliArgs {
    /// Path to configuration file (TOML or YAML)
    #[arg(long)]
    pub config_file: Option<PathBuf>,

    /// Listen address, e.g. 0.0.0.0:3000 (overrides env/config)
    #[arg(long)]
    pub listen_addr: Option<String>,

    /// Logging level: trace, debug, info, warn, error (overrides env/config)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Fixed rate-limit window in milliseconds (overrides env/config)
    #[arg(long)]
    pub window_ms: Option<u64>,

    /// Maximum requests per fixed window (overrides env/config)
    #[arg(long)]
    pub max_requests_per_window: Option<u32>,

    /// Burst deny threshold in requests per second (overrides env/config)
    #[arg(long)]
    pub max_requests_per_second: Option<f64>,

    /// Advisory spike threshold in requests per second (overrides env/config)
    #[arg(long)]
    pub spike_threshold: Option<f64>,

    /// Burst sliding window in milliseconds (overrides env/config)
    #[arg(long)]
    pub spike_window_ms: Option<u64>,

    /// Simultaneous pattern matches required for suspicion (overrides env/config)
    #[arg(long)]
    pub suspicious_pattern_threshold: Option<usize>,

    /// Violations before a block (overrides env/config)
    #[arg(long)]
    pub violation_threshold: Option<u32>,

    /// Temporary block duration in seconds (overrides env/config)
    #[arg(long)]
    pub block_duration_secs: Option<u64>,

    /// Temporary blocks before escalation to permanent (overrides env/config)
    #[arg(long)]
    pub permanent_block_threshold: Option<u32>,

    /// Fingerprint record TTL in seconds (overrides env/config)
    #[arg(long)]
    pub fingerprint_ttl_secs: Option<u64>,

    /// Distinct addresses per fingerprint before abuse (overrides env/config)
    #[arg(long)]
    pub max_addresses_per_fingerprint: Option<usize>,

    /// Violations before challenge headers are attached (overrides env/config)
    #[arg(long)]
    pub challenge_threshold: Option<u32>,

    /// Comma-separated whitelist of addresses or substrings (overrides env/config)
    #[arg(long)]
    pub whitelist: Option<String>,

    /// Janitor sweep interval in seconds (overrides env/config)
    #[arg(long)]
    pub janitor_interval_secs: Option<u64>,
}

/// Config file structure (deserialized from TOML/YAML)
#[derive(Debug, Deserialize, Clone)]
struct ConfigFile {
    guard: Option<GuardSection>,
    logging: Option<LoggingSection>,
}

#[derive(Debug, Deserialize, Clone)]
struct GuardSection {
    listen_addr: Option<String>,
    window_ms: Option<u64>,
    max_requests_per_window: Option<u32>,
    max_requests_per_second: Option<f64>,
    spike_threshold: Option<f64>,
    spike_window_ms: Option<u64>,
    suspicious_pattern_threshold: Option<usize>,
    violation_threshold: Option<u32>,
    block_duration_secs: Option<u64>,
    permanent_block_threshold: Option<u32>,
    fingerprint_ttl_secs: Option<u64>,
    max_addresses_per_fingerprint: Option<usize>,
    challenge_threshold: Option<u32>,
    whitelist: Option<Vec<String>>,
    janitor_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
struct LoggingSection {
    level: Option<String>,
}

impl Config {
    /// Load configuration with precedence: CLI args > env vars > config file > defaults
    pub fn load(cli_args: &CliArgs) -> Result<Config, GuardError> {
        // .env values never override explicitly set env vars
        dotenv::dotenv().ok();

        let file_config = if let Some(config_path) = &cli_args.config_file {
            Self::load_from_file(config_path)?
        } else {
            None
        };
        let env_config = EnvConfig::load();
        let guard_file = file_config.as_ref().and_then(|f| f.guard.clone());

        let defaults = GuardConfig::default();

        let whitelist = cli_args
            .whitelist
            .as_ref()
            .or(env_config.whitelist.as_ref())
            .map(|s| split_whitelist(s))
            .or_else(|| guard_file.as_ref().and_then(|g| g.whitelist.clone()))
            .unwrap_or_default();

        let guard = GuardConfig {
            window_ms: cli_args
                .window_ms
                .or(env_config.window_ms)
                .or_else(|| guard_file.as_ref().and_then(|g| g.window_ms))
                .unwrap_or(defaults.window_ms),
            max_requests_per_window: cli_args
                .max_requests_per_window
                .or(env_config.max_requests_per_window)
                .or_else(|| guard_file.as_ref().and_then(|g| g.max_requests_per_window))
                .unwrap_or(defaults.max_requests_per_window),
            max_requests_per_second: cli_args
                .max_requests_per_second
                .or(env_config.max_requests_per_second)
                .or_else(|| guard_file.as_ref().and_then(|g| g.max_requests_per_second))
                .unwrap_or(defaults.max_requests_per_second),
            spike_threshold: cli_args
                .spike_threshold
                .or(env_config.spike_threshold)
                .or_else(|| guard_file.as_ref().and_then(|g| g.spike_threshold))
                .unwrap_or(defaults.spike_threshold),
            spike_window_ms: cli_args
                .spike_window_ms
                .or(env_config.spike_window_ms)
                .or_else(|| guard_file.as_ref().and_then(|g| g.spike_window_ms))
                .unwrap_or(defaults.spike_window_ms),
            suspicious_pattern_threshold: cli_args
                .suspicious_pattern_threshold
                .or(env_config.suspicious_pattern_threshold)
                .or_else(|| {
                    guard_file
                        .as_ref()
                        .and_then(|g| g.suspicious_pattern_threshold)
                })
                .unwrap_or(defaults.suspicious_pattern_threshold),
            violation_threshold: cli_args
                .violation_threshold
                .or(env_config.violation_threshold)
                .or_else(|| guard_file.as_ref().and_then(|g| g.violation_threshold))
                .unwrap_or(defaults.violation_threshold),
            block_duration_secs: cli_args
                .block_duration_secs
                .or(env_config.block_duration_secs)
                .or_else(|| guard_file.as_ref().and_then(|g| g.block_duration_secs))
                .unwrap_or(defaults.block_duration_secs),
            permanent_block_threshold: cli_args
                .permanent_block_threshold
                .or(env_config.permanent_block_threshold)
                .or_else(|| guard_file.as_ref().and_then(|g| g.permanent_block_threshold))
                .unwrap_or(defaults.permanent_block_threshold),
            fingerprint_ttl_secs: cli_args
                .fingerprint_ttl_secs
                .or(env_config.fingerprint_ttl_secs)
                .or_else(|| guard_file.as_ref().and_then(|g| g.fingerprint_ttl_secs))
                .unwrap_or(defaults.fingerprint_ttl_secs),
            max_addresses_per_fingerprint: cli_args
                .max_addresses_per_fingerprint
                .or(env_config.max_addresses_per_fingerprint)
                .or_else(|| {
                    guard_file
                        .as_ref()
                        .and_then(|g| g.max_addresses_per_fingerprint)
                })
                .unwrap_or(defaults.max_addresses_per_fingerprint),
            challenge_threshold: cli_args
                .challenge_threshold
                .or(env_config.challenge_threshold)
                .or_else(|| guard_file.as_ref().and_then(|g| g.challenge_threshold))
                .unwrap_or(defaults.challenge_threshold),
            whitelist,
            janitor_interval_secs: cli_args
                .janitor_interval_secs
                .or(env_config.janitor_interval_secs)
                .or_else(|| guard_file.as_ref().and_then(|g| g.janitor_interval_secs))
                .unwrap_or(defaults.janitor_interval_secs),
        };
        guard.validate()?;

        let listen_addr = cli_args
            .listen_addr
            .as_ref()
            .or(env_config.listen_addr.as_ref())
            .or_else(|| guard_file.as_ref().and_then(|g| g.listen_addr.as_ref()))
            .unwrap_or(&"0.0.0.0:3000".to_string())
            .clone();

        let log_level = cli_args
            .log_level
            .as_ref()
            .or(env_config.log_level.as_ref())
            .or_else(|| {
                file_config
                    .as_ref()
                    .and_then(|f| f.logging.as_ref()?.level.as_ref())
            })
            .unwrap_or(&"info".to_string())
            .clone();

        Ok(Config {
            listen_addr,
            log_level,
            guard,
        })
    }

    /// Load configuration from file (TOML or YAML)
    fn load_from_file(path: &PathBuf) -> Result<Option<ConfigFile>, GuardError> {
        use config::Config as ConfigBuilder;

        if !path.exists() {
            return Err(GuardError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        let file_source = match path.extension().and_then(|s| s.to_str()) {
            Some("yaml") | Some("yml") => {
                config::File::from(path.as_path()).format(config::FileFormat::Yaml)
            }
            // Unknown extensions fall back to TOML
            _ => config::File::from(path.as_path()).format(config::FileFormat::Toml),
        };

        let builder = ConfigBuilder::builder()
            .add_source(file_source)
            .build()
            .map_err(|e| GuardError::Config(format!("Failed to load config file: {}", e)))?;

        let config_file: ConfigFile = builder
            .try_deserialize()
            .map_err(|e| GuardError::Config(format!("Failed to parse config file: {}", e)))?;

        Ok(Some(config_file))
    }
}

fn split_whitelist(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Intermediate structure for env var config (all optional for precedence)
struct EnvConfig {
    listen_addr: Option<String>,
    log_level: Option<String>,
    window_ms: Option<u64>,
    max_requests_per_window: Option<u32>,
    max_requests_per_second: Option<f64>,
    spike_threshold: Option<f64>,
    spike_window_ms: Option<u64>,
    suspicious_pattern_threshold: Option<usize>,
    violation_threshold: Option<u32>,
    block_duration_secs: Option<u64>,
    permanent_block_threshold: Option<u32>,
    fingerprint_ttl_secs: Option<u64>,
    max_addresses_per_fingerprint: Option<usize>,
    challenge_threshold: Option<u32>,
    whitelist: Option<String>,
    janitor_interval_secs: Option<u64>,
}

impl EnvConfig {
    fn load() -> Self {
        fn parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
            env::var(name).ok().and_then(|v| v.parse::<T>().ok())
        }

        Self {
            listen_addr: env::var("RAMPART_LISTEN_ADDR").ok(),
            log_level: env::var("RAMPART_LOG_LEVEL").ok(),
            window_ms: parsed("RAMPART_WINDOW_MS"),
            max_requests_per_window: parsed("RAMPART_MAX_REQUESTS_PER_WINDOW"),
            max_requests_per_second: parsed("RAMPART_MAX_REQUESTS_PER_SECOND"),
            spike_threshold: parsed("RAMPART_SPIKE_THRESHOLD"),
            spike_window_ms: parsed("RAMPART_SPIKE_WINDOW_MS"),
            suspicious_pattern_threshold: parsed("RAMPART_SUSPICIOUS_PATTERN_THRESHOLD"),
            violation_threshold: parsed("RAMPART_VIOLATION_THRESHOLD"),
            block_duration_secs: parsed("RAMPART_BLOCK_DURATION_SECS"),
            permanent_block_threshold: parsed("RAMPART_PERMANENT_BLOCK_THRESHOLD"),
            fingerprint_ttl_secs: parsed("RAMPART_FINGERPRINT_TTL_SECS"),
            max_addresses_per_fingerprint: parsed("RAMPART_MAX_ADDRESSES_PER_FINGERPRINT"),
            challenge_threshold: parsed("RAMPART_CHALLENGE_THRESHOLD"),
            whitelist: env::var("RAMPART_WHITELIST").ok(),
            janitor_interval_secs: parsed("RAMPART_JANITOR_INTERVAL_SECS"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::load(&CliArgs::default()).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:3000");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.guard.window_ms, 60_000);
        assert_eq!(config.guard.max_requests_per_window, 100);
        assert_eq!(config.guard.violation_threshold, 5);
        assert_eq!(config.guard.permanent_block_threshold, 10);
        assert!(config.guard.whitelist.is_empty());
    }

    #[test]
    fn test_cli_overrides_defaults() {
        let cli_args = CliArgs {
            max_requests_per_window: Some(7),
            whitelist: Some("10.0.0.1, 192.168.".to_string()),
            ..CliArgs::default()
        };
        let config = Config::load(&cli_args).unwrap();
        assert_eq!(config.guard.max_requests_per_window, 7);
        assert_eq!(
            config.guard.whitelist,
            vec!["10.0.0.1".to_string(), "192.168.".to_string()]
        );
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[guard]
listen_addr = "127.0.0.1:9999"
max_requests_per_window = 42
spike_threshold = 15.5
whitelist = ["203.0.113.7"]

[logging]
level = "warn"
"#;
        fs::write(&config_path, toml_content).unwrap();

        let cli_args = CliArgs {
            config_file: Some(config_path),
            ..CliArgs::default()
        };
        let config = Config::load(&cli_args).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:9999");
        assert_eq!(config.guard.max_requests_per_window, 42);
        assert_eq!(config.guard.spike_threshold, 15.5);
        assert_eq!(config.guard.whitelist, vec!["203.0.113.7".to_string()]);
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn test_cli_overrides_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");
        fs::write(
            &config_path,
            "[guard]\nmax_requests_per_window = 42\n",
        )
        .unwrap();

        let cli_args = CliArgs {
            config_file: Some(config_path),
            max_requests_per_window: Some(5),
            ..CliArgs::default()
        };
        let config = Config::load(&cli_args).unwrap();
        assert_eq!(config.guard.max_requests_per_window, 5);
    }

    #[test]
    fn test_missing_config_file_is_fatal() {
        let cli_args = CliArgs {
            config_file: Some(PathBuf::from("/nonexistent/rampart.toml")),
            ..CliArgs::default()
        };
        assert!(Config::load(&cli_args).is_err());
    }

    #[test]
    fn test_invalid_thresholds_are_fatal() {
        let cli_args = CliArgs {
            window_ms: Some(0),
            ..CliArgs::default()
        };
        assert!(matches!(
            Config::load(&cli_args),
            Err(GuardError::Config(_))
        ));

        let cli_args = CliArgs {
            max_requests_per_second: Some(0.0),
            ..CliArgs::default()
        };
        assert!(matches!(
            Config::load(&cli_args),
            Err(GuardError::Config(_))
        ));
    }

    #[test]
    fn test_guard_config_validate() {
        assert!(GuardConfig::default().validate().is_ok());
        let bad = GuardConfig {
            permanent_block_threshold: 0,
            ..GuardConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
