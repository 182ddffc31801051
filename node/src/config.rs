use anyhow::{Context, Result};
use berkeley_network::{ClientConfig, CoordinatorConfig, RoundConfig};
use config::{Config, File as ConfigFile};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 9000;
pub const DEFAULT_ROUND_INTERVAL_SECS: f64 = 10.0;
pub const DEFAULT_REPLY_TIMEOUT_MS: u64 = 3_000;
/// Longest accepted round interval (one day).
pub const MAX_ROUND_INTERVAL_SECS: f64 = 86_400.0;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub config_path: Option<PathBuf>,

    // Coordinator
    pub listen_host: String,
    pub listen_port: u16,
    pub round_interval_secs: f64,
    pub reply_timeout_ms: u64,

    // Node client
    pub coordinator_host: String,
    pub coordinator_port: u16,
    pub node_id: String,
    pub initial_offset: f64,
    pub drift: f64,
    pub set_system_clock: bool,

    // Observability
    pub metrics_port: Option<u16>,
    pub log_level: String,
    pub log_format: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config_path: None,
            listen_host: "0.0.0.0".to_string(),
            listen_port: DEFAULT_PORT,
            round_interval_secs: DEFAULT_ROUND_INTERVAL_SECS,
            reply_timeout_ms: DEFAULT_REPLY_TIMEOUT_MS,
            coordinator_host: "127.0.0.1".to_string(),
            coordinator_port: DEFAULT_PORT,
            node_id: random_node_id(),
            initial_offset: 0.0,
            drift: 0.0,
            set_system_clock: false,
            metrics_port: None,
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

impl AppConfig {
    /// Layer the optional config file under `BERKELEY_*` environment variables.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let resolved_path = match config_path {
            Some(path) => {
                let path = PathBuf::from(path);
                if !path.exists() {
                    anyhow::bail!(
                        "Configuration file {} not found (specified via --config)",
                        path.display()
                    );
                }
                Some(path)
            }
            None => None,
        };

        let mut builder = Config::builder();
        if let Some(path) = &resolved_path {
            builder = builder.add_source(ConfigFile::from(path.as_path()));
        }
        builder = builder.add_source(config::Environment::with_prefix("BERKELEY"));
        let config = builder.build()?;

        Self::from_config(&config, resolved_path)
    }

    fn from_config(config: &Config, config_path: Option<PathBuf>) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            config_path,
            listen_host: get_string_value(config, &["LISTEN_HOST", "coordinator.listen_host"])
                .unwrap_or(defaults.listen_host),
            listen_port: get_parsed_value(config, &["LISTEN_PORT", "coordinator.listen_port"])?
                .unwrap_or(defaults.listen_port),
            round_interval_secs: get_parsed_value(
                config,
                &["ROUND_INTERVAL_SECS", "coordinator.round_interval_secs"],
            )?
            .unwrap_or(defaults.round_interval_secs),
            reply_timeout_ms: get_parsed_value(
                config,
                &["REPLY_TIMEOUT_MS", "coordinator.reply_timeout_ms"],
            )?
            .unwrap_or(defaults.reply_timeout_ms),
            coordinator_host: get_string_value(config, &["COORDINATOR_HOST", "client.coordinator_host"])
                .unwrap_or(defaults.coordinator_host),
            coordinator_port: get_parsed_value(
                config,
                &["COORDINATOR_PORT", "client.coordinator_port"],
            )?
            .unwrap_or(defaults.coordinator_port),
            node_id: get_string_value(config, &["NODE_ID", "client.node_id"])
                .unwrap_or(defaults.node_id),
            initial_offset: get_parsed_value(config, &["INITIAL_OFFSET", "client.initial_offset"])?
                .unwrap_or(defaults.initial_offset),
            drift: get_parsed_value(config, &["DRIFT", "client.drift"])?
                .unwrap_or(defaults.drift),
            set_system_clock: get_bool_value(
                config,
                &["SET_SYSTEM_CLOCK", "client.set_system_clock"],
                defaults.set_system_clock,
            ),
            metrics_port: get_parsed_value(config, &["METRICS_PORT", "metrics.port"])?,
            log_level: get_string_value(config, &["LOG_LEVEL", "logging.level"])
                .unwrap_or(defaults.log_level),
            log_format: get_string_value(config, &["LOG_FORMAT", "logging.format"])
                .unwrap_or(defaults.log_format),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.listen_host.trim().is_empty() {
            anyhow::bail!("LISTEN_HOST must not be empty");
        }
        if self.listen_port == 0 {
            anyhow::bail!("LISTEN_PORT must be greater than zero");
        }
        if !self.round_interval_secs.is_finite()
            || self.round_interval_secs <= 0.0
            || self.round_interval_secs > MAX_ROUND_INTERVAL_SECS
        {
            anyhow::bail!(
                "ROUND_INTERVAL_SECS must be between 0 and {} seconds, got {}",
                MAX_ROUND_INTERVAL_SECS,
                self.round_interval_secs
            );
        }
        if self.reply_timeout_ms == 0 {
            anyhow::bail!("REPLY_TIMEOUT_MS must be greater than zero");
        }
        if self.coordinator_host.trim().is_empty() {
            anyhow::bail!("COORDINATOR_HOST must not be empty");
        }
        if self.coordinator_port == 0 {
            anyhow::bail!("COORDINATOR_PORT must be greater than zero");
        }
        if self.node_id.trim().is_empty() {
            anyhow::bail!("NODE_ID must not be empty");
        }
        if !self.initial_offset.is_finite() || !self.drift.is_finite() {
            anyhow::bail!("INITIAL_OFFSET and DRIFT must be finite numbers");
        }
        if self.metrics_port == Some(0) {
            anyhow::bail!("METRICS_PORT must be greater than zero when set");
        }
        if self.log_format != "pretty" && self.log_format != "json" {
            anyhow::bail!(
                "LOG_FORMAT must be 'pretty' or 'json', got '{}'",
                self.log_format
            );
        }
        Ok(())
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            listen_addr: format!("{}:{}", self.listen_host, self.listen_port),
            round: RoundConfig {
                interval: Duration::from_secs_f64(self.round_interval_secs),
                reply_timeout: Duration::from_millis(self.reply_timeout_ms),
            },
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            coordinator_addr: format!("{}:{}", self.coordinator_host, self.coordinator_port),
            node_id: self.node_id.clone(),
        }
    }

    pub fn config_source(&self) -> String {
        self.config_path
            .as_deref()
            .map(Path::display)
            .map(|path| path.to_string())
            .unwrap_or_else(|| "environment".to_string())
    }
}

pub fn random_node_id() -> String {
    format!("client-{:08x}", rand::random::<u32>())
}

/// Environment keys arrive lowercased, file keys as written.
fn key_variants<'a>(keys: &'a [&'a str]) -> impl Iterator<Item = String> + 'a {
    keys.iter()
        .flat_map(|key| [key.to_string(), key.to_lowercase()])
}

fn get_string_value(config: &Config, keys: &[&str]) -> Option<String> {
    key_variants(keys).find_map(|key| {
        config
            .get_string(&key)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

fn get_bool_value(config: &Config, keys: &[&str], default: bool) -> bool {
    for key in key_variants(keys) {
        if let Ok(value) = config.get_bool(&key) {
            return value;
        }
        if let Ok(raw) = config.get_string(&key) {
            if let Ok(parsed) = raw.trim().parse::<bool>() {
                return parsed;
            }
        }
    }
    default
}

fn get_parsed_value<T>(config: &Config, keys: &[&str]) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    for &key in keys {
        if let Some(raw) = get_string_value(config, &[key]) {
            let value = raw
                .parse::<T>()
                .with_context(|| format!("invalid value '{raw}' for {key}"))?;
            return Ok(Some(value));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.listen_port, 9000);
        assert_eq!(config.coordinator_port, 9000);
        assert!(config.node_id.starts_with("client-"));
        assert_eq!(
            config.coordinator_config().round.interval,
            Duration::from_secs(10)
        );
        assert_eq!(
            config.coordinator_config().round.reply_timeout,
            Duration::from_secs(3)
        );
    }

    #[test]
    fn file_values_override_defaults() {
        let file = write_config(
            r#"
LISTEN_PORT = 9100
ROUND_INTERVAL_SECS = 2.5
NODE_ID = "lab-a"
INITIAL_OFFSET = -1.25
SET_SYSTEM_CLOCK = true
METRICS_PORT = 9464
"#,
        );
        let config = AppConfig::load(file.path().to_str()).unwrap();

        assert_eq!(config.listen_port, 9100);
        assert_eq!(config.round_interval_secs, 2.5);
        assert_eq!(config.node_id, "lab-a");
        assert_eq!(config.initial_offset, -1.25);
        assert!(config.set_system_clock);
        assert_eq!(config.metrics_port, Some(9464));
        assert_eq!(config.config_path.as_deref(), Some(file.path()));
        assert_eq!(
            config.coordinator_config().round.interval,
            Duration::from_millis(2_500)
        );
        assert_eq!(config.client_config().node_id, "lab-a");
    }

    #[test]
    fn nested_tables_are_accepted() {
        let file = write_config(
            r#"
[coordinator]
listen_host = "127.0.0.1"
reply_timeout_ms = 500

[client]
coordinator_port = 9200
drift = 0.001
"#,
        );
        let config = AppConfig::load(file.path().to_str()).unwrap();

        assert_eq!(config.coordinator_config().listen_addr, "127.0.0.1:9000");
        assert_eq!(config.reply_timeout_ms, 500);
        assert_eq!(config.client_config().coordinator_addr, "127.0.0.1:9200");
        assert_eq!(config.drift, 0.001);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let err = AppConfig::load(Some("/nonexistent/berkeley.toml")).unwrap_err();
        assert!(err.to_string().contains("not found"), "{err}");
    }

    #[test]
    fn unparsable_number_is_an_error() {
        let file = write_config("LISTEN_PORT = \"ninety\"\n");
        let err = AppConfig::load(file.path().to_str()).unwrap_err();
        assert!(err.to_string().contains("LISTEN_PORT"), "{err}");
    }

    fn assert_invalid(mutate: impl FnOnce(&mut AppConfig), key: &str) {
        let mut config = AppConfig::default();
        mutate(&mut config);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains(key), "expected {key}: {err}");
    }

    #[test]
    fn validate_rejects_bad_values() {
        assert_invalid(|c| c.listen_port = 0, "LISTEN_PORT");
        assert_invalid(|c| c.round_interval_secs = 0.0, "ROUND_INTERVAL_SECS");
        assert_invalid(|c| c.round_interval_secs = f64::NAN, "ROUND_INTERVAL_SECS");
        assert_invalid(|c| c.round_interval_secs = 1e20, "ROUND_INTERVAL_SECS");
        assert_invalid(|c| c.reply_timeout_ms = 0, "REPLY_TIMEOUT_MS");
        assert_invalid(|c| c.coordinator_port = 0, "COORDINATOR_PORT");
        assert_invalid(|c| c.node_id = "  ".to_string(), "NODE_ID");
        assert_invalid(|c| c.drift = f64::INFINITY, "DRIFT");
        assert_invalid(|c| c.metrics_port = Some(0), "METRICS_PORT");
        assert_invalid(|c| c.log_format = "xml".to_string(), "LOG_FORMAT");
    }

    #[test]
    fn day_long_interval_is_the_upper_bound() {
        let mut config = AppConfig::default();
        config.round_interval_secs = MAX_ROUND_INTERVAL_SECS;
        config.validate().unwrap();
        assert_eq!(
            config.coordinator_config().round.interval,
            Duration::from_secs(86_400)
        );

        let file = write_config("ROUND_INTERVAL_SECS = 1e20\n");
        let loaded = AppConfig::load(file.path().to_str()).unwrap();
        assert!(loaded.validate().is_err());
    }

    #[test]
    fn random_ids_differ() {
        assert_ne!(random_node_id(), random_node_id());
    }
}
