//! Configuration loading from TOML files

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sams_etl::{ApiSettings, Catalog, Credentials, ProgramRanges, SyncSettings};
use serde::Deserialize;

/// Global configuration for sams
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub api: ApiSettings,
    pub store: StoreConfig,
    pub sync: SyncSettings,
    pub programs: ProgramRanges,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// DuckDB database file
    pub path: PathBuf,
    /// Directory for the expected-count sidecars
    pub state_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/sams.duckdb"),
            state_dir: PathBuf::from("./data"),
        }
    }
}

/// Expand ${VAR} to environment variable value
fn expand_env_var(s: &str) -> Option<String> {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).ok()
    } else {
        Some(s.to_string())
    }
}

/// Expand a `${VAR}` value, falling back to `fallback_var` when unset or empty
fn resolve(value: &str, fallback_var: &str) -> String {
    expand_env_var(value)
        .filter(|v| !v.is_empty())
        .or_else(|| std::env::var(fallback_var).ok())
        .unwrap_or_default()
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./sams.toml (current directory)
    /// 2. ~/.config/sams/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("sams.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "sams") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default().resolved())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config.resolved())
    }

    /// Expand `${VAR}` references; credentials default to SAMS_USERNAME / SAMS_PASSWORD
    fn resolved(mut self) -> Self {
        self.api.username = resolve(&self.api.username, "SAMS_USERNAME");
        self.api.password = resolve(&self.api.password, "SAMS_PASSWORD");
        if let Some(url) = expand_env_var(&self.api.base_url) {
            self.api.base_url = url;
        }
        self
    }

    pub fn credentials(&self) -> Result<Credentials> {
        if self.api.username.is_empty() || self.api.password.is_empty() {
            anyhow::bail!(
                "API credentials not configured (set [api] username/password or SAMS_USERNAME/SAMS_PASSWORD)"
            );
        }
        Ok(Credentials {
            username: self.api.username.clone(),
            password: self.api.password.clone(),
        })
    }

    pub fn catalog(&self) -> Result<Catalog> {
        self.programs
            .catalog(self.sync.clamp_years)
            .context("Invalid [programs] configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sams_etl::{EntityType, Program, YearRange};

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.store.path, PathBuf::from("./data/sams.duckdb"));
        assert_eq!(config.sync.max_attempts, 3);
        assert_eq!(config.sync.workers, 1);
        assert_eq!(config.api.token_ttl_secs, 1800);
        assert!(!config.sync.clamp_years);
    }

    #[test]
    fn expand_env_var_simple() {
        std::env::set_var("SAMS_TEST_VAR", "test_value");
        assert_eq!(
            expand_env_var("${SAMS_TEST_VAR}"),
            Some("test_value".to_string())
        );
        std::env::remove_var("SAMS_TEST_VAR");
    }

    #[test]
    fn expand_env_var_literal() {
        assert_eq!(expand_env_var("literal"), Some("literal".to_string()));
    }

    #[test]
    fn expand_env_var_missing() {
        assert_eq!(expand_env_var("${NONEXISTENT_VAR_12345}"), None);
    }

    #[test]
    fn parse_config_toml() {
        let toml = r#"
[api]
base_url = "https://sams.example/api"
username = "dpic"
password = "${SAMS_TEST_PASSWORD_PARSE}"

[store]
path = "/tmp/sams.duckdb"

[sync]
workers = 4
bulk = true
clamp_years = true

[programs.student.ITI]
min_year = 2019
max_year = 2021
"#;
        std::env::set_var("SAMS_TEST_PASSWORD_PARSE", "hunter2");
        let config = Config::parse(toml).unwrap();
        std::env::remove_var("SAMS_TEST_PASSWORD_PARSE");

        assert_eq!(config.api.base_url, "https://sams.example/api");
        assert_eq!(config.api.username, "dpic");
        assert_eq!(config.api.password, "hunter2");
        assert_eq!(config.store.path, PathBuf::from("/tmp/sams.duckdb"));
        assert_eq!(config.store.state_dir, PathBuf::from("./data"));
        assert_eq!(config.sync.workers, 4);
        assert!(config.sync.bulk);
        assert_eq!(config.sync.max_attempts, 3);

        // a [programs.student] table replaces the defaults for students only
        assert_eq!(config.programs.student.len(), 1);
        assert_eq!(config.programs.student["ITI"], YearRange::new(2019, 2021));
        let catalog = config.catalog().unwrap();
        assert_eq!(
            catalog.range(EntityType::Student, Program::Iti),
            Some(YearRange::new(2019, 2021))
        );
        assert!(catalog.range(EntityType::Institute, Program::Diploma).is_some());
    }

    #[test]
    fn unknown_program_rejected() {
        let toml = r#"
[programs.student.MBA]
min_year = 2019
max_year = 2021
"#;
        let config = Config::parse(toml).unwrap();
        assert!(config.catalog().is_err());
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sams.toml");
        std::fs::write(&path, "[sync]\nmax_attempts = 5\n").unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.sync.max_attempts, 5);
    }

    #[test]
    fn missing_credentials_rejected() {
        let mut config = Config::default();
        config.api.username = "dpic".into();
        config.api.password = String::new();
        assert!(config.credentials().is_err());

        config.api.password = "secret".into();
        let creds = config.credentials().unwrap();
        assert_eq!(creds.username, "dpic");
    }
}
