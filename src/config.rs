/*!
 * Configuration structures and defaults for Meridian
 */

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MeridianError, Result};

/// Which backend a single-pane operation (scan/compare) currently targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
#[clap(rename_all = "lowercase")]
pub enum ProviderMode {
    Local,
    Dropbox,
    Google,
    S3,
    Sftp,
}

impl Default for ProviderMode {
    fn default() -> Self {
        Self::Local
    }
}

/// Default report format for `/export` and the `export` subcommand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
}

impl Default for ExportFormat {
    fn default() -> Self {
        Self::Json
    }
}

/// Periodic-scan control, mirrored onto disk under `schedule.*`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_interval_hours")]
    pub interval_hours: f64,
    #[serde(default)]
    pub last_run: f64,
}

fn default_interval_hours() -> f64 {
    24.0
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_hours: default_interval_hours(),
            last_run: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub smtp_host: Option<String>,
    #[serde(default)]
    pub smtp_port: Option<u16>,
    #[serde(default)]
    pub from_address: Option<String>,
    #[serde(default)]
    pub to_addresses: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: Option<String>,
}

/// Top-level configuration document, loaded from TOML (spec §6's key table)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_true")]
    pub ignore_system_files: bool,

    #[serde(default = "default_system_files")]
    pub system_files: Vec<String>,

    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,

    #[serde(default)]
    pub export_format: ExportFormat,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub mode: ProviderMode,

    #[serde(default)]
    pub local_path: Option<PathBuf>,

    #[serde(default = "default_max_deletions_percent")]
    pub max_deletions_percent: f64,

    #[serde(default = "default_max_deletions_count")]
    pub max_deletions_count: u64,

    #[serde(default = "default_canary_files")]
    pub canary_files: Vec<String>,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub email: EmailConfig,

    #[serde(default)]
    pub webhook: WebhookConfig,

    /// Open Question 2: portable conflict-copy detection. None keeps the
    /// default literal-substring match.
    #[serde(default)]
    pub conflict_pattern: Option<String>,

    /// Open Question 3: require checksum equality (falling back to size)
    /// before the Decision Engine calls a pair identical.
    #[serde(default)]
    pub deep_equal: bool,

    /// Number of concurrent transfer workers (spec §4.6 default: 5)
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
}

fn default_true() -> bool {
    true
}

fn default_port() -> u16 {
    8080
}

fn default_max_deletions_percent() -> f64 {
    10.0
}

fn default_max_deletions_count() -> u64 {
    50
}

fn default_parallelism() -> usize {
    5
}

fn default_system_files() -> Vec<String> {
    vec![
        ".DS_Store".into(),
        "Thumbs.db".into(),
        "desktop.ini".into(),
        ".dropbox".into(),
        ".dropbox.attr".into(),
        "Icon\r".into(),
        "Icon".into(),
        ".localized".into(),
        "*.alias".into(),
        "*.lnk".into(),
        "*.symlink".into(),
    ]
}

fn default_exclude_patterns() -> Vec<String> {
    vec![
        ".git".into(),
        "node_modules".into(),
        "__pycache__".into(),
        ".venv".into(),
        ".env".into(),
    ]
}

fn default_canary_files() -> Vec<String> {
    vec![".sys_canary".into(), "canary.dat".into()]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ignore_system_files: default_true(),
            system_files: default_system_files(),
            exclude_patterns: default_exclude_patterns(),
            export_format: ExportFormat::default(),
            port: default_port(),
            mode: ProviderMode::default(),
            local_path: None,
            max_deletions_percent: default_max_deletions_percent(),
            max_deletions_count: default_max_deletions_count(),
            canary_files: default_canary_files(),
            schedule: ScheduleConfig::default(),
            email: EmailConfig::default(),
            webhook: WebhookConfig::default(),
            conflict_pattern: None,
            deep_equal: false,
            parallelism: default_parallelism(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| MeridianError::Config(format!("failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| MeridianError::Config(format!("failed to parse config file: {}", e)))
    }

    /// Load configuration with fallback priority:
    /// 1. ./meridian.toml (project-specific)
    /// 2. ~/.meridian/meridian.toml (user defaults)
    /// 3. Built-in defaults
    pub fn load_with_fallback() -> Self {
        if let Ok(config) = Self::load(Path::new("meridian.toml")) {
            return config;
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".meridian").join("meridian.toml");
            if let Ok(config) = Self::load(&user_config) {
                return config;
            }
        }

        Self::default()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| MeridianError::Config(format!("failed to serialize config: {}", e)))?;
        std::fs::write(path, content)
            .map_err(|e| MeridianError::Config(format!("failed to write config file: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = Config::default();
        assert_eq!(config.max_deletions_count, 50);
        assert_eq!(config.max_deletions_percent, 10.0);
        assert!(config.system_files.contains(&".DS_Store".to_string()));
        assert!(config.canary_files.contains(&"canary.dat".to_string()));
        assert_eq!(config.parallelism, 5);
    }

    #[test]
    fn roundtrip_through_toml() {
        let config = Config::default();
        let serialized = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.max_deletions_count, config.max_deletions_count);
        assert_eq!(parsed.system_files, config.system_files);
    }

    #[test]
    fn partial_toml_document_uses_defaults() {
        let doc = r#"
            port = 9000

            [schedule]
            enabled = true
            interval_hours = 6
        "#;
        let config: Config = toml::from_str(doc).unwrap();
        assert_eq!(config.port, 9000);
        assert!(config.schedule.enabled);
        assert_eq!(config.schedule.interval_hours, 6.0);
        assert_eq!(config.max_deletions_count, 50);
    }
}
