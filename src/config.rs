use log::{error, info};
use rocket::serde::Deserialize;
use std::fs;

use crate::utils;

pub const CONFIG_FILE: &str = "pathframe.toml";

#[derive(Deserialize, Default)]
#[serde(crate = "rocket::serde")]
pub struct ConfigData {
    pub webserver: Option<ServerConfig>,
    pub logger: Option<LoggerConfig>,
    pub scheduler: Option<SchedulerConfig>,
    pub store: Option<StoreConfig>,
    pub tracker: Option<TrackerConfig>,
    pub generator: Option<GeneratorConfig>,
}

#[derive(Deserialize)]
#[serde(crate = "rocket::serde")]
pub struct ServerConfig {
    pub port: Option<u16>,
    pub ip: Option<String>,
}

#[derive(Deserialize)]
#[serde(crate = "rocket::serde")]
pub struct LoggerConfig {
    pub dir: Option<String>,
    pub file_size: Option<u64>,
    pub archive_files: Option<u32>,
    pub latest_file_name: Option<String>,
    pub archive_file_name: Option<String>,
    pub msg_pattern: Option<String>,
    pub level_filter: Option<String>,
}

#[derive(Deserialize)]
#[serde(crate = "rocket::serde")]
pub struct SchedulerConfig {
    pub tick_ms: Option<u64>,
}

#[derive(Deserialize)]
#[serde(crate = "rocket::serde")]
pub struct StoreConfig {
    pub dir: Option<String>,
}

#[derive(Deserialize)]
#[serde(crate = "rocket::serde")]
pub struct TrackerConfig {
    pub history_limit: Option<usize>,
}

#[derive(Deserialize)]
#[serde(crate = "rocket::serde")]
pub struct GeneratorConfig {
    pub command: Option<String>,
    pub args: Option<Vec<String>>,
}

/// This function reads pathframe configuration data from the `pathframe.toml` file.
///
/// Every section and every key is optional:
///
/// ```toml
/// [webserver]
/// ip = "127.0.0.1"
/// port = 8099
///
/// [logger]
/// dir = "log"
/// file_size = 1 # this is in MB
/// archive_files = 3
/// latest_file_name = "latest"
/// archive_file_name = "archive"
/// msg_pattern = "{d(%Y-%m-%d %H:%M:%S %Z)} {l} {t} - {m}{n}"
/// level_filter = "info"
///
/// [scheduler]
/// tick_ms = 500
///
/// [store]
/// dir = "/var/lib/pathframe"
///
/// [tracker]
/// history_limit = 100
///
/// [generator]
/// command = "generate-post"
/// args = ["--publish"]
/// ```
pub fn read_config() -> Option<ConfigData> {
    match fs::read_to_string(CONFIG_FILE) {
        Ok(file_content) => parse_config(&file_content),
        Err(_) => {
            info!("{CONFIG_FILE} - file not found, using defaults");
            None
        }
    }
}

pub fn parse_config(content: &str) -> Option<ConfigData> {
    match toml::from_str(content) {
        Ok(data) => Some(data),
        Err(error) => {
            error!("{CONFIG_FILE} - data read error - {error}");
            None
        }
    }
}

/// Fully resolved settings, every missing key replaced by its default.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub ip: String,
    pub port: u16,
    pub tick_ms: u64,
    pub store_dir: String,
    pub history_limit: usize,
    pub generator_command: Option<String>,
    pub generator_args: Vec<String>,
}

impl Settings {
    pub fn load() -> Self {
        Settings::from_config(read_config())
    }

    pub fn from_config(config: Option<ConfigData>) -> Self {
        let config = config.unwrap_or_default();
        let webserver = config.webserver;
        let generator = config.generator;

        Settings {
            ip: webserver
                .as_ref()
                .and_then(|w| w.ip.clone())
                .unwrap_or_else(|| "127.0.0.1".into()),
            port: webserver.as_ref().and_then(|w| w.port).unwrap_or(8099),
            tick_ms: config
                .scheduler
                .and_then(|s| s.tick_ms)
                .unwrap_or(500)
                .max(10),
            store_dir: config
                .store
                .and_then(|s| s.dir)
                .unwrap_or_else(|| format!("{}/.pathframe/data", utils::home_dir())),
            history_limit: config
                .tracker
                .and_then(|t| t.history_limit)
                .unwrap_or(crate::tracker::HISTORY_LIMIT_DEFAULT),
            generator_command: generator.as_ref().and_then(|g| g.command.clone()),
            generator_args: generator.and_then(|g| g.args).unwrap_or_default(),
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.ip, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_nothing_is_configured() {
        let settings = Settings::from_config(None);
        assert_eq!(settings.port, 8099);
        assert_eq!(settings.tick_ms, 500);
        assert_eq!(settings.history_limit, 100);
        assert!(settings.store_dir.ends_with(".pathframe/data"));
        assert_eq!(settings.base_url(), "http://127.0.0.1:8099");
    }

    #[test]
    fn partial_files_fill_in_the_rest() {
        let config = parse_config(
            r#"
            [webserver]
            port = 9000

            [store]
            dir = "/tmp/pathframe"

            [generator]
            command = "generate-post"
            args = ["--draft"]
            "#,
        );
        let settings = Settings::from_config(config);
        assert_eq!(settings.port, 9000);
        assert_eq!(settings.ip, "127.0.0.1");
        assert_eq!(settings.store_dir, "/tmp/pathframe");
        assert_eq!(settings.generator_command.as_deref(), Some("generate-post"));
        assert_eq!(settings.generator_args, vec!["--draft".to_string()]);
    }

    #[test]
    fn malformed_files_are_ignored() {
        assert!(parse_config("[webserver\nport = ").is_none());
    }
}
