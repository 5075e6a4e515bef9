//! Default logger setup for the pathframe library and the testing suite

use anyhow::Context;
use log4rs::{
    append::{
        file::FileAppender,
        rolling_file::{
            policy::compound::{
                roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger, CompoundPolicy,
            },
            RollingFileAppender,
        },
    },
    config::{Appender, Config, Root},
    encode::pattern::PatternEncoder,
};
use std::path::Path;

use crate::config::{read_config, LoggerConfig};

const DEFAULT_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S %Z)} {l} {t} - {m}{n}";

/// this is used to change the log file for each new test
pub fn appender_config(log_file: &str) -> anyhow::Result<Config> {
    let log_file = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(DEFAULT_PATTERN)))
        .append(false)
        .build(log_file)
        .with_context(|| format!("cannot open log file {log_file}"))?;

    Config::builder()
        .appender(Appender::builder().build("log_file", Box::new(log_file)))
        .build(
            Root::builder()
                .appender("log_file")
                .build(log::LevelFilter::Debug),
        )
        .context("appender_logger config error")
}

/// this logger configuration is used for testing
pub fn appender_logger(log_file: &str) -> anyhow::Result<log4rs::Handle> {
    let config = appender_config(log_file)?;
    log4rs::init_config(config).context("appender_logger init error")
}

fn level_filter(name: &str) -> log::LevelFilter {
    match name {
        "off" => log::LevelFilter::Off,
        "error" => log::LevelFilter::Error,
        "warn" => log::LevelFilter::Warn,
        "debug" => log::LevelFilter::Debug,
        "trace" => log::LevelFilter::Trace,
        _ => log::LevelFilter::Info,
    }
}

struct RollingSettings {
    window_size: u32,
    size_limit: u64,
    log_dir: String,
    latest_file_name: String,
    archive_file_name: String,
    pattern: String,
    level_filter: log::LevelFilter,
}

impl From<Option<LoggerConfig>> for RollingSettings {
    fn from(data: Option<LoggerConfig>) -> Self {
        let data = data.unwrap_or(LoggerConfig {
            dir: None,
            file_size: None,
            archive_files: None,
            latest_file_name: None,
            archive_file_name: None,
            msg_pattern: None,
            level_filter: None,
        });

        RollingSettings {
            window_size: data.archive_files.unwrap_or(3).max(1),
            size_limit: data.file_size.unwrap_or(1) * 1024 * 1024,
            log_dir: data.dir.unwrap_or_else(|| "log".into()),
            latest_file_name: data.latest_file_name.unwrap_or_else(|| "latest".into()),
            archive_file_name: data.archive_file_name.unwrap_or_else(|| "archive".into()),
            pattern: data.msg_pattern.unwrap_or_else(|| DEFAULT_PATTERN.into()),
            level_filter: level_filter(data.level_filter.as_deref().unwrap_or("info")),
        }
    }
}

// a restart archives the previous latest file instead of truncating it
fn shift_archives(settings: &RollingSettings) {
    let dir = &settings.log_dir;
    let archive = &settings.archive_file_name;
    let latest = format!("{dir}/{}.log", settings.latest_file_name);

    if !Path::new(&latest).exists() {
        return;
    }

    let _ = std::fs::remove_file(format!("{dir}/{archive}_{}.log", settings.window_size - 1));
    for i in (1..settings.window_size).rev() {
        let _ = std::fs::rename(
            format!("{dir}/{archive}_{}.log", i - 1),
            format!("{dir}/{archive}_{i}.log"),
        );
    }
    let _ = std::fs::rename(&latest, format!("{dir}/{archive}_0.log"));
}

/// this sets the logger from either the default configuration or from the toml file
pub fn rolling_logger() -> anyhow::Result<log4rs::Handle> {
    let settings = RollingSettings::from(read_config().and_then(|config| config.logger));

    std::fs::create_dir_all(&settings.log_dir)
        .with_context(|| format!("cannot create log directory {}", settings.log_dir))?;
    shift_archives(&settings);

    let archive_file = format!(
        "{}/{}_{{}}.log",
        settings.log_dir, settings.archive_file_name
    );

    let roller = FixedWindowRoller::builder()
        .build(&archive_file, settings.window_size)
        .context("rolling_logger roller error")?;

    let trigger = SizeTrigger::new(settings.size_limit);

    let policy = CompoundPolicy::new(Box::new(trigger), Box::new(roller));

    let log_file = RollingFileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(&settings.pattern)))
        .append(false)
        .build(
            format!("{}/{}.log", settings.log_dir, settings.latest_file_name),
            Box::new(policy),
        )
        .context("rolling_logger log file error")?;

    let config = Config::builder()
        .appender(Appender::builder().build("log_file", Box::new(log_file)))
        .build(Root::builder().appender("log_file").build(settings.level_filter))
        .context("rolling_logger config error")?;

    log4rs::init_config(config).context("rolling_logger init error")
}
