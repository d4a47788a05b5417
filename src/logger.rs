//! 日志系统初始化。
//!
//! 优先读取 `config/log4rs.yaml`，便于运维在不重新编译的情况下调整级别与输出目的地；
//! 该文件不存在时，按配置中的级别构建“控制台 + 按日期命名的日志文件”双输出。

use std::fs;
use std::path::Path;
use std::str::FromStr;

use chrono::Local;
use log::LevelFilter;
use log4rs::{
    append::{console::ConsoleAppender, file::FileAppender},
    config::{Appender, Config as LogConfig, Root},
    encode::pattern::PatternEncoder,
};

use crate::exception::Exception;

pub const LOG4RS_CONFIG: &str = "config/log4rs.yaml";
pub const LOG_DIR: &str = "logs";

const PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S)} {h({l:<5})} [{M}:{L}] {m}{n}";

pub fn init(level: &str) -> Result<(), Exception> {
    if Path::new(LOG4RS_CONFIG).exists() {
        return log4rs::init_file(LOG4RS_CONFIG, Default::default())
            .map_err(|e| Exception::Logger(e.to_string()));
    }
    let config = build_config(parse_level(level), LOG_DIR)?;
    log4rs::init_config(config).map_err(|e| Exception::Logger(e.to_string()))?;
    Ok(())
}

/// 无法识别的级别名按 `debug` 处理
pub fn parse_level(level: &str) -> LevelFilter {
    LevelFilter::from_str(level.trim()).unwrap_or(LevelFilter::Debug)
}

/// 日志文件名形如 `logs/log2026-01-01.log`
pub fn log_file_path(dir: &str) -> String {
    format!("{}/log{}.log", dir, Local::now().format("%Y-%m-%d"))
}

fn build_config(level: LevelFilter, dir: &str) -> Result<LogConfig, Exception> {
    fs::create_dir_all(dir)?;

    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build();
    let file = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build(log_file_path(dir))?;

    LogConfig::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .appender(Appender::builder().build("file", Box::new(file)))
        .build(
            Root::builder()
                .appender("stdout")
                .appender("file")
                .build(level),
        )
        .map_err(|e| Exception::Logger(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("info"), LevelFilter::Info);
        assert_eq!(parse_level(" WARN "), LevelFilter::Warn);
        assert_eq!(parse_level("verbose"), LevelFilter::Debug);
    }

    #[test]
    fn test_log_file_path() {
        let path = log_file_path("logs");
        assert!(path.starts_with("logs/log"));
        assert!(path.ends_with(".log"));
    }

    #[test]
    fn test_build_config_creates_dir() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        let log_dir = log_dir.to_str().unwrap();
        assert!(build_config(LevelFilter::Info, log_dir).is_ok());
        assert!(Path::new(log_dir).is_dir());
    }
}
