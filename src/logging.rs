//! 基于 `log` 门面的控制台日志输出
//!
//! 日志级别由环境变量 `LOG` 控制（ERROR/WARN/INFO/DEBUG/TRACE），未设置时关闭日志。

use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

/// 将日志写到标准错误的简单日志器
struct SimpleLogger;

impl Log for SimpleLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let color = match record.level() {
            Level::Error => 31, // 红色
            Level::Warn => 93,  // 亮黄色
            Level::Info => 34,  // 蓝色
            Level::Debug => 32, // 绿色
            Level::Trace => 90, // 亮黑色
        };
        eprintln!(
            "\u{1B}[{}m[{:>5}] {}\u{1B}[0m",
            color,
            record.level(),
            record.args(),
        );
    }

    fn flush(&self) {}
}

/// 解析 `LOG` 环境变量的取值
fn level_from(value: Option<&str>) -> LevelFilter {
    match value {
        Some("ERROR") => LevelFilter::Error,
        Some("WARN") => LevelFilter::Warn,
        Some("INFO") => LevelFilter::Info,
        Some("DEBUG") => LevelFilter::Debug,
        Some("TRACE") => LevelFilter::Trace,
        _ => LevelFilter::Off,
    }
}

/// 安装日志器，只能调用一次
pub fn init() -> Result<(), SetLoggerError> {
    static LOGGER: SimpleLogger = SimpleLogger;
    log::set_logger(&LOGGER)?;
    let level = std::env::var("LOG").ok();
    log::set_max_level(level_from(level.as_deref()));
    Ok(())
}
