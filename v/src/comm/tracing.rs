use anyhow::Result;
use chrono::{Datelike, Timelike};
use tracing_log::LogTracer;
use tracing_subscriber::{fmt, EnvFilter};

/// 本地时间格式（精确到百分之一秒）/ Local timestamp with centisecond precision
struct LogTimer;

impl fmt::time::FormatTime for LogTimer {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        let now = chrono::Local::now();
        write!(
            w,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:02}",
            now.year(),
            now.month(),
            now.day(),
            now.hour(),
            now.minute(),
            now.second(),
            now.timestamp_subsec_millis() / 10
        )
    }
}

/// 解析日志级别：显式参数 > RUST_LOG > logging.level > info
/// Resolve the filter: explicit override > RUST_LOG > `logging.level` > info
fn resolve_filter(level_override: Option<&str>) -> EnvFilter {
    if let Some(level) = level_override {
        if let Ok(filter) = EnvFilter::try_new(level) {
            return filter;
        }
    }
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let level: String = crate::comm::config::get_global_config_manager()
        .ok()
        .and_then(|mgr| mgr.get("logging.level").ok())
        .unwrap_or_else(|| "info".to_string());
    EnvFilter::try_new(format!("{},sled=warn,actix_server=warn", level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// 初始化 tracing（可重复调用，仅首次生效）
/// Install the tracing subscriber (idempotent; only the first call wins)
pub fn init_tracing(level_override: Option<&str>) -> Result<()> {
    LogTracer::init().ok();
    fmt::SubscriberBuilder::default()
        .with_env_filter(resolve_filter(level_override))
        .with_timer(LogTimer)
        .compact()
        .with_target(false)
        .try_init()
        .ok();
    Ok(())
}
