use std::fs;
use std::path::Path;
use tracing_subscriber::filter::{EnvFilter, FilterFn, LevelFilter};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, Layer};
use tracing_appender::{non_blocking, rolling};

/// 逐轮提交记录使用的 tracing target
pub const SUBMISSION_TARGET: &str = "bundle_submission";

/// 日志管理器 - 基于target分类的日志系统
pub struct LoggerManager {
    _guards: Vec<non_blocking::WorkerGuard>,
}

impl LoggerManager {
    /// 初始化日志系统
    ///
    /// 日志分类：
    /// - 控制台: 默认 INFO，可通过 `level` (RUST_LOG 语法) 覆盖
    /// - app.log: 通用应用日志 (不含逐轮提交记录)
    /// - submission.log: 每轮 bundle 提交的高度、目标区块与结果
    pub fn init(log_dir: &str, level: &str) -> Self {
        let mut guards = Vec::new();

        // 创建日志目录
        fs::create_dir_all(Path::new(log_dir)).ok();

        let timer = UtcTime::rfc_3339();

        // 1. 控制台输出
        let console_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
        let console_layer = fmt::layer()
            .compact()
            .with_target(true)
            .with_timer(timer.clone())
            .with_filter(console_filter);

        // 2. 通用应用日志 (app.log)
        let (app_writer, app_guard) = non_blocking(rolling::daily(log_dir, "app.log"));
        guards.push(app_guard);

        let app_layer = fmt::layer()
            .compact()
            .with_writer(app_writer)
            .with_ansi(false)
            .with_target(true)
            .with_timer(timer.clone())
            .with_filter(LevelFilter::INFO)
            .with_filter(FilterFn::new(|metadata| metadata.target() != SUBMISSION_TARGET));

        // 3. 提交记录 (submission.log)
        let (submission_writer, submission_guard) =
            non_blocking(rolling::daily(log_dir, "submission.log"));
        guards.push(submission_guard);

        let submission_layer = fmt::layer()
            .compact()
            .with_writer(submission_writer)
            .with_ansi(false)
            .with_target(true)
            .with_timer(timer)
            .with_filter(FilterFn::new(|metadata| metadata.target() == SUBMISSION_TARGET));

        // 初始化tracing订阅器
        tracing_subscriber::registry()
            .with(console_layer)
            .with(app_layer)
            .with(submission_layer)
            .init();

        Self { _guards: guards }
    }
}

/// 将 panic 信息写入日志
pub fn setup_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        tracing::error!("========================================");
        tracing::error!("!!! 系统发生 PANIC !!!");
        tracing::error!("========================================");
        if let Some(location) = panic_info.location() {
            tracing::error!(
                "发生位置: {}:{}:{}",
                location.file(),
                location.line(),
                location.column()
            );
        }
        if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            tracing::error!("Panic 消息: {}", s);
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            tracing::error!("Panic 消息: {}", s);
        }
    }));
}
