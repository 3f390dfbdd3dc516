mod bootstrap;

use anyhow::Result;
use clap::Parser;
use config_crate::AppConfig;
use std::path::PathBuf;
use tracing::info;
use utils::{setup_panic_hook, LoggerManager};

use crate::bootstrap::Application;

/// 通过 Flashbots 私有中继提交铸造交易
#[derive(Debug, Parser)]
#[command(name = "flashbots_mint", version)]
struct Cli {
    /// 从指定文件加载环境变量 (默认读取当前目录的 .env)
    #[arg(long)]
    env_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.env_file {
        Some(path) => AppConfig::load_from_file(path)?,
        None => AppConfig::load()?,
    };

    // 初始化日志系统
    let _logger = LoggerManager::init(&config.log.dir, &config.log.level);

    // 设置 panic hook
    setup_panic_hook();

    info!("========================================");
    info!("  Flashbots 铸造提交系统启动");
    info!("========================================");

    let mut app = Application::start(config).await?;

    // 运行提交循环（阻塞直到停止或致命错误）
    let result = app.run().await;

    app.shutdown().await?;

    // 致命错误以非零退出码结束进程
    result?;
    Ok(())
}
