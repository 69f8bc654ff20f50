//! MangaDex 分卷下载器。
//!
//! 本 crate 负责：目录检索、分卷计划构建、页面下载与续传、
//! 可选的 KCC 转换与 Calibre 推送。
//!
//! 代码结构（读代码入口）：
//! - `base_system`：配置/日志/路径等基础设施
//! - `catalog`：MangaDex API 客户端与响应解析
//! - `download`：计划构建、分卷选择与物化
//! - `convert`：kcc-c2e / calibredb 外部工具封装
//! - `ui`：问答式 CLI

use anyhow::{Result, anyhow};
use clap::Parser;

mod base_system;
mod catalog;
mod convert;
mod download;
mod ui;

use base_system::config::load_or_create;
use base_system::context::Config;
use base_system::logging::{LogOptions, LogSystem};
use tracing::info;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "mangadex-volume-downloader")]
#[command(about = "MangaDex volume downloader (CLI)")]
struct Cli {
    /// 启用调试日志输出
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// 显示版本信息后退出
    #[arg(long, default_value_t = false)]
    version: bool,

    /// 数据目录路径（用于存放 config.yml 和 logs 等文件，方便 Docker 挂载）
    #[arg(long)]
    data_dir: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("MangaDex Volume Downloader v{}", VERSION);
        return Ok(());
    }

    let data_dir = cli.data_dir.as_deref().map(std::path::Path::new);
    let log = LogSystem::init(
        LogOptions {
            debug: cli.debug,
            use_color: true,
            archive_on_exit: true,
        },
        data_dir,
    )
    .map_err(|e| anyhow!(e))?;

    let config = load_or_create::<Config>(data_dir).map_err(|e| anyhow!(e.to_string()))?;

    info!(target: "startup", "当前版本: v{}", VERSION);
    let result = ui::noui::run(&config);
    log.safe_exit();
    result
}
