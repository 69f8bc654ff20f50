//! CLI 交互入口。
//!
//! 标准输入输出的问答式流程：搜索 → 选系列 → 选分卷 → 下载 → 转换推送。
//! 每一步的错误都在这里打印后回到主循环, 不向上传播。

use std::io::{self, BufRead, Write};

use anyhow::Result;

use crate::base_system::context::Config;
use crate::catalog::client::MangadexClient;

mod download;

pub fn run(config: &Config) -> Result<()> {
    println!(
        "MangaDex 分卷下载器 v{}\n\
按系列搜索漫画, 按卷下载页面图片, 可选转换为 EPUB 并推送到 Calibre。\n\
转换依赖 PATH 中的 kcc-c2e, 推送依赖 calibredb（需关闭 Calibre 桌面端）。",
        env!("CARGO_PKG_VERSION")
    );

    let client = match MangadexClient::new(config) {
        Ok(c) => c,
        Err(err) => {
            println!("初始化网络客户端失败: {err}");
            return Ok(());
        }
    };

    loop {
        let prompt = format!(
            "\n请输入系列名称进行搜索（q退出，默认保存到 {}）：",
            config.default_save_dir().display()
        );
        let input = read_line(&prompt)?;
        let text = input.trim();
        if text.is_empty() {
            continue;
        }
        if text.eq_ignore_ascii_case("q") {
            println!("已退出。");
            break;
        }

        match download::search_and_pick(&client, text) {
            Ok(Some(title)) => match download::download_series(config, &client, &title) {
                Ok(()) => println!("本次任务完成\n"),
                Err(err) => println!("下载失败: {err:#}\n"),
            },
            Ok(None) => continue,
            Err(err) => println!("搜索失败: {err:#}\n"),
        }
    }

    Ok(())
}

fn read_line(prompt: &str) -> Result<String> {
    print!("{}", prompt);
    io::stdout().flush().ok();
    let stdin = io::stdin();
    let mut line = String::new();
    stdin.lock().read_line(&mut line)?;
    Ok(line)
}
