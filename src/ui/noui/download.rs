use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};

use crate::base_system::context::Config;
use crate::base_system::series_paths::series_root;
use crate::catalog::CatalogError;
use crate::catalog::client::MangadexClient;
use crate::catalog::models::TitleSummary;
use crate::convert::calibre::{self, PublishMetadata};
use crate::convert::kcc;
use crate::download::materializer::Materializer;
use crate::download::models::{STRANDED_KEY, SeriesPlan};
use crate::download::plan::build_series_plan;
use crate::download::progress::ProgressReporter;
use crate::download::selection::parse_selection;

pub(super) fn search_and_pick(
    client: &MangadexClient,
    keyword: &str,
) -> Result<Option<TitleSummary>> {
    let titles = match client.search_titles(keyword) {
        Ok(t) => t,
        Err(CatalogError::NoResults) => {
            println!("未搜索到结果\n");
            return Ok(None);
        }
        Err(err) => return Err(err).with_context(|| format!("搜索失败: {keyword}")),
    };

    println!("\n===== 搜索结果 =====");
    for (idx, t) in titles.iter().enumerate() {
        println!("{}. {} | {} | Anilist: {}", idx + 1, t.title, t.mangadex_link, t.anilist_link);
    }
    println!("0. 取消\n");

    let choice = super::read_line("请输入编号：")?;
    let choice = choice.trim();
    if choice == "0" || choice.eq_ignore_ascii_case("q") {
        return Ok(None);
    }
    if let Ok(idx) = choice.parse::<usize>()
        && idx >= 1
        && idx <= titles.len()
    {
        return Ok(Some(titles[idx - 1].clone()));
    }

    println!("输入无效，已取消\n");
    Ok(None)
}

pub(super) fn download_series(
    config: &Config,
    client: &MangadexClient,
    title: &TitleSummary,
) -> Result<()> {
    let start_time = Instant::now();

    let contributors: Vec<String> = client
        .resolve_contributors(&title.contributor_ids)
        .into_iter()
        .filter(|name| !name.is_empty())
        .collect();

    println!("\n系列: {}", title.title);
    if !contributors.is_empty() {
        println!("作者: {}", contributors.join(" / "));
    }

    let records = client
        .fetch_chapter_feed(&title.id)
        .with_context(|| format!("拉取章节目录失败: {}", title.id))?;
    println!("共发现 {} 章", records.len());

    let plan = build_series_plan(&title.title, &records, config.range_size);
    let keys = plan.display_keys();
    if keys.is_empty() {
        println!("没有可下载的章节\n");
        return Ok(());
    }

    println!("\n===== 可用分卷 =====");
    for (idx, key) in keys.iter().enumerate() {
        let count = plan.group(key).map(|g| g.len()).unwrap_or(0);
        if key == STRANDED_KEY {
            println!("{idx}: 未分卷章节 ({count} 章)");
        } else {
            println!("{idx}: {key} ({count} 章)");
        }
    }

    let expr = super::read_line("\n选择要下载的分卷（形如 0,2-4）：")?;
    let selected = match parse_selection(expr.trim(), &keys) {
        Ok(s) => s,
        Err(err) => {
            println!("选择无效: {err}\n");
            return Ok(());
        }
    };

    let root = series_root(config, &title.title);
    println!("开始下载 {} 个分卷到 {}", selected.len(), root.display());

    let materializer = Materializer::new(client, config);
    let mut reporter = ProgressReporter::cli(selected.len());
    let report = materializer.materialize(&plan, &selected, &root, &title.id, &mut reporter)?;

    println!();
    for group in &report.groups {
        println!(
            "{}: {} 章完成 | 下载 {} 页 | 跳过 {} 页 | 失败 {} 页 | 用时 {:.1} 秒",
            group.key,
            group.chapters_done,
            group.pages_downloaded,
            group.pages_skipped,
            group.pages_failed,
            group.elapsed.as_secs_f32(),
        );
    }
    println!(
        "下载完成: {} 页 | 失败: {} 页 | 失败章节: {}",
        report.pages_downloaded(),
        report.pages_failed(),
        report.chapters_failed(),
    );
    if !report.success() {
        println!("存在失败页面/章节, 可重新运行同一选择以续传缺失部分。");
    }

    convert_and_publish(config, &plan, &selected, &root, &contributors);

    println!("用时 {:.1} 秒，已保存到 {}", start_time.elapsed().as_secs_f32(), root.display());
    Ok(())
}

/// 逐分组转换并推送。单个分组失败只打印错误码, 继续处理后面的分组。
fn convert_and_publish(
    config: &Config,
    plan: &SeriesPlan,
    selected: &[String],
    root: &Path,
    contributors: &[String],
) {
    for key in selected {
        if kcc::packaged_output(root, key).is_file() {
            println!("{key}: EPUB 已存在, 跳过转换");
            continue;
        }

        let book = match kcc::convert_group(config, root, key) {
            Ok(book) => book,
            Err(err) => {
                println!("{key}: 转换失败 [{}] {err}", err.code());
                continue;
            }
        };
        println!("{key}: 已转换 {}", book.epub_path.display());

        let cover = root.join(format!("{key}.jpg"));
        let meta = PublishMetadata {
            authors: contributors.to_vec(),
            series: plan.series_title.clone(),
            series_index: key.parse::<u32>().ok().map(f64::from),
            cover: cover.is_file().then_some(cover),
        };
        match calibre::publish(config, &book, &meta) {
            Ok(outcome) if outcome.pushed => {
                if outcome.notes.is_empty() {
                    println!("{key}: 已推送到 Calibre");
                } else {
                    println!("{key}: 已推送到 Calibre（备注: {}）", outcome.notes.join(", "));
                }
            }
            Ok(_) => println!("{key}: Calibre 推送已关闭"),
            Err(err) => println!("{key}: 推送失败 [{}] {err}", err.code()),
        }
    }
}
