//! Calibre 推送封装。
//!
//! 调用 PATH 里的 `calibredb add` 把打包好的 EPUB 连同元数据入库。
//! 可选元数据缺失（封面不存在、作者列表为空）降级为备注继续推送,
//! 只有命令本身失败才返回错误。注意 calibredb 要求 Calibre 桌面端处于关闭状态。

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Command;

use thiserror::Error;
use tracing::{info, warn};

use super::PackagedBook;
use crate::base_system::context::Config;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("EPUB 不存在: {0}")]
    EpubMissing(PathBuf),
    #[error("calibredb 推送失败: {detail}")]
    PushFailed { detail: String },
}

impl PublishError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::EpubMissing(_) => "EPUB_NOT_EXIST",
            Self::PushFailed { .. } => "CALIBRE_PUSH_FAILED",
        }
    }
}

/// 推送时写入的书目元数据。
#[derive(Debug, Clone, Default)]
pub struct PublishMetadata {
    pub authors: Vec<String>,
    pub series: String,
    /// 系列内序号；stranded 与章节段分组没有。
    pub series_index: Option<f64>,
    pub cover: Option<PathBuf>,
}

#[derive(Debug)]
pub struct PublishReport {
    /// false 表示配置关闭了推送, 不是失败。
    pub pushed: bool,
    /// 降级备注（CALIBRE_DISABLED / COVER_NOT_EXIST / AUTHOR_EMPTY）。
    pub notes: Vec<&'static str>,
}

pub fn publish(
    config: &Config,
    book: &PackagedBook,
    meta: &PublishMetadata,
) -> Result<PublishReport, PublishError> {
    if !config.use_calibre {
        info!("Calibre 推送已在配置中关闭, 跳过");
        return Ok(PublishReport {
            pushed: false,
            notes: vec!["CALIBRE_DISABLED"],
        });
    }
    if !book.epub_path.is_file() {
        return Err(PublishError::EpubMissing(book.epub_path.clone()));
    }

    let mut notes = Vec::new();
    if meta.authors.is_empty() {
        notes.push("AUTHOR_EMPTY");
    }
    let cover = match meta.cover.as_deref() {
        Some(path) if path.is_file() => Some(path),
        Some(path) => {
            warn!(path = %path.display(), "封面文件不存在, 不带封面推送");
            notes.push("COVER_NOT_EXIST");
            None
        }
        None => {
            notes.push("COVER_NOT_EXIST");
            None
        }
    };

    let args = calibredb_args(book, meta, cover);
    let output = Command::new("calibredb")
        .args(&args)
        .output()
        .map_err(|err| PublishError::PushFailed {
            detail: format!("无法启动 calibredb: {err}"),
        })?;
    if !output.status.success() {
        return Err(PublishError::PushFailed {
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    info!(title = book.title, "Calibre 推送完成");
    Ok(PublishReport {
        pushed: true,
        notes,
    })
}

fn calibredb_args(
    book: &PackagedBook,
    meta: &PublishMetadata,
    cover: Option<&std::path::Path>,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["add".into()];
    if !meta.authors.is_empty() {
        args.push("--authors".into());
        args.push(meta.authors.join(" & ").into());
    }
    if !meta.series.is_empty() {
        args.push("--series".into());
        args.push(meta.series.as_str().into());
    }
    if let Some(index) = meta.series_index {
        args.push("--series-index".into());
        args.push(index.to_string().into());
    }
    args.push("--title".into());
    args.push(book.title.as_str().into());
    if let Some(cover) = cover {
        args.push("--cover".into());
        args.push(cover.into());
    }
    args.push(book.epub_path.as_path().into());
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn book() -> PackagedBook {
        PackagedBook {
            epub_path: PathBuf::from("/data/books/Blame/0001.epub"),
            title: "Blame - Vol. 1".to_string(),
        }
    }

    #[test]
    fn full_metadata_builds_the_complete_command() {
        let meta = PublishMetadata {
            authors: vec!["Tsutomu Nihei".to_string()],
            series: "Blame".to_string(),
            series_index: Some(1.0),
            cover: Some(PathBuf::from("/data/books/Blame/0001.jpg")),
        };
        let args = calibredb_args(&book(), &meta, Some(Path::new("/data/books/Blame/0001.jpg")));
        let rendered: Vec<_> = args.iter().map(|a| a.to_string_lossy().to_string()).collect();
        assert_eq!(
            rendered,
            vec![
                "add",
                "--authors",
                "Tsutomu Nihei",
                "--series",
                "Blame",
                "--series-index",
                "1",
                "--title",
                "Blame - Vol. 1",
                "--cover",
                "/data/books/Blame/0001.jpg",
                "/data/books/Blame/0001.epub",
            ]
        );
    }

    #[test]
    fn multiple_authors_are_joined_with_ampersand() {
        let meta = PublishMetadata {
            authors: vec!["A".to_string(), "B".to_string()],
            ..PublishMetadata::default()
        };
        let args = calibredb_args(&book(), &meta, None);
        let rendered: Vec<_> = args.iter().map(|a| a.to_string_lossy().to_string()).collect();
        assert!(rendered.contains(&"A & B".to_string()));
        assert!(!rendered.contains(&"--cover".to_string()));
    }

    #[test]
    fn disabled_calibre_short_circuits_with_a_note() {
        let config = Config {
            use_calibre: false,
            ..Config::default()
        };
        let report = publish(&config, &book(), &PublishMetadata::default()).unwrap();
        assert!(!report.pushed);
        assert_eq!(report.notes, vec!["CALIBRE_DISABLED"]);
    }

    #[test]
    fn missing_epub_is_rejected_before_spawning() {
        let config = Config::default();
        let err = publish(&config, &book(), &PublishMetadata::default()).unwrap_err();
        assert_eq!(err.code(), "EPUB_NOT_EXIST");
    }
}
