//! KCC（Kindle Comic Converter）转换封装。
//!
//! 调用 PATH 里的 `kcc-c2e` 把一个分组目录打包成 EPUB。
//! 目录结构检查在执行命令前做完, 每种失败对应一个稳定错误码；
//! 外部命令失败统一归为 KCC_STEP_FAILED。

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::{info, warn};

use super::PackagedBook;
use crate::base_system::context::Config;
use crate::download::models::STRANDED_KEY;

/// kcc-c2e 接受的设备 Profile 全集。不在表里的值不传给命令行。
pub const VALID_TABLET_PROFILES: [&str; 24] = [
    "K1", "K2", "K34", "K578", "KDX", "KPW", "KPW5", "KV", "KO", "K11", "KS", "KoMT", "KoG",
    "KoGHD", "KoA", "KoAHD", "KoAH2O", "KoAO", "KoN", "KoC", "KoL", "KoF", "KoS", "KoE",
];

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("系列目录不存在: {0}")]
    SeriesFolderMissing(PathBuf),
    #[error("分组目录不存在但同名 EPUB 已存在: {0}")]
    AlreadyAnEpub(PathBuf),
    #[error("分组目录不存在: {0}")]
    VolumeFolderMissing(PathBuf),
    #[error("分组目录是空的: {0}")]
    VolumeFolderEmpty(PathBuf),
    #[error("kcc-c2e 执行失败: {detail}")]
    KccStepFailed { detail: String },
    #[error("转换过程中的未分类错误: {0}")]
    Catastrophic(#[from] std::io::Error),
}

impl ConvertError {
    /// 稳定错误码。驱动层与日志按码分流, 不解析错误文案。
    pub fn code(&self) -> &'static str {
        match self {
            Self::SeriesFolderMissing(_) => "SERIES_FOLDER_DOES_NOT_EXIST",
            Self::AlreadyAnEpub(_) => "VOLUME_IS_ALREADY_AN_EPUB",
            Self::VolumeFolderMissing(_) => "VOLUME_FOLDER_DOES_NOT_EXIST",
            Self::VolumeFolderEmpty(_) => "VOLUME_FOLDER_IS_EMPTY",
            Self::KccStepFailed { .. } => "KCC_STEP_FAILED",
            Self::Catastrophic(_) => "CATASTROPHIC_ERROR",
        }
    }
}

/// 转换完成后 EPUB 的落点。驱动层用它做「已转换则跳过」的幂等检查。
pub fn packaged_output(series_root: &Path, group_key: &str) -> PathBuf {
    series_root.join(format!("{group_key}.epub"))
}

/// 把一个分组目录转换成 EPUB。
///
/// 成功后 EPUB 固定命名为 `<group_key>.epub` 放在系列目录下
/// （kcc 带 Profile 时产出 `.kepub.epub`, 这里统一改回 `.epub`）。
pub fn convert_group(
    config: &Config,
    series_root: &Path,
    group_key: &str,
) -> Result<PackagedBook, ConvertError> {
    if !series_root.is_dir() {
        return Err(ConvertError::SeriesFolderMissing(series_root.to_path_buf()));
    }

    let volume_dir = series_root.join(group_key);
    let epub_path = packaged_output(series_root, group_key);
    if !volume_dir.is_dir() {
        if epub_path.is_file() {
            return Err(ConvertError::AlreadyAnEpub(epub_path));
        }
        return Err(ConvertError::VolumeFolderMissing(volume_dir));
    }
    if std::fs::read_dir(&volume_dir)?.next().is_none() {
        return Err(ConvertError::VolumeFolderEmpty(volume_dir));
    }

    let profile = validated_profile(&config.ereader_profile);
    // Profile 非法时输出未必符合预期, 保守起见不删原始目录
    let delete_source = config.delete_after_convert && profile.is_some();
    let title = book_title(series_root, group_key);

    let args = kcc_args(&title, profile, delete_source, &volume_dir);
    info!(key = group_key, title, "开始 KCC 转换");
    let status = Command::new("kcc-c2e").args(&args).status().map_err(|err| {
        ConvertError::KccStepFailed {
            detail: format!("无法启动 kcc-c2e: {err}"),
        }
    })?;
    if !status.success() {
        return Err(ConvertError::KccStepFailed {
            detail: format!("kcc-c2e 退出码 {status}"),
        });
    }

    // 带 Profile 的输出是 .kepub.epub, 统一改名；不带 Profile 直接是 .epub
    let kepub_path = series_root.join(format!("{group_key}.kepub.epub"));
    if kepub_path.is_file() {
        std::fs::rename(&kepub_path, &epub_path)?;
    } else if !epub_path.is_file() {
        return Err(ConvertError::KccStepFailed {
            detail: format!("命令执行完但没有产出 {}", epub_path.display()),
        });
    }

    info!(path = %epub_path.display(), "KCC 转换完成");
    Ok(PackagedBook { epub_path, title })
}

/// 元数据书名：系列目录名 + 卷号（stranded 分组沿用键名）。
fn book_title(series_root: &Path, group_key: &str) -> String {
    let series = series_root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "Untitled".to_string());
    match group_key.parse::<u32>() {
        Ok(volume) => format!("{series} - Vol. {volume}"),
        Err(_) if group_key == STRANDED_KEY => format!("{series} - Stranded"),
        Err(_) => format!("{series} - {group_key}"),
    }
}

fn validated_profile(profile: &str) -> Option<&str> {
    if VALID_TABLET_PROFILES.contains(&profile) {
        Some(profile)
    } else {
        warn!(profile, "不认识的设备 Profile, 转换不带 Profile 进行且不删除原目录");
        None
    }
}

/// kcc-c2e 的参数向量。固定漫画排版、拉伸放大与 mozjpeg 压缩。
fn kcc_args(title: &str, profile: Option<&str>, delete_source: bool, dir: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["--manga-style".into()];
    if let Some(profile) = profile {
        args.push("--profile".into());
        args.push(profile.into());
    }
    args.extend(["--upscale".into(), "--stretch".into(), "--mozjpeg".into()]);
    args.push("--title".into());
    args.push(title.into());
    args.extend(["--format".into(), "EPUB".into(), "--hq".into()]);
    if delete_source {
        args.push("--delete".into());
    }
    args.push(dir.into());
    args
}
