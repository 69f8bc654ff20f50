//! 外部协作工具：KCC 转换与 Calibre 推送。
//!
//! 两者都是对外部 CLI 的薄封装, 核心只依赖它们的契约：
//! `convert(分组目录) -> 打包好的 EPUB` 与 `publish(EPUB, 元数据) -> 推送结果`。
//! 所有失败都带一个稳定的错误码字符串, 驱动层按码决定继续、跳过还是中止。

pub mod calibre;
pub mod kcc;

use std::path::PathBuf;

/// 一次成功转换产出的单文件电子书。
#[derive(Debug, Clone)]
pub struct PackagedBook {
    pub epub_path: PathBuf,
    /// 写进元数据的书名（系列名 + 卷号）, 不受文件名清洗限制。
    pub title: String,
}
