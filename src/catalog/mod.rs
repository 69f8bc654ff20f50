//! 目录服务（MangaDex）客户端模块入口。
//!
//! 子模块：
//! - `models` — 归一化记录（TitleSummary / ChapterRecord / PageManifest）
//! - `client` — reqwest 阻塞客户端与响应解析

pub mod client;
pub mod models;

use thiserror::Error;

use models::PageManifest;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("没有找到匹配的结果")]
    NoResults,
    #[error("请求被限流, 已重试 {attempts} 次: {url}")]
    RateLimited { attempts: u32, url: String },
    #[error("请求失败: {0}")]
    Http(#[from] reqwest::Error),
    #[error("响应缺少字段: {field}")]
    Schema { field: &'static str },
}

/// 物化阶段对目录服务的依赖面。
///
/// 单独抽出 trait 是为了让下载编排可以在测试里换成内存实现。
pub trait CatalogSource {
    /// 拉取单章页面清单；429 按客户端的重试策略处理。
    fn fetch_page_manifest(&self, chapter_id: &str) -> Result<PageManifest, CatalogError>;

    /// 下载一张页面的原始字节。
    fn download_page(&self, manifest: &PageManifest, page: &str) -> Result<Vec<u8>, CatalogError>;

    /// 拉取指定卷的封面字节；没有匹配的封面时返回 `Ok(None)`，不算错误。
    fn fetch_cover(&self, series_id: &str, volume: u32) -> Result<Option<Vec<u8>>, CatalogError>;
}
