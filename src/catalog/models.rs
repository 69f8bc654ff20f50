//! 目录服务返回的归一化记录。

/// 标题搜索结果的一条记录。
#[derive(Debug, Clone)]
pub struct TitleSummary {
    pub id: String,
    /// 展示标题：`title.en` 缺失时回退到 `title.ja-ro`，再回退到任意语言。
    pub title: String,
    pub mangadex_link: String,
    /// Anilist 交叉引用链接；没有 `links.al` 字段时为字面量 "N/A"。
    pub anilist_link: String,
    /// 作者/画师 ID（按 author, artist 顺序；两者相同时只保留一个）。
    pub contributor_ids: Vec<String>,
}

/// 章节目录里的一条记录。拉取后不再修改。
#[derive(Debug, Clone)]
pub struct ChapterRecord {
    pub id: String,
    /// 章节号原始字符串；缺失与格式异常都要能区分，所以不提前解析。
    pub chapter: Option<String>,
    /// 卷号原始字符串；大量系列完全没有这个字段。
    pub volume: Option<String>,
    /// 托管在第三方站点的章节无法抓取，计划阶段直接排除。
    pub external: bool,
}

/// at-home 接口返回的单章页面清单。
#[derive(Debug, Clone)]
pub struct PageManifest {
    pub base_url: String,
    pub hash: String,
    /// 页面文件名，已按阅读顺序排列。
    pub pages: Vec<String>,
}

impl PageManifest {
    pub fn page_url(&self, page: &str) -> String {
        format!("{}/data/{}/{}", self.base_url, self.hash, page)
    }
}
