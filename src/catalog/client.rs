//! MangaDex API 客户端（阻塞式）。
//!
//! 只依赖三个对外接口：标题搜索、章节目录 feed、at-home 图片服务器解析。
//! 响应解析与 HTTP 分离成纯函数，方便在没有服务端的情况下做单元测试。

use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use tracing::{debug, warn};

use crate::base_system::context::Config;

use super::CatalogError;
use super::CatalogSource;
use super::models::{ChapterRecord, PageManifest, TitleSummary};

const DEFAULT_API_URL: &str = "https://api.mangadex.org";
const DEFAULT_UPLOADS_URL: &str = "https://uploads.mangadex.org";
const CLIENT_USER_AGENT: &str = concat!(
    "mangadex-volume-downloader/",
    env!("CARGO_PKG_VERSION")
);

pub struct MangadexClient {
    client: Client,
    api_url: String,
    uploads_url: String,
    language: String,
    feed_limit: usize,
    max_retries: u32,
    retry_backoff: Duration,
}

impl MangadexClient {
    pub fn new(config: &Config) -> Result<Self, CatalogError> {
        Self::with_endpoints(config, DEFAULT_API_URL, DEFAULT_UPLOADS_URL)
    }

    /// 测试与镜像站场景允许替换 API / 上传域名。
    pub fn with_endpoints(
        config: &Config,
        api_url: &str,
        uploads_url: &str,
    ) -> Result<Self, CatalogError> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(ACCEPT, HeaderValue::from_static("application/json, */*"));
        default_headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));

        let client = Client::builder()
            .default_headers(default_headers)
            .timeout(Duration::from_secs(config.request_timeout))
            .build()?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            uploads_url: uploads_url.trim_end_matches('/').to_string(),
            language: config.language.clone(),
            feed_limit: config.feed_limit,
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        })
    }

    /// 标题搜索。空结果集是错误（NoResults），由调用方决定怎么提示。
    pub fn search_titles(&self, query: &str) -> Result<Vec<TitleSummary>, CatalogError> {
        let url = format!("{}/manga", self.api_url);
        let value = self.get_json(&url, &[("title", query.to_string())])?;
        let titles = parse_title_summaries(&value)?;
        if titles.is_empty() {
            return Err(CatalogError::NoResults);
        }
        Ok(titles)
    }

    /// 按输入顺序解析作者/画师名字，重复名字去重。
    ///
    /// 任何一次查询失败都返回占位结果而不是报错：
    /// 贡献者名字只是附加元数据，拿不到不应中断整个流程。
    pub fn resolve_contributors(&self, ids: &[String]) -> Vec<String> {
        let mut names: Vec<String> = Vec::with_capacity(ids.len());
        for id in ids {
            let url = format!("{}/author/{}", self.api_url, id);
            let name = self
                .get_json(&url, &[])
                .ok()
                .and_then(|v| parse_contributor_name(&v));
            match name {
                Some(n) => {
                    if !names.contains(&n) {
                        names.push(n);
                    }
                }
                None => {
                    warn!("贡献者 {} 名字解析失败, 使用占位结果", id);
                    return vec![String::new()];
                }
            }
        }
        names
    }

    /// 拉取单页章节目录：固定语言过滤、按章节号升序、单页上限。
    ///
    /// 超过 `feed_limit` 的系列会被截断——已知限制，暂不支持翻页。
    /// 托管在第三方站点（externalUrl 非空）的章节在这里就被排除。
    pub fn fetch_chapter_feed(&self, series_id: &str) -> Result<Vec<ChapterRecord>, CatalogError> {
        let url = format!("{}/manga/{}/feed", self.api_url, series_id);
        let value = self.get_json(
            &url,
            &[
                ("translatedLanguage[]", self.language.clone()),
                ("order[chapter]", "asc".to_string()),
                ("limit", self.feed_limit.to_string()),
            ],
        )?;
        let records = parse_chapter_records(&value)?;
        debug!(
            series_id,
            total = records.len(),
            "章节目录拉取完成"
        );
        Ok(records.into_iter().filter(|r| !r.external).collect())
    }

    fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<Value, CatalogError> {
        let resp = self.get_with_retry(url, query)?;
        Ok(resp.json()?)
    }

    fn get_bytes(&self, url: &str) -> Result<Vec<u8>, CatalogError> {
        let resp = self.get_with_retry(url, &[])?;
        Ok(resp.bytes()?.to_vec())
    }

    /// 固定次数 + 固定退避的限流重试。仅对 429 生效，其余错误直接上抛。
    fn get_with_retry(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<reqwest::blocking::Response, CatalogError> {
        let mut attempt: u32 = 0;
        loop {
            let resp = self.client.get(url).query(query).send()?;
            if resp.status().as_u16() == 429 {
                if attempt >= self.max_retries {
                    return Err(CatalogError::RateLimited {
                        attempts: attempt,
                        url: url.to_string(),
                    });
                }
                attempt += 1;
                warn!(
                    url,
                    attempt,
                    "收到 429, {}ms 后重试",
                    self.retry_backoff.as_millis()
                );
                thread::sleep(self.retry_backoff);
                continue;
            }
            return Ok(resp.error_for_status()?);
        }
    }
}

impl CatalogSource for MangadexClient {
    fn fetch_page_manifest(&self, chapter_id: &str) -> Result<PageManifest, CatalogError> {
        let url = format!("{}/at-home/server/{}", self.api_url, chapter_id);
        let value = self.get_json(&url, &[])?;
        parse_page_manifest(&value)
    }

    fn download_page(&self, manifest: &PageManifest, page: &str) -> Result<Vec<u8>, CatalogError> {
        self.get_bytes(&manifest.page_url(page))
    }

    fn fetch_cover(&self, series_id: &str, volume: u32) -> Result<Option<Vec<u8>>, CatalogError> {
        let url = format!("{}/cover", self.api_url);
        let list = self.get_json(
            &url,
            &[
                ("manga[]", series_id.to_string()),
                ("limit", "100".to_string()),
            ],
        )?;
        let Some(cover_id) = parse_cover_id(&list, volume) else {
            return Ok(None);
        };

        let detail = self.get_json(&format!("{}/cover/{}", self.api_url, cover_id), &[])?;
        let Some(file_name) = parse_cover_filename(&detail) else {
            return Ok(None);
        };

        let cover_url = format!(
            "{}/covers/{}/{}.512.jpg",
            self.uploads_url, series_id, file_name
        );
        Ok(Some(self.get_bytes(&cover_url)?))
    }
}

// ── 响应解析（纯函数）──────────────────────────────────────────────

fn parse_title_summaries(value: &Value) -> Result<Vec<TitleSummary>, CatalogError> {
    let data = value
        .get("data")
        .and_then(Value::as_array)
        .ok_or(CatalogError::Schema { field: "data" })?;

    let mut out = Vec::with_capacity(data.len());
    for entry in data {
        let Some(id) = entry.get("id").and_then(Value::as_str) else {
            warn!("搜索结果缺少 id, 跳过该条");
            continue;
        };
        let attributes = entry.get("attributes").unwrap_or(&Value::Null);

        let title = pick_title(attributes.get("title"));
        let anilist_link = attributes
            .get("links")
            .and_then(|l| l.get("al"))
            .and_then(Value::as_str)
            .map(|al| format!("https://anilist.co/manga/{al}"))
            .unwrap_or_else(|| "N/A".to_string());

        out.push(TitleSummary {
            id: id.to_string(),
            title,
            mangadex_link: format!("https://mangadex.org/title/{id}"),
            anilist_link,
            contributor_ids: pick_contributors(entry.get("relationships")),
        });
    }
    Ok(out)
}

/// 展示标题的语言回退：en → ja-ro → 任意第一个。
fn pick_title(title: Option<&Value>) -> String {
    let Some(Value::Object(map)) = title else {
        return "Untitled".to_string();
    };
    for lang in ["en", "ja-ro"] {
        if let Some(t) = map.get(lang).and_then(Value::as_str) {
            return t.to_string();
        }
    }
    map.values()
        .find_map(Value::as_str)
        .unwrap_or("Untitled")
        .to_string()
}

/// relationships 里按类型找 author / artist；相同 ID 只保留一个。
fn pick_contributors(relationships: Option<&Value>) -> Vec<String> {
    let Some(Value::Array(rels)) = relationships else {
        return Vec::new();
    };
    let find = |kind: &str| {
        rels.iter()
            .find(|r| r.get("type").and_then(Value::as_str) == Some(kind))
            .and_then(|r| r.get("id").and_then(Value::as_str))
            .map(str::to_string)
    };
    match (find("author"), find("artist")) {
        (Some(a), Some(b)) if a == b => vec![a],
        (Some(a), Some(b)) => vec![a, b],
        (Some(a), None) => vec![a],
        (None, Some(b)) => vec![b],
        (None, None) => Vec::new(),
    }
}

fn parse_contributor_name(value: &Value) -> Option<String> {
    value
        .get("data")?
        .get("attributes")?
        .get("name")?
        .as_str()
        .map(str::to_string)
}

fn parse_chapter_records(value: &Value) -> Result<Vec<ChapterRecord>, CatalogError> {
    let data = value
        .get("data")
        .and_then(Value::as_array)
        .ok_or(CatalogError::Schema { field: "data" })?;

    let mut out = Vec::with_capacity(data.len());
    for entry in data {
        let Some(id) = entry.get("id").and_then(Value::as_str) else {
            warn!("章节记录缺少 id, 跳过该条");
            continue;
        };
        let attributes = entry.get("attributes").unwrap_or(&Value::Null);
        // chapter / volume 可能是字符串或数字，统一成字符串保留原始值
        let as_attr_string = |key: &str| match attributes.get(key) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        out.push(ChapterRecord {
            id: id.to_string(),
            chapter: as_attr_string("chapter"),
            volume: as_attr_string("volume"),
            external: attributes
                .get("externalUrl")
                .map(|v| !v.is_null())
                .unwrap_or(false),
        });
    }
    Ok(out)
}

fn parse_cover_id(value: &Value, volume: u32) -> Option<String> {
    let data = value.get("data")?.as_array()?;
    data.iter()
        .find(|cover| {
            cover
                .get("attributes")
                .and_then(|a| a.get("volume"))
                .and_then(Value::as_str)
                .and_then(|v| v.trim().parse::<f64>().ok())
                .map(|v| v == volume as f64)
                .unwrap_or(false)
        })
        .and_then(|cover| cover.get("id").and_then(Value::as_str))
        .map(str::to_string)
}

fn parse_cover_filename(value: &Value) -> Option<String> {
    value
        .get("data")?
        .get("attributes")?
        .get("fileName")?
        .as_str()
        .map(str::to_string)
}

fn parse_page_manifest(value: &Value) -> Result<PageManifest, CatalogError> {
    let base_url = value
        .get("baseUrl")
        .and_then(Value::as_str)
        .ok_or(CatalogError::Schema { field: "baseUrl" })?;
    let chapter = value
        .get("chapter")
        .ok_or(CatalogError::Schema { field: "chapter" })?;
    let hash = chapter
        .get("hash")
        .and_then(Value::as_str)
        .ok_or(CatalogError::Schema {
            field: "chapter.hash",
        })?;
    let pages = chapter
        .get("data")
        .and_then(Value::as_array)
        .ok_or(CatalogError::Schema {
            field: "chapter.data",
        })?
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect();

    Ok(PageManifest {
        base_url: base_url.trim_end_matches('/').to_string(),
        hash: hash.to_string(),
        pages,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn title_parsing_falls_back_across_languages() {
        let value = json!({
            "data": [
                {
                    "id": "aaa",
                    "attributes": {
                        "title": { "en": "Blame!" },
                        "links": { "al": "38214" }
                    },
                    "relationships": [
                        { "id": "au-1", "type": "author" },
                        { "id": "ar-1", "type": "artist" },
                        { "id": "co-1", "type": "cover_art" }
                    ]
                },
                {
                    "id": "bbb",
                    "attributes": {
                        "title": { "ja-ro": "Abara" }
                    },
                    "relationships": [
                        { "id": "au-1", "type": "author" },
                        { "id": "au-1", "type": "artist" }
                    ]
                }
            ]
        });

        let titles = parse_title_summaries(&value).unwrap();
        assert_eq!(titles.len(), 2);

        assert_eq!(titles[0].title, "Blame!");
        assert_eq!(titles[0].anilist_link, "https://anilist.co/manga/38214");
        assert_eq!(titles[0].contributor_ids, vec!["au-1", "ar-1"]);

        assert_eq!(titles[1].title, "Abara");
        assert_eq!(titles[1].anilist_link, "N/A");
        // 作者与画师相同, 折叠成一个
        assert_eq!(titles[1].contributor_ids, vec!["au-1"]);
    }

    #[test]
    fn chapter_records_keep_raw_attributes_and_flag_external() {
        let value = json!({
            "data": [
                { "id": "c1", "attributes": { "chapter": "1", "volume": "1", "externalUrl": null } },
                { "id": "c2", "attributes": { "chapter": "1.5", "volume": null, "externalUrl": null } },
                { "id": "c3", "attributes": { "chapter": "2", "volume": "1", "externalUrl": "https://example.com" } }
            ]
        });

        let records = parse_chapter_records(&value).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].volume.as_deref(), Some("1"));
        assert_eq!(records[1].chapter.as_deref(), Some("1.5"));
        assert!(records[1].volume.is_none());
        assert!(records[2].external);
    }

    #[test]
    fn missing_data_array_is_a_schema_error() {
        let value = json!({ "result": "ok" });
        assert!(matches!(
            parse_chapter_records(&value),
            Err(CatalogError::Schema { field: "data" })
        ));
    }

    #[test]
    fn cover_id_matches_declared_volume() {
        let value = json!({
            "data": [
                { "id": "cov-1", "attributes": { "volume": "1" } },
                { "id": "cov-2", "attributes": { "volume": "2" } },
                { "id": "cov-x", "attributes": { "volume": null } }
            ]
        });
        assert_eq!(parse_cover_id(&value, 2).as_deref(), Some("cov-2"));
        assert!(parse_cover_id(&value, 9).is_none());
    }

    #[test]
    fn page_manifest_parsing() {
        let value = json!({
            "baseUrl": "https://node.mangadex.network/",
            "chapter": {
                "hash": "abc123",
                "data": ["x1.png", "x2.png"]
            }
        });
        let manifest = parse_page_manifest(&value).unwrap();
        assert_eq!(
            manifest.page_url("x1.png"),
            "https://node.mangadex.network/data/abc123/x1.png"
        );
        assert_eq!(manifest.pages.len(), 2);
    }
}
