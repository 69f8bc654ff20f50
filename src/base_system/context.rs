//! 全局配置结构（Config）与默认值。
//!
//! 该模块同时提供生成 `config.yml` 的字段元信息。
//! 配置以显式值的形式传入各组件构造函数，不存在进程级可变状态。

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::config::{ConfigSpec, FieldMeta};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // 网络配置
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_page_submit_delay_ms")]
    pub page_submit_delay_ms: u64,

    // 目录拉取配置
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_feed_limit")]
    pub feed_limit: usize,

    // 分卷配置
    #[serde(default = "default_range_size")]
    pub range_size: usize,

    // 路径配置
    #[serde(default)]
    pub save_path: String,

    // 导出配置
    #[serde(default = "default_ereader_profile")]
    pub ereader_profile: String,
    #[serde(default = "default_false")]
    pub delete_after_convert: bool,
    #[serde(default = "default_true")]
    pub use_calibre: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            request_timeout: default_request_timeout(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            page_submit_delay_ms: default_page_submit_delay_ms(),
            language: default_language(),
            feed_limit: default_feed_limit(),
            range_size: default_range_size(),
            save_path: String::new(),
            ereader_profile: default_ereader_profile(),
            delete_after_convert: default_false(),
            use_calibre: default_true(),
        }
    }
}

impl ConfigSpec for Config {
    const FILE_NAME: &'static str = "config.yml";

    fn fields() -> &'static [FieldMeta] {
        static FIELDS: [FieldMeta; 12] = [
            FieldMeta {
                name: "max_workers",
                description: "单章页面下载的最大并发线程数",
            },
            FieldMeta {
                name: "request_timeout",
                description: "请求超时时间（秒）",
            },
            FieldMeta {
                name: "max_retries",
                description: "被限流（429）时的最大重试次数",
            },
            FieldMeta {
                name: "retry_backoff_ms",
                description: "限流重试的固定等待时间, 单位ms",
            },
            FieldMeta {
                name: "page_submit_delay_ms",
                description: "每张页面提交下载前的固定间隔, 单位ms（软限速）",
            },
            FieldMeta {
                name: "language",
                description: "章节目录的语言过滤, 例如 en",
            },
            FieldMeta {
                name: "feed_limit",
                description: "章节目录单页上限（超出部分会被截断, 暂不支持翻页）",
            },
            FieldMeta {
                name: "range_size",
                description: "系列完全没有卷信息时, 按固定章节数分段的窗口大小",
            },
            FieldMeta {
                name: "save_path",
                description: "保存路径（books 目录的父目录, 留空表示当前目录）",
            },
            FieldMeta {
                name: "ereader_profile",
                description: "传递给 kcc-c2e 的设备 Profile, 例如 KoL",
            },
            FieldMeta {
                name: "delete_after_convert",
                description: "转换成功后是否删除原始图片目录",
            },
            FieldMeta {
                name: "use_calibre",
                description: "是否在转换完成后推送到 Calibre（需要 calibredb 在 PATH 中）",
            },
        ];
        &FIELDS
    }
}

impl Config {
    pub fn default_save_dir(&self) -> PathBuf {
        if self.save_path.trim().is_empty() {
            std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
        } else {
            PathBuf::from(&self.save_path)
        }
    }
}

/// 清理文件系统非法字符。
///
/// 系列标题里可能带 `:` `/` `?` 等字符；非法字符直接剔除，
/// 控制字符替换为 `replacement`，并避免 Windows 保留名与多字节截断 panic。
pub fn safe_fs_name(name: &str, replacement: &str, max_len: usize) -> String {
    let mut cleaned: String = name
        .chars()
        .filter_map(|ch| match ch {
            ':' | '"' | '<' | '>' | '/' | '\\' | '|' | '?' | '*' => None,
            c if (c as u32) < 32 => replacement.chars().next().or(Some('_')),
            c => Some(c),
        })
        .collect();

    while cleaned.ends_with(' ') || cleaned.ends_with('.') {
        cleaned.pop();
    }

    if cleaned.is_empty() {
        cleaned.push_str("unnamed");
    }

    const RESERVED: [&str; 22] = [
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
        "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    let upper = cleaned.to_uppercase();
    if RESERVED.contains(&upper.as_str()) {
        cleaned = format!("_{}", cleaned);
    }

    if cleaned.len() > max_len {
        // 避免在多字节 UTF-8 字符中间截断导致 panic
        let mut end = max_len;
        while !cleaned.is_char_boundary(end) && end > 0 {
            end -= 1;
        }
        cleaned.truncate(end);
        while cleaned.ends_with(' ') || cleaned.ends_with('.') {
            cleaned.pop();
        }
        if cleaned.is_empty() {
            cleaned.push_str("unnamed");
        }
    }

    cleaned
}

fn default_false() -> bool {
    false
}

fn default_true() -> bool {
    true
}

fn default_max_workers() -> usize {
    8
}

fn default_request_timeout() -> u64 {
    15
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    1500
}

fn default_page_submit_delay_ms() -> u64 {
    200
}

fn default_language() -> String {
    "en".to_string()
}

fn default_feed_limit() -> usize {
    500
}

fn default_range_size() -> usize {
    10
}

fn default_ereader_profile() -> String {
    "KoL".to_string()
}
