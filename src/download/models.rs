//! 下载相关的数据模型定义。
//!
//! 核心是 SeriesPlan / Group：系列 → 卷（或章节段）→ 章节 的寻址树，
//! 由 `plan` 模块一次性构建，之后物化与选择阶段只读。

use std::collections::BTreeMap;
use std::time::Duration;

/// 没有卷信息的章节所在分组的固定键。
///
/// 字典序排在全部 4 位零填充数字键之后，磁盘目录顺序与显示顺序一致。
pub const STRANDED_KEY: &str = "stranded";

#[derive(Debug, Clone)]
pub struct GroupEntry {
    /// 章节标签：章节号原始字符串, 或缺失时的合成标签（item-N）。
    pub label: String,
    pub chapter_id: String,
    /// 组内排序键：章节号解析结果；解析不了的排在最后, 保持进入顺序。
    pub(crate) order: Option<f64>,
}

/// 一个计划分组（一卷或一个章节段），对应一个打包输出。
#[derive(Debug, Clone, Default)]
pub struct Group {
    entries: Vec<GroupEntry>,
}

impl Group {
    /// 插入一条章节记录；同标签重复时后写覆盖先写。
    pub(crate) fn insert(&mut self, entry: GroupEntry) {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.label == entry.label) {
            *existing = entry;
        } else {
            self.entries.push(entry);
        }
    }

    pub(crate) fn sort_entries(&mut self) {
        // 稳定排序：可解析的章节号升序, 解析失败的保持原有相对顺序排在末尾
        self.entries.sort_by(|a, b| match (a.order, b.order) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
    }

    pub fn entries(&self) -> &[GroupEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 一次目录拉取对应的完整计划。构建完成后只读，不做持久化；
/// 重启后重新从目录推导，靠文件树上的存在性检查实现断点续传。
#[derive(Debug, Clone)]
pub struct SeriesPlan {
    pub series_title: String,
    groups: BTreeMap<String, Group>,
}

impl SeriesPlan {
    pub(crate) fn new(series_title: &str) -> Self {
        let mut groups = BTreeMap::new();
        groups.insert(STRANDED_KEY.to_string(), Group::default());
        Self {
            series_title: series_title.to_string(),
            groups,
        }
    }

    pub(crate) fn insert(&mut self, group_key: &str, entry: GroupEntry) {
        self.groups.entry(group_key.to_string()).or_default().insert(entry);
    }

    pub(crate) fn sort_entries(&mut self) {
        for group in self.groups.values_mut() {
            group.sort_entries();
        }
    }

    pub fn group(&self, key: &str) -> Option<&Group> {
        self.groups.get(key)
    }

    pub fn stranded_len(&self) -> usize {
        self.groups.get(STRANDED_KEY).map(Group::len).unwrap_or(0)
    }

    pub fn total_chapters(&self) -> usize {
        self.groups.values().map(Group::len).sum()
    }

    /// 展示顺序的分组键；空的 stranded 分组不出现在枚举里。
    pub fn display_keys(&self) -> Vec<String> {
        self.groups
            .iter()
            .filter(|(key, group)| key.as_str() != STRANDED_KEY || !group.is_empty())
            .map(|(key, _)| key.clone())
            .collect()
    }
}

// ── 物化结果 ──────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MaterializationReport {
    pub groups: Vec<GroupReport>,
}

impl MaterializationReport {
    pub fn pages_downloaded(&self) -> usize {
        self.groups.iter().map(|g| g.pages_downloaded).sum()
    }

    pub fn pages_failed(&self) -> usize {
        self.groups.iter().map(|g| g.pages_failed).sum()
    }

    pub fn chapters_failed(&self) -> usize {
        self.groups.iter().map(|g| g.chapters_failed).sum()
    }

    pub fn success(&self) -> bool {
        self.pages_failed() == 0 && self.chapters_failed() == 0
    }
}

#[derive(Debug)]
pub struct GroupReport {
    pub key: String,
    pub chapters_done: usize,
    pub chapters_failed: usize,
    pub pages_downloaded: usize,
    pub pages_skipped: usize,
    pub pages_failed: usize,
    pub cover_written: bool,
    pub elapsed: Duration,
}

impl GroupReport {
    pub(crate) fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            chapters_done: 0,
            chapters_failed: 0,
            pages_downloaded: 0,
            pages_skipped: 0,
            pages_failed: 0,
            cover_written: false,
            elapsed: Duration::ZERO,
        }
    }
}
