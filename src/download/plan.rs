//! 分卷计划构建。
//!
//! 把目录 feed 里无序、稀疏的章节记录划分成 系列 → 卷 → 章节 的寻址树：
//! 有卷号的章节进对应卷分组（4 位零填充），没有的进 stranded；
//! 若整个系列一个卷号都没有，丢弃卷计划改用固定窗口的章节段划分。

use tracing::{debug, info};

use crate::base_system::context::safe_fs_name;
use crate::catalog::models::ChapterRecord;

use super::models::{GroupEntry, STRANDED_KEY, SeriesPlan};

/// 分组键的零填充宽度。一次计划内固定不变，
/// 保证卷号的字典序与数值序在磁盘上一致。
const GROUP_KEY_WIDTH: usize = 4;

/// 由章节记录构建系列计划。
///
/// 不变式：
/// - 每条非外链章节恰好落入一个分组（不重不漏）；
/// - 所有章节都落在 stranded 时整个计划重建为章节段划分；
/// - 同组同标签的重复章节后写覆盖先写（不做汉化组消歧）。
pub fn build_series_plan(
    series_title: &str,
    records: &[ChapterRecord],
    range_size: usize,
) -> SeriesPlan {
    let title = safe_fs_name(series_title, "_", 120);
    let usable: Vec<&ChapterRecord> = records.iter().filter(|r| !r.external).collect();

    let mut plan = SeriesPlan::new(&title);
    for (idx, record) in usable.iter().enumerate() {
        let key = record
            .volume
            .as_deref()
            .map(volume_group_key)
            .unwrap_or_else(|| STRANDED_KEY.to_string());
        plan.insert(&key, make_entry(record, idx));
    }

    // 全部 stranded 说明系列不用卷号：丢弃卷计划，改用章节段
    if !usable.is_empty() && plan.stranded_len() == usable.len() {
        info!("系列没有任何卷信息, 改用每 {} 章一段的划分", range_size.max(1));
        plan = build_range_plan(&title, &usable, range_size.max(1));
    }

    plan.sort_entries();
    debug!(
        groups = plan.display_keys().len(),
        chapters = plan.total_chapters(),
        "计划构建完成"
    );
    plan
}

/// 章节段划分：按 feed 顺序每 `range_size` 章一组，组键是段的序号；
/// 凑不满一段的尾部章节回到 stranded（决定见 DESIGN.md）。
fn build_range_plan(title: &str, usable: &[&ChapterRecord], range_size: usize) -> SeriesPlan {
    let mut plan = SeriesPlan::new(title);
    for (window, chunk) in usable.chunks(range_size).enumerate() {
        let full = chunk.len() == range_size;
        let key = if full {
            format!("{:0width$}", window, width = GROUP_KEY_WIDTH)
        } else {
            STRANDED_KEY.to_string()
        };
        for (offset, record) in chunk.iter().enumerate() {
            plan.insert(&key, make_entry(record, window * range_size + offset));
        }
    }
    plan
}

fn make_entry(record: &ChapterRecord, feed_index: usize) -> GroupEntry {
    let label = record
        .chapter
        .clone()
        .unwrap_or_else(|| format!("item-{feed_index}"));
    // 格式异常的章节号照常入组, 只是排在末尾——永远不因为脏元数据报错
    let order = record
        .chapter
        .as_deref()
        .and_then(|c| c.trim().parse::<f64>().ok())
        .filter(|n| n.is_finite());
    GroupEntry {
        label: safe_fs_name(&label, "_", 60),
        chapter_id: record.id.clone(),
        order,
    }
}

/// 卷号 → 分组键。
///
/// 整数卷号做 4 位零填充；小数卷号（"1.5"）与非数字卷号按 zfill
/// 方式左侧补零到 4 位, 再做一次文件名清理（键会直接成为目录名）。
fn volume_group_key(volume: &str) -> String {
    let trimmed = volume.trim();
    if let Ok(n) = trimmed.parse::<f64>()
        && n.is_finite()
        && n >= 0.0
        && n.fract() == 0.0
        && n < 10_000.0
    {
        return format!("{:0width$}", n as u64, width = GROUP_KEY_WIDTH);
    }
    let padded = if trimmed.len() < GROUP_KEY_WIDTH {
        format!("{}{}", "0".repeat(GROUP_KEY_WIDTH - trimmed.len()), trimmed)
    } else {
        trimmed.to_string()
    };
    safe_fs_name(&padded, "_", 40)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn record(id: &str, chapter: Option<&str>, volume: Option<&str>) -> ChapterRecord {
        ChapterRecord {
            id: id.to_string(),
            chapter: chapter.map(str::to_string),
            volume: volume.map(str::to_string),
            external: false,
        }
    }

    fn all_chapter_ids(plan: &SeriesPlan) -> Vec<String> {
        let mut keys = plan.display_keys();
        if plan.stranded_len() > 0 && !keys.contains(&STRANDED_KEY.to_string()) {
            keys.push(STRANDED_KEY.to_string());
        }
        let mut ids = Vec::new();
        for key in keys {
            for entry in plan.group(&key).unwrap().entries() {
                ids.push(entry.chapter_id.clone());
            }
        }
        ids
    }

    #[test]
    fn every_chapter_lands_in_exactly_one_group() {
        let records = vec![
            record("a", Some("1"), Some("1")),
            record("b", Some("2"), Some("1")),
            record("c", Some("3"), None),
            record("d", Some("4"), Some("2")),
        ];
        let plan = build_series_plan("Test", &records, 10);

        let ids = all_chapter_ids(&plan);
        assert_eq!(ids.len(), 4);
        let unique: BTreeSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), 4);
        assert_eq!(plan.stranded_len(), 1);
    }

    #[test]
    fn external_chapters_are_excluded() {
        let mut ext = record("x", Some("1"), Some("1"));
        ext.external = true;
        let records = vec![ext, record("a", Some("2"), Some("1"))];
        let plan = build_series_plan("Test", &records, 10);
        assert_eq!(plan.total_chapters(), 1);
    }

    #[test]
    fn volume_keys_sort_the_same_lexicographically_and_numerically() {
        let records = vec![
            record("a", Some("1"), Some("999")),
            record("b", Some("2"), Some("1")),
            record("c", Some("3"), Some("10")),
        ];
        let plan = build_series_plan("Test", &records, 10);
        let keys = plan.display_keys();
        assert_eq!(keys, vec!["0001", "0010", "0999"]);

        let mut numeric = keys.clone();
        numeric.sort_by_key(|k| k.parse::<u32>().unwrap());
        assert_eq!(numeric, keys);
    }

    #[test]
    fn mixed_volume_feed_groups_by_volume() {
        // 12 章：10 章卷一, 2 章卷二
        let mut records = Vec::new();
        for i in 0..10 {
            records.push(record(&format!("v1-{i}"), Some(&format!("{}", i + 1)), Some("1")));
        }
        for i in 0..2 {
            records.push(record(&format!("v2-{i}"), Some(&format!("{}", i + 11)), Some("2")));
        }
        let plan = build_series_plan("Test", &records, 10);

        assert_eq!(plan.group("0001").unwrap().len(), 10);
        assert_eq!(plan.group("0002").unwrap().len(), 2);
        assert_eq!(plan.stranded_len(), 0);
        assert_eq!(plan.display_keys(), vec!["0001", "0002"]);
    }

    #[test]
    fn untagged_feed_falls_back_to_ranges() {
        let records: Vec<_> = (0..20)
            .map(|i| record(&format!("c{i}"), Some(&format!("{}", i + 1)), None))
            .collect();
        let plan = build_series_plan("Test", &records, 10);

        assert_eq!(plan.display_keys(), vec!["0000", "0001"]);
        assert_eq!(plan.group("0000").unwrap().len(), 10);
        assert_eq!(plan.group("0001").unwrap().len(), 10);
        assert_eq!(plan.stranded_len(), 0);
        // 覆盖不变：20 章仍然不重不漏
        assert_eq!(all_chapter_ids(&plan).len(), 20);
    }

    #[test]
    fn trailing_partial_window_goes_back_to_stranded() {
        let records: Vec<_> = (0..25)
            .map(|i| record(&format!("c{i}"), Some(&format!("{}", i + 1)), None))
            .collect();
        let plan = build_series_plan("Test", &records, 10);

        assert_eq!(plan.group("0000").unwrap().len(), 10);
        assert_eq!(plan.group("0001").unwrap().len(), 10);
        assert_eq!(plan.stranded_len(), 5);
        assert_eq!(all_chapter_ids(&plan).len(), 25);
    }

    #[test]
    fn malformed_chapter_numbers_are_tolerated_and_ordered_last() {
        let records = vec![
            record("weird", Some("extra"), Some("1")),
            record("first", Some("1"), Some("1")),
            record("second", Some("2.5"), Some("1")),
        ];
        let plan = build_series_plan("Test", &records, 10);

        let entries = plan.group("0001").unwrap().entries();
        let labels: Vec<_> = entries.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, vec!["1", "2.5", "extra"]);
    }

    #[test]
    fn chapters_without_number_get_synthetic_labels() {
        let records = vec![
            record("a", None, Some("1")),
            record("b", Some("2"), Some("1")),
        ];
        let plan = build_series_plan("Test", &records, 10);

        let entries = plan.group("0001").unwrap().entries();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|e| e.label == "item-0"));
    }

    #[test]
    fn duplicate_chapter_label_keeps_last_seen_id() {
        let records = vec![
            record("group-a", Some("7"), Some("1")),
            record("group-b", Some("7"), Some("1")),
        ];
        let plan = build_series_plan("Test", &records, 10);

        let entries = plan.group("0001").unwrap().entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].chapter_id, "group-b");
    }

    #[test]
    fn fractional_volume_numbers_use_zfill_padding() {
        let records = vec![record("a", Some("1"), Some("1.5"))];
        let plan = build_series_plan("Test", &records, 10);
        assert_eq!(plan.display_keys(), vec!["01.5"]);
    }

    #[test]
    fn series_title_is_sanitized() {
        let plan = build_series_plan("Blame!: Edition?", &[record("a", Some("1"), Some("1"))], 10);
        assert_eq!(plan.series_title, "Blame! Edition");
    }
}
