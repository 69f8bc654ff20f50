//! 下载域：计划构建、分卷选择与物化。
//!
//! 子模块：
//! - `models` — SeriesPlan / Group 与物化报告
//! - `plan` — 章节记录 → 分卷计划（含无卷信息时的章节段回退）
//! - `selection` — 选择表达式解析
//! - `materializer` — 计划落盘与页面下载工作池
//! - `progress` — CLI 进度条

pub mod materializer;
pub mod models;
pub mod plan;
pub mod progress;
pub mod selection;
