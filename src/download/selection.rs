//! 分卷选择表达式解析。
//!
//! 输入是用户对枚举列表的选择："0,2-4" 这类逗号分隔的序号与区间，
//! 序号从 0 开始指向展示列表的位置而不是分组键本身。
//! 任何一个 token 非法就整体报错，不做截断或默默忽略。

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("选择不能为空")]
    Empty,
    #[error("无法识别的序号: {token}")]
    NotANumber { token: String },
    #[error("无法识别的区间: {token}")]
    BadRange { token: String },
    #[error("序号越界: {index} (最大 {max})")]
    OutOfBounds { index: usize, max: usize },
}

/// 把选择表达式展开成分组键列表，保持表达式里的出现顺序。
pub fn parse_selection(text: &str, available_keys: &[String]) -> Result<Vec<String>, SelectionError> {
    let mut indices = Vec::new();
    let mut seen_any = false;

    for token in text.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        seen_any = true;
        if let Some((lo, hi)) = token.split_once('-') {
            let lo = parse_index(lo.trim())
                .ok_or_else(|| SelectionError::BadRange { token: token.to_string() })?;
            let hi = parse_index(hi.trim())
                .ok_or_else(|| SelectionError::BadRange { token: token.to_string() })?;
            if lo > hi {
                return Err(SelectionError::BadRange { token: token.to_string() });
            }
            indices.extend(lo..=hi);
        } else {
            let idx = parse_index(token)
                .ok_or_else(|| SelectionError::NotANumber { token: token.to_string() })?;
            indices.push(idx);
        }
    }

    if !seen_any {
        return Err(SelectionError::Empty);
    }

    let mut keys = Vec::with_capacity(indices.len());
    for idx in indices {
        let key = available_keys.get(idx).ok_or(SelectionError::OutOfBounds {
            index: idx,
            max: available_keys.len().saturating_sub(1),
        })?;
        keys.push(key.clone());
    }
    Ok(keys)
}

fn parse_index(token: &str) -> Option<usize> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}
