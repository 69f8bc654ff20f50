//! 配置文件读写与带注释生成。
//!
//! `config.yml` 由字段元信息（FieldMeta）驱动生成，每个字段上方写一行注释；
//! 读取时与默认值合并，缺字段会自动补全并回写。

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_yaml::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("invalid yaml at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Copy)]
pub struct FieldMeta {
    pub name: &'static str,
    pub description: &'static str,
}

pub trait ConfigSpec: Serialize + DeserializeOwned + Default {
    const FILE_NAME: &'static str;
    fn fields() -> &'static [FieldMeta];
}

/// 读取配置；不存在时生成带注释的默认文件。
///
/// `base_dir` 为 None 时使用当前目录（配合 `--data-dir` 使用）。
pub fn load_or_create<T: ConfigSpec>(base_dir: Option<&Path>) -> Result<T, ConfigError> {
    let path = base_dir
        .map(|d| d.join(T::FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(T::FILE_NAME));
    ensure_parent(&path)?;

    if !path.exists() {
        let defaults = T::default();
        write_with_comments(&defaults, &path)?;
        return Ok(defaults);
    }

    let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    let user_yaml: Value = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.clone(),
        source,
    })?;

    // 用户文件可能只写了部分字段：先拿默认值打底，再覆盖用户写过的键。
    let mut merged = serde_yaml::to_value(T::default())
        .map_err(|err| ConfigError::Validation(err.to_string()))?;
    let user_keys = count_known_keys::<T>(&user_yaml);
    overlay(&mut merged, user_yaml);

    let config: T =
        serde_yaml::from_value(merged).map_err(|err| ConfigError::Validation(err.to_string()))?;

    // 有缺字段时回写一份完整文件，方便用户看到全部可配项。
    if user_keys < T::fields().len() {
        write_with_comments(&config, &path)?;
    }

    Ok(config)
}

pub fn write_with_comments<T: ConfigSpec>(config: &T, path: &Path) -> Result<(), ConfigError> {
    ensure_parent(path)?;
    let yaml = render_commented_yaml(config)?;
    fs::write(path, yaml).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn render_commented_yaml<T: ConfigSpec>(config: &T) -> Result<String, ConfigError> {
    let value =
        serde_yaml::to_value(config).map_err(|err| ConfigError::Validation(err.to_string()))?;
    let Value::Mapping(mapping) = value else {
        return Err(ConfigError::Validation(
            "config must serialize to a mapping".to_string(),
        ));
    };

    let mut lines = Vec::new();
    for field in T::fields() {
        if !field.description.is_empty() {
            lines.push(format!("# {}", field.description.replace('\n', "\n# ")));
        }
        let key = Value::String(field.name.to_string());
        let val = mapping.get(&key).cloned().unwrap_or(Value::Null);
        let entry = serde_yaml::to_string(&serde_yaml::Mapping::from_iter([(key, val)]))
            .map_err(|err| ConfigError::Validation(err.to_string()))?;
        lines.push(entry.trim().to_string());
    }
    lines.push(String::new());

    Ok(lines.join("\n"))
}

fn count_known_keys<T: ConfigSpec>(user_yaml: &Value) -> usize {
    let Value::Mapping(map) = user_yaml else {
        return 0;
    };
    T::fields()
        .iter()
        .filter(|f| map.contains_key(Value::String(f.name.to_string())))
        .count()
}

fn overlay(base: &mut Value, user: Value) {
    match (base, user) {
        (Value::Mapping(dest), Value::Mapping(src)) => {
            for (key, user_val) in src {
                if let Some(dest_val) = dest.get_mut(&key) {
                    overlay(dest_val, user_val);
                } else {
                    dest.insert(key, user_val);
                }
            }
        }
        (dest, other) => {
            *dest = other;
        }
    }
}

fn ensure_parent(path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base_system::context::Config;

    #[test]
    fn creates_default_file_with_comments() {
        let dir = tempfile::tempdir().unwrap();
        let config: Config = load_or_create(Some(dir.path())).unwrap();
        assert_eq!(config.range_size, 10);

        let raw = std::fs::read_to_string(dir.path().join(Config::FILE_NAME)).unwrap();
        assert!(raw.contains("# 系列完全没有卷信息时"));
        assert!(raw.contains("range_size: 10"));
    }

    #[test]
    fn user_values_override_defaults_and_missing_fields_are_backfilled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(Config::FILE_NAME);
        std::fs::write(&path, "range_size: 5\nlanguage: fr\n").unwrap();

        let config: Config = load_or_create(Some(dir.path())).unwrap();
        assert_eq!(config.range_size, 5);
        assert_eq!(config.language, "fr");
        assert_eq!(config.max_retries, 3);

        // 回写后文件包含全部字段
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("max_workers:"));
        assert!(raw.contains("range_size: 5"));
    }
}
