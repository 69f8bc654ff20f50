//! 系列在磁盘上的目录约定：`<save_path>/books/<清理后的系列标题>/`。

use std::path::PathBuf;

use crate::base_system::context::{Config, safe_fs_name};

pub fn series_folder_name(series_title: &str) -> String {
    safe_fs_name(series_title, "_", 120)
}

pub fn series_root(config: &Config, series_title: &str) -> PathBuf {
    config
        .default_save_dir()
        .join("books")
        .join(series_folder_name(series_title))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn series_root_is_under_books() {
        let mut config = Config::default();
        config.save_path = "/tmp/md".to_string();
        let root = series_root(&config, "Blame!: Master Edition");
        assert_eq!(
            root,
            PathBuf::from("/tmp/md/books/Blame! Master Edition")
        );
    }
}
