//! 进度上报与 CLI 进度条管理。

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

struct CliBars {
    _mp: MultiProgress,
    group_bar: ProgressBar,
    page_bar: ProgressBar,
}

/// 物化阶段的进度上报。
///
/// 禁用进度条时（测试或非交互输出）所有方法退化为空操作，
/// 物化逻辑不用区分这两种情况。
pub struct ProgressReporter {
    cli: Option<CliBars>,
}

impl ProgressReporter {
    /// 面向交互终端的进度条组：分组一条、当前分组内页面一条。
    pub fn cli(group_total: usize) -> Self {
        let mp = MultiProgress::with_draw_target(ProgressDrawTarget::stderr());
        let style = ProgressStyle::with_template(
            "{prefix} [{elapsed_precise}] {wide_bar} {pos}/{len} ({eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");

        let group_bar = mp.add(ProgressBar::new(group_total as u64));
        group_bar.set_style(style.clone());
        group_bar.set_prefix("分卷下载");

        let page_bar = mp.add(ProgressBar::new(0));
        page_bar.set_style(style);
        page_bar.set_prefix("页面保存");

        Self {
            cli: Some(CliBars {
                _mp: mp,
                group_bar,
                page_bar,
            }),
        }
    }

    pub fn silent() -> Self {
        Self { cli: None }
    }

    pub(crate) fn begin_group(&self, key: &str, page_total: usize) {
        if let Some(cli) = self.cli.as_ref() {
            cli.page_bar.set_length(page_total as u64);
            cli.page_bar.set_position(0);
            cli.page_bar.set_message(key.to_string());
        }
    }

    pub(crate) fn add_group_pages(&self, pages: usize) {
        if let Some(cli) = self.cli.as_ref() {
            cli.page_bar
                .set_length(cli.page_bar.length().unwrap_or(0) + pages as u64);
        }
    }

    pub(crate) fn inc_page(&self) {
        if let Some(cli) = self.cli.as_ref() {
            cli.page_bar.inc(1);
        }
    }

    pub(crate) fn finish_group(&self) {
        if let Some(cli) = self.cli.as_ref() {
            cli.group_bar.inc(1);
        }
    }

    pub(crate) fn finish(&mut self) {
        let Some(cli) = self.cli.take() else {
            return;
        };
        cli.group_bar.finish_and_clear();
        cli.page_bar.finish_and_clear();
        drop(cli);
    }
}
