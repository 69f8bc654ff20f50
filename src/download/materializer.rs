//! 计划物化：把 SeriesPlan 落成磁盘上的目录树与页面图片。
//!
//! 幂等是这里的硬约束：同一计划重复物化不产生重复下载，
//! 断点续传完全靠文件存在性检查, 不维护任何状态文件。
//! 页面下载走固定大小的工作池, 提交侧做固定间隔的节流。

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel as channel;
use tracing::{debug, warn};

use crate::base_system::context::Config;
use crate::catalog::CatalogSource;
use crate::catalog::models::PageManifest;

use super::models::{GroupReport, MaterializationReport, SeriesPlan};
use super::progress::ProgressReporter;

/// 页面落盘的固定宽度序号文件名。原始文件名与扩展名在这一步丢弃。
const PAGE_INDEX_WIDTH: usize = 5;

/// 续传检查接受的历史扩展名。写入时统一为 png。
const ACCEPTED_PAGE_EXTENSIONS: [&str; 2] = ["png", "jpg"];

#[derive(Debug, Clone, Copy)]
enum PageEvent {
    Saved,
    Failed,
}

pub struct Materializer<'a, C: CatalogSource + Sync> {
    catalog: &'a C,
    max_workers: usize,
    submit_delay: Duration,
}

impl<'a, C: CatalogSource + Sync> Materializer<'a, C> {
    pub fn new(catalog: &'a C, config: &Config) -> Self {
        Self {
            catalog,
            max_workers: config.max_workers.clamp(1, 64),
            submit_delay: Duration::from_millis(config.page_submit_delay_ms),
        }
    }

    /// 按给定顺序物化选中的分组。
    ///
    /// 单页失败与单章清单拉取失败都只记入报告, 不中断兄弟章节；
    /// 只有目录创建这类本地文件系统错误才会整体返回 Err。
    pub fn materialize(
        &self,
        plan: &SeriesPlan,
        selected_keys: &[String],
        series_root: &Path,
        series_id: &str,
        reporter: &mut ProgressReporter,
    ) -> Result<MaterializationReport> {
        std::fs::create_dir_all(series_root)
            .with_context(|| format!("无法创建系列目录 {}", series_root.display()))?;

        let mut report = MaterializationReport::default();
        for key in selected_keys {
            let Some(group) = plan.group(key) else {
                warn!(key, "选中的分组在计划里不存在, 跳过");
                continue;
            };
            let started = Instant::now();
            let mut group_report = GroupReport::new(key);

            self.write_cover(key, series_id, series_root, &mut group_report);

            let group_dir = series_root.join(key);
            std::fs::create_dir_all(&group_dir)
                .with_context(|| format!("无法创建分组目录 {}", group_dir.display()))?;

            reporter.begin_group(key, 0);
            for entry in group.entries() {
                let chapter_dir = group_dir.join(&entry.label);
                std::fs::create_dir_all(&chapter_dir)
                    .with_context(|| format!("无法创建章节目录 {}", chapter_dir.display()))?;

                let manifest = match self.catalog.fetch_page_manifest(&entry.chapter_id) {
                    Ok(m) => m,
                    Err(err) => {
                        warn!(
                            chapter = %entry.label,
                            error = %err,
                            "章节页面清单拉取失败, 跳过该章"
                        );
                        group_report.chapters_failed += 1;
                        continue;
                    }
                };
                reporter.add_group_pages(manifest.pages.len());

                let (saved, skipped, failed) =
                    self.fetch_chapter_pages(&manifest, &chapter_dir, reporter);
                group_report.pages_downloaded += saved;
                group_report.pages_skipped += skipped;
                group_report.pages_failed += failed;
                if failed == 0 {
                    group_report.chapters_done += 1;
                } else {
                    group_report.chapters_failed += 1;
                }
            }

            group_report.elapsed = started.elapsed();
            debug!(
                key,
                downloaded = group_report.pages_downloaded,
                skipped = group_report.pages_skipped,
                failed = group_report.pages_failed,
                "分组物化完成"
            );
            reporter.finish_group();
            report.groups.push(group_report);
        }
        reporter.finish();
        Ok(report)
    }

    /// 单章页面下载：已存在的页面直接跳过，其余进工作池。
    /// 返回 (下载数, 跳过数, 失败数)。
    fn fetch_chapter_pages(
        &self,
        manifest: &PageManifest,
        chapter_dir: &Path,
        reporter: &ProgressReporter,
    ) -> (usize, usize, usize) {
        let mut pending: Vec<(usize, &str)> = Vec::new();
        let mut skipped = 0usize;
        for (idx, page) in manifest.pages.iter().enumerate() {
            if page_exists(chapter_dir, idx) {
                skipped += 1;
                reporter.inc_page();
            } else {
                pending.push((idx, page.as_str()));
            }
        }
        if pending.is_empty() {
            return (0, skipped, 0);
        }

        let workers = self.max_workers.min(pending.len());
        let (tx_job, rx_job) = channel::unbounded::<(usize, &str)>();
        let (tx_evt, rx_evt) = channel::unbounded::<PageEvent>();

        std::thread::scope(|s| {
            for _ in 0..workers {
                let rx_job = rx_job.clone();
                let tx_evt = tx_evt.clone();
                s.spawn(move || {
                    for (idx, page) in rx_job.iter() {
                        let evt = match self.catalog.download_page(manifest, page) {
                            Ok(bytes) => {
                                let target = page_path(chapter_dir, idx);
                                match std::fs::write(&target, normalize_to_png(bytes)) {
                                    Ok(()) => PageEvent::Saved,
                                    Err(err) => {
                                        warn!(
                                            path = %target.display(),
                                            error = %err,
                                            "页面写入失败"
                                        );
                                        PageEvent::Failed
                                    }
                                }
                            }
                            Err(err) => {
                                warn!(page, error = %err, "页面下载失败");
                                PageEvent::Failed
                            }
                        };
                        let _ = tx_evt.send(evt);
                    }
                });
            }
            drop(tx_evt);

            // 提交侧节流：每次入队之间隔固定延迟, 兜住远端的速率限制
            for job in pending {
                let _ = tx_job.send(job);
                if !self.submit_delay.is_zero() {
                    std::thread::sleep(self.submit_delay);
                }
            }
            drop(tx_job);
        });

        let mut saved = 0usize;
        let mut failed = 0usize;
        for evt in rx_evt.iter() {
            reporter.inc_page();
            match evt {
                PageEvent::Saved => saved += 1,
                PageEvent::Failed => failed += 1,
            }
        }
        (saved, skipped, failed)
    }

    /// 分组封面：键能还原成卷号才有封面可查（stranded 与章节段没有）。
    /// 同名文件已存在则跳过；远端没有匹配封面不算错误。
    fn write_cover(
        &self,
        key: &str,
        series_id: &str,
        series_root: &Path,
        group_report: &mut GroupReport,
    ) {
        let Ok(volume) = key.parse::<u32>() else {
            return;
        };
        let cover_path = series_root.join(format!("{key}.jpg"));
        if cover_path.exists() {
            return;
        }
        match self.catalog.fetch_cover(series_id, volume) {
            Ok(Some(bytes)) => {
                if let Err(err) = std::fs::write(&cover_path, bytes) {
                    warn!(path = %cover_path.display(), error = %err, "封面写入失败");
                } else {
                    group_report.cover_written = true;
                }
            }
            Ok(None) => debug!(key, "远端没有这一卷的封面"),
            Err(err) => warn!(key, error = %err, "封面拉取失败, 继续物化章节"),
        }
    }
}

fn page_path(chapter_dir: &Path, idx: usize) -> PathBuf {
    chapter_dir.join(format!("{:0width$}.png", idx, width = PAGE_INDEX_WIDTH))
}

fn page_exists(chapter_dir: &Path, idx: usize) -> bool {
    ACCEPTED_PAGE_EXTENSIONS.iter().any(|ext| {
        chapter_dir
            .join(format!("{:0width$}.{ext}", idx, width = PAGE_INDEX_WIDTH))
            .exists()
    })
}

/// 页面字节统一转成 PNG。已经是 PNG 的直接透传；
/// 解码不了的字节原样落盘（读取端按扩展名处理失败比丢页好）。
fn normalize_to_png(bytes: Vec<u8>) -> Vec<u8> {
    const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
    if bytes.starts_with(&PNG_MAGIC) {
        return bytes;
    }
    match image::load_from_memory(&bytes) {
        Ok(img) => {
            let mut out = Cursor::new(Vec::with_capacity(bytes.len()));
            if img.write_to(&mut out, image::ImageFormat::Png).is_ok() {
                out.into_inner()
            } else {
                bytes
            }
        }
        Err(err) => {
            debug!(error = %err, "页面字节无法解码, 按原样写入");
            bytes
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogError;
    use crate::catalog::models::ChapterRecord;
    use crate::download::plan::build_series_plan;
    use std::collections::{BTreeMap, BTreeSet, HashMap};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeCatalog {
        pages: HashMap<String, Vec<&'static str>>,
        covers: HashMap<u32, Vec<u8>>,
        fail_pages: Mutex<BTreeSet<String>>,
        fail_manifests: BTreeSet<String>,
        downloads: AtomicUsize,
    }

    impl FakeCatalog {
        fn new(pages: HashMap<String, Vec<&'static str>>) -> Self {
            Self {
                pages,
                covers: HashMap::new(),
                fail_pages: Mutex::new(BTreeSet::new()),
                fail_manifests: BTreeSet::new(),
                downloads: AtomicUsize::new(0),
            }
        }

        fn download_count(&self) -> usize {
            self.downloads.load(Ordering::SeqCst)
        }
    }

    impl CatalogSource for FakeCatalog {
        fn fetch_page_manifest(&self, chapter_id: &str) -> Result<PageManifest, CatalogError> {
            if self.fail_manifests.contains(chapter_id) {
                return Err(CatalogError::Schema { field: "chapter" });
            }
            let pages = self
                .pages
                .get(chapter_id)
                .ok_or(CatalogError::NoResults)?;
            Ok(PageManifest {
                base_url: "http://fake".to_string(),
                hash: chapter_id.to_string(),
                pages: pages.iter().map(|p| p.to_string()).collect(),
            })
        }

        fn download_page(
            &self,
            manifest: &PageManifest,
            page: &str,
        ) -> Result<Vec<u8>, CatalogError> {
            if self.fail_pages.lock().unwrap().remove(page) {
                return Err(CatalogError::RateLimited {
                    attempts: 3,
                    url: manifest.page_url(page),
                });
            }
            self.downloads.fetch_add(1, Ordering::SeqCst);
            Ok(format!("bytes of {}/{page}", manifest.hash).into_bytes())
        }

        fn fetch_cover(&self, _series_id: &str, volume: u32) -> Result<Option<Vec<u8>>, CatalogError> {
            Ok(self.covers.get(&volume).cloned())
        }
    }

    fn config() -> Config {
        Config {
            max_workers: 4,
            page_submit_delay_ms: 0,
            ..Config::default()
        }
    }

    fn two_volume_plan() -> SeriesPlan {
        let records = vec![
            chapter("c1", "1", "1"),
            chapter("c2", "2", "1"),
            chapter("c3", "3", "2"),
        ];
        build_series_plan("Fake Series", &records, 10)
    }

    fn chapter(id: &str, number: &str, volume: &str) -> ChapterRecord {
        ChapterRecord {
            id: id.to_string(),
            chapter: Some(number.to_string()),
            volume: Some(volume.to_string()),
            external: false,
        }
    }

    fn default_pages() -> HashMap<String, Vec<&'static str>> {
        HashMap::from([
            ("c1".to_string(), vec!["a.jpg", "b.jpg"]),
            ("c2".to_string(), vec!["c.jpg"]),
            ("c3".to_string(), vec!["d.jpg", "e.jpg", "f.jpg"]),
        ])
    }

    fn file_tree(root: &Path) -> BTreeMap<String, u64> {
        fn walk(dir: &Path, root: &Path, out: &mut BTreeMap<String, u64>) {
            for entry in std::fs::read_dir(dir).unwrap() {
                let entry = entry.unwrap();
                let path = entry.path();
                if path.is_dir() {
                    walk(&path, root, out);
                } else {
                    let rel = path.strip_prefix(root).unwrap().to_string_lossy().to_string();
                    out.insert(rel, entry.metadata().unwrap().len());
                }
            }
        }
        let mut out = BTreeMap::new();
        walk(root, root, &mut out);
        out
    }

    #[test]
    fn materialize_builds_the_expected_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = FakeCatalog::new(default_pages());
        let plan = two_volume_plan();
        let materializer = Materializer::new(&catalog, &config());

        let report = materializer
            .materialize(
                &plan,
                &plan.display_keys(),
                tmp.path(),
                "series-1",
                &mut ProgressReporter::silent(),
            )
            .unwrap();

        assert!(report.success());
        assert_eq!(report.pages_downloaded(), 6);
        assert!(tmp.path().join("0001/1/00000.png").exists());
        assert!(tmp.path().join("0001/1/00001.png").exists());
        assert!(tmp.path().join("0001/2/00000.png").exists());
        assert!(tmp.path().join("0002/3/00002.png").exists());
    }

    #[test]
    fn second_run_downloads_nothing_and_leaves_tree_unchanged() {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = FakeCatalog::new(default_pages());
        let plan = two_volume_plan();
        let materializer = Materializer::new(&catalog, &config());
        let keys = plan.display_keys();

        materializer
            .materialize(&plan, &keys, tmp.path(), "series-1", &mut ProgressReporter::silent())
            .unwrap();
        let first_tree = file_tree(tmp.path());
        let first_downloads = catalog.download_count();

        let report = materializer
            .materialize(&plan, &keys, tmp.path(), "series-1", &mut ProgressReporter::silent())
            .unwrap();

        assert_eq!(catalog.download_count(), first_downloads);
        assert_eq!(report.pages_downloaded(), 0);
        assert_eq!(
            report.groups.iter().map(|g| g.pages_skipped).sum::<usize>(),
            6
        );
        assert_eq!(file_tree(tmp.path()), first_tree);
    }

    #[test]
    fn resume_accepts_legacy_jpg_pages() {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = FakeCatalog::new(default_pages());
        let plan = two_volume_plan();
        let chapter_dir = tmp.path().join("0001/1");
        std::fs::create_dir_all(&chapter_dir).unwrap();
        std::fs::write(chapter_dir.join("00000.jpg"), b"old").unwrap();

        let report = Materializer::new(&catalog, &config())
            .materialize(
                &plan,
                &["0001".to_string()],
                tmp.path(),
                "series-1",
                &mut ProgressReporter::silent(),
            )
            .unwrap();

        assert_eq!(report.pages_downloaded(), 2);
        assert!(!chapter_dir.join("00000.png").exists());
    }

    #[test]
    fn page_failure_does_not_abort_the_chapter() {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = FakeCatalog::new(default_pages());
        catalog.fail_pages.lock().unwrap().insert("e.jpg".to_string());
        let plan = two_volume_plan();

        let report = Materializer::new(&catalog, &config())
            .materialize(
                &plan,
                &["0002".to_string()],
                tmp.path(),
                "series-1",
                &mut ProgressReporter::silent(),
            )
            .unwrap();

        assert_eq!(report.pages_failed(), 1);
        assert_eq!(report.pages_downloaded(), 2);
        assert_eq!(report.chapters_failed(), 1);
        assert!(!report.success());
        // 失败页之后的页面照常落盘
        assert!(tmp.path().join("0002/3/00002.png").exists());
    }

    #[test]
    fn manifest_failure_skips_the_chapter_but_not_its_siblings() {
        let tmp = tempfile::tempdir().unwrap();
        let mut catalog = FakeCatalog::new(default_pages());
        catalog.fail_manifests.insert("c1".to_string());
        let plan = two_volume_plan();

        let report = Materializer::new(&catalog, &config())
            .materialize(
                &plan,
                &["0001".to_string()],
                tmp.path(),
                "series-1",
                &mut ProgressReporter::silent(),
            )
            .unwrap();

        assert_eq!(report.chapters_failed(), 1);
        assert!(tmp.path().join("0001/2/00000.png").exists());
        assert!(!tmp.path().join("0001/1/00000.png").exists());
    }

    #[test]
    fn cover_is_written_once_and_skipped_on_rerun() {
        let tmp = tempfile::tempdir().unwrap();
        let mut catalog = FakeCatalog::new(default_pages());
        catalog.covers.insert(1, b"cover-1".to_vec());
        let plan = two_volume_plan();
        let keys = plan.display_keys();
        let materializer = Materializer::new(&catalog, &config());

        let first = materializer
            .materialize(&plan, &keys, tmp.path(), "series-1", &mut ProgressReporter::silent())
            .unwrap();
        let second = materializer
            .materialize(&plan, &keys, tmp.path(), "series-1", &mut ProgressReporter::silent())
            .unwrap();

        assert!(first.groups[0].cover_written);
        assert!(!second.groups[0].cover_written);
        assert_eq!(
            std::fs::read(tmp.path().join("0001.jpg")).unwrap(),
            b"cover-1"
        );
        // 卷二远端没有封面：文件缺席但不是错误
        assert!(!tmp.path().join("0002.jpg").exists());
        assert!(first.success());
    }

    #[test]
    fn png_bytes_pass_through_unmodified() {
        let png = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 1, 2, 3];
        assert_eq!(normalize_to_png(png.clone()), png);
    }

    #[test]
    fn undecodable_bytes_are_written_as_is() {
        let junk = b"definitely not an image".to_vec();
        assert_eq!(normalize_to_png(junk.clone()), junk);
    }
}
