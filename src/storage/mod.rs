//! Durable storage of report assets.
//!
//! Every analysis run gets its own numbered folder:
//! `<root>/Projects/<job>/Reports/<run:05>/`.

use crate::error::{Error, Result};
use crate::llm::{retry_transient, RetryPolicy};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

pub const REPORT_HTML: &str = "index.html";
pub const REPORT_CSS: &str = "index.css";
pub const PHOTO_FILE: &str = "photo.jpg";

/// Media type of a stored asset, from its file name.
pub fn media_type_for(name: &str) -> &'static str {
    let extension = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match extension.as_deref() {
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

/// File name of a medium preview; `None` names the photo itself.
pub fn preview_filename(medium: Option<&str>) -> String {
    match medium {
        None => PHOTO_FILE.to_string(),
        Some(medium) => {
            let cleaned = medium.replace(", ", "_").replace([' ', '/', '\\', ':'], "_");
            format!("photo_{}.jpg", cleaned)
        }
    }
}

/// Where report files live.
#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn write_asset(&self, job_id: &str, run: u32, name: &str, bytes: &[u8])
        -> Result<PathBuf>;

    async fn write_text(&self, job_id: &str, run: u32, name: &str, text: &str) -> Result<PathBuf> {
        self.write_asset(job_id, run, name, text.as_bytes()).await
    }

    /// Bytes and media type of a stored asset.
    async fn read_asset(&self, job_id: &str, run: u32, name: &str) -> Result<(Vec<u8>, String)>;

    async fn list_run_numbers(&self, job_id: &str) -> Result<BTreeSet<u32>>;

    /// Reserve the next run number (highest existing plus one, starting at
    /// 1) and create its folder.
    async fn next_run_number(&self, job_id: &str) -> Result<u32>;

    /// Location of the finished report for a run.
    fn report_location(&self, job_id: &str, run: u32) -> Result<PathBuf>;

    /// Persist the page and its stylesheet; returns the page location.
    async fn write_report(&self, job_id: &str, run: u32, html: &str, css: &str) -> Result<PathBuf> {
        self.write_text(job_id, run, REPORT_CSS, css).await?;
        self.write_text(job_id, run, REPORT_HTML, html).await
    }
}

/// `name` if it is a single plain path component.
fn checked_name(name: &str) -> Result<&str> {
    let plain = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && Path::new(name).components().count() == 1;
    if plain {
        Ok(name)
    } else {
        Err(Error::InvalidName(name.to_string()))
    }
}

/// Filesystem-backed [`ReportStore`].
#[derive(Debug, Clone)]
pub struct FsReportStore {
    root: PathBuf,
    retry: RetryPolicy,
}

impl FsReportStore {
    pub fn new(root: impl Into<PathBuf>, retry: RetryPolicy) -> Self {
        Self {
            root: root.into(),
            retry,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn reports_dir(&self, job_id: &str) -> Result<PathBuf> {
        Ok(self.root.join("Projects").join(checked_name(job_id)?).join("Reports"))
    }

    fn run_dir(&self, job_id: &str, run: u32) -> Result<PathBuf> {
        Ok(self.reports_dir(job_id)?.join(format!("{:05}", run)))
    }
}

#[async_trait]
impl ReportStore for FsReportStore {
    async fn write_asset(
        &self,
        job_id: &str,
        run: u32,
        name: &str,
        bytes: &[u8],
    ) -> Result<PathBuf> {
        let dir = self.run_dir(job_id, run)?;
        let path = dir.join(checked_name(name)?);
        fs::create_dir_all(&dir).await?;
        retry_transient(self.retry, &format!("write {}", path.display()), || {
            fs::write(&path, bytes)
        })
        .await?;
        debug!("Wrote {} ({} bytes)", path.display(), bytes.len());
        Ok(path)
    }

    async fn read_asset(&self, job_id: &str, run: u32, name: &str) -> Result<(Vec<u8>, String)> {
        let path = self.run_dir(job_id, run)?.join(checked_name(name)?);
        let bytes = retry_transient(self.retry, &format!("read {}", path.display()), || {
            fs::read(&path)
        })
        .await
        .map_err(|e| match e {
            Error::Io(io) if io.kind() == io::ErrorKind::NotFound => {
                Error::AssetNotFound(path.display().to_string())
            }
            other => other,
        })?;
        Ok((bytes, media_type_for(name).to_string()))
    }

    async fn list_run_numbers(&self, job_id: &str) -> Result<BTreeSet<u32>> {
        let dir = self.reports_dir(job_id)?;
        let mut runs = BTreeSet::new();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(runs),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(run) = entry.file_name().to_str().and_then(|n| n.parse().ok()) {
                runs.insert(run);
            }
        }
        Ok(runs)
    }

    async fn next_run_number(&self, job_id: &str) -> Result<u32> {
        fs::create_dir_all(self.reports_dir(job_id)?).await?;
        loop {
            let next = self
                .list_run_numbers(job_id)
                .await?
                .last()
                .map_or(1, |last| last + 1);
            match fs::create_dir(self.run_dir(job_id, next)?).await {
                Ok(()) => {
                    info!("Allocated report run {} for {}", next, job_id);
                    return Ok(next);
                }
                // Another caller took it first.
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn report_location(&self, job_id: &str, run: u32) -> Result<PathBuf> {
        Ok(self.run_dir(job_id, run)?.join(REPORT_HTML))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> FsReportStore {
        FsReportStore::new(dir.path(), RetryPolicy::new(2, Duration::from_millis(1)))
    }

    #[test]
    fn test_media_type_for() {
        assert_eq!(media_type_for("index.html"), "text/html");
        assert_eq!(media_type_for("index.CSS"), "text/css");
        assert_eq!(media_type_for("photo.jpeg"), "image/jpeg");
        assert_eq!(media_type_for("data.json"), "application/json");
        assert_eq!(media_type_for("archive"), "application/octet-stream");
    }

    #[test]
    fn test_preview_filename() {
        assert_eq!(preview_filename(None), "photo.jpg");
        assert_eq!(preview_filename(Some("Metal")), "photo_Metal.jpg");
        assert_eq!(preview_filename(Some("Paper, matte")), "photo_Paper_matte.jpg");
        assert_eq!(preview_filename(Some("Framed photo")), "photo_Framed_photo.jpg");
    }

    #[tokio::test]
    async fn test_run_numbers_increase() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(store.list_run_numbers("dunes").await.unwrap().is_empty());
        assert_eq!(store.next_run_number("dunes").await.unwrap(), 1);
        assert_eq!(store.next_run_number("dunes").await.unwrap(), 2);
        assert_eq!(store.next_run_number("other").await.unwrap(), 1);

        std::fs::create_dir_all(dir.path().join("Projects/dunes/Reports/00009")).unwrap();
        std::fs::write(dir.path().join("Projects/dunes/Reports/notes.txt"), "x").unwrap();
        assert_eq!(store.next_run_number("dunes").await.unwrap(), 10);
        assert!(dir.path().join("Projects/dunes/Reports/00010").is_dir());
    }

    #[tokio::test]
    async fn test_concurrent_allocation_is_distinct() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(store(&dir));
        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..6 {
            let store = store.clone();
            tasks.spawn(async move { store.next_run_number("dunes").await.unwrap() });
        }
        let mut runs = Vec::new();
        while let Some(run) = tasks.join_next().await {
            runs.push(run.unwrap());
        }
        runs.sort();
        assert_eq!(runs, [1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn test_write_and_read_assets() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let path = store.write_asset("dunes", 1, "photo.jpg", &[1, 2, 3]).await.unwrap();
        assert!(path.ends_with("Projects/dunes/Reports/00001/photo.jpg"));

        let (bytes, media_type) = store.read_asset("dunes", 1, "photo.jpg").await.unwrap();
        assert_eq!(bytes, [1, 2, 3]);
        assert_eq!(media_type, "image/jpeg");

        let err = store.read_asset("dunes", 1, "missing.png").await.unwrap_err();
        assert!(matches!(err, Error::AssetNotFound(_)));
    }

    #[tokio::test]
    async fn test_write_report() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let page = store.write_report("dunes", 3, "<html></html>", "p {}").await.unwrap();
        assert_eq!(page, store.report_location("dunes", 3).unwrap());
        let css = std::fs::read_to_string(page.with_file_name("index.css")).unwrap();
        assert_eq!(css, "p {}");
    }

    #[tokio::test]
    async fn test_rejects_names_outside_the_store() {
        let dir = TempDir::new().unwrap();
        let store = FsReportStore::new(dir.path().join("data"), RetryPolicy::default());

        for job in ["../../outside", "..", ".", "", "a/b", "a\\b"] {
            let err = store.write_asset(job, 1, "x.txt", b"hi").await.unwrap_err();
            assert!(matches!(err, Error::InvalidName(_)), "job {job:?}");
            assert!(store.next_run_number(job).await.is_err());
        }
        for name in ["../x.txt", "..", "sub/x.txt"] {
            let err = store.write_asset("dunes", 1, name, b"hi").await.unwrap_err();
            assert!(matches!(err, Error::InvalidName(_)), "name {name:?}");
            assert!(store.read_asset("dunes", 1, name).await.is_err());
        }
        assert!(!dir.path().join("outside").exists());
        assert!(store.report_location("..", 1).is_err());
    }
}
