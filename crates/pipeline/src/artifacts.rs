//! Per-job temp file layout and the ledger that makes cleanup exhaustive.

use std::{
    io::ErrorKind as IoErrorKind,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use tokio::fs;
use tracing::{debug, warn};

use crate::{
    error::{PipelineError, Result},
    types::JobId,
};

pub fn default_work_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("reelsmith")
        .join("jobs")
}

/// File names inside one job's temp directory.
#[derive(Debug, Clone)]
pub struct JobPaths {
    pub dir: PathBuf,
    output: PathBuf,
}

impl JobPaths {
    pub fn new(work_root: &Path, output_dir: &Path, id: JobId) -> Self {
        Self {
            dir: work_root.join(id.to_string()),
            output: output_dir.join(format!("{id}.mp4")),
        }
    }

    pub fn script(&self) -> PathBuf {
        self.dir.join("script.json")
    }

    pub fn clip(&self, index: usize) -> PathBuf {
        self.dir.join("clips").join(format!("clip_{index:02}.mp4"))
    }

    pub fn narration(&self) -> PathBuf {
        self.dir.join("narration.mp3")
    }

    pub fn captions(&self) -> PathBuf {
        self.dir.join("captions.srt")
    }

    pub fn output(&self) -> PathBuf {
        self.output.clone()
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: usize,
    pub missing: usize,
    pub failed: Vec<PathBuf>,
}

#[derive(Default)]
struct LedgerInner {
    files: Vec<PathBuf>,
    dirs: Vec<PathBuf>,
}

/// Every file a job writes is recorded here before it is written, so
/// cleanup covers partially written files too.
#[derive(Clone, Default)]
pub struct ArtifactLedger {
    inner: Arc<Mutex<LedgerInner>>,
}

impl ArtifactLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerInner> {
        // The ledger only holds plain vectors; a poisoned lock is still consistent.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn track(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        let mut inner = self.lock();
        if !inner.files.contains(&path) {
            inner.files.push(path);
        }
    }

    pub fn track_dir(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        let mut inner = self.lock();
        if !inner.dirs.contains(&path) {
            inner.dirs.push(path);
        }
    }

    /// Stop tracking `path` so cleanup keeps it. Returns whether it was tracked.
    pub fn release(&self, path: &Path) -> bool {
        let mut inner = self.lock();
        let before = inner.files.len();
        inner.files.retain(|p| p != path);
        before != inner.files.len()
    }

    pub fn tracked(&self) -> Vec<PathBuf> {
        self.lock().files.clone()
    }

    /// Create `dir` (and parents) and track it for removal.
    pub async fn ensure_dir(&self, dir: &Path) -> Result<()> {
        self.track_dir(dir);
        fs::create_dir_all(dir)
            .await
            .map_err(|e| PipelineError::io(dir, e))
    }

    /// Track `path` then write `contents` to it.
    pub async fn write(&self, path: &Path, contents: impl AsRef<[u8]>) -> Result<()> {
        self.track(path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::io(parent, e))?;
        }
        fs::write(path, contents)
            .await
            .map_err(|e| PipelineError::io(path, e))
    }

    /// Delete every tracked file, then every tracked directory (deepest first).
    pub async fn cleanup(&self) -> CleanupReport {
        let (files, mut dirs) = {
            let mut inner = self.lock();
            (
                std::mem::take(&mut inner.files),
                std::mem::take(&mut inner.dirs),
            )
        };
        let mut report = CleanupReport::default();

        for path in files.iter().rev() {
            match fs::remove_file(path).await {
                Ok(()) => report.removed += 1,
                Err(e) if e.kind() == IoErrorKind::NotFound => report.missing += 1,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to remove artifact");
                    report.failed.push(path.clone());
                }
            }
        }

        dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
        for dir in dirs {
            match fs::remove_dir_all(&dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == IoErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "failed to remove job directory");
                    report.failed.push(dir);
                }
            }
        }

        debug!(
            removed = report.removed,
            missing = report.missing,
            failed = report.failed.len(),
            "artifacts cleaned up"
        );
        report
    }
}

/// Human-readable size, e.g. `12.4 MB`.
pub fn format_file_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{size:.1} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.1} TB")
}
