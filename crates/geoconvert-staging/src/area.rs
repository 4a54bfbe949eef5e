//! Staging area and per-request staging scopes.

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{StagingError, StagingResult};

/// Name prefix of every per-request directory under the staging root.
pub const REQUEST_DIR_PREFIX: &str = "req-";

struct AreaInner {
    root: PathBuf,
    /// Optional cap on bytes staged across all live requests.
    quota: Option<u64>,
    /// Bytes currently reserved by live requests.
    used: AtomicU64,
    /// Directories owned by live requests; never swept.
    live: Mutex<HashSet<PathBuf>>,
}

impl AreaInner {
    fn reserve(&self, requested: u64) -> StagingResult<()> {
        let Some(quota) = self.quota else {
            self.used.fetch_add(requested, Ordering::SeqCst);
            return Ok(());
        };
        let mut current = self.used.load(Ordering::SeqCst);
        loop {
            let available = quota.saturating_sub(current);
            if requested > available {
                return Err(StagingError::QuotaExceeded {
                    requested,
                    available,
                });
            }
            match self.used.compare_exchange(
                current,
                current + requested,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    fn release(&self, bytes: u64) {
        self.used.fetch_sub(bytes, Ordering::SeqCst);
    }

    fn live_set(&self) -> std::sync::MutexGuard<'_, HashSet<PathBuf>> {
        // The set only holds paths; a poisoned lock still has usable contents.
        self.live.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Process-wide staging root, shared by all requests.
///
/// `Clone` + `Send` + `Sync` (backed by `Arc`).
#[derive(Clone)]
pub struct StagingArea {
    inner: Arc<AreaInner>,
}

impl StagingArea {
    /// Open (creating if needed) a staging root.
    pub fn open(root: impl Into<PathBuf>, quota: Option<u64>) -> StagingResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StagingError::CreateDir {
            path: root.clone(),
            source,
        })?;
        info!(root = %root.display(), ?quota, "staging area opened");
        Ok(Self {
            inner: Arc::new(AreaInner {
                root,
                quota,
                used: AtomicU64::new(0),
                live: Mutex::new(HashSet::new()),
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Bytes currently reserved by live requests.
    pub fn used_bytes(&self) -> u64 {
        self.inner.used.load(Ordering::SeqCst)
    }

    /// Number of requests currently holding a staging directory.
    pub fn live_requests(&self) -> usize {
        self.inner.live_set().len()
    }

    /// Create a fresh, uniquely named directory for one request.
    pub fn acquire(&self) -> StagingResult<StagedRequest> {
        let id = Uuid::new_v4();
        let dir = self.inner.root.join(format!("{REQUEST_DIR_PREFIX}{id}"));
        fs::create_dir(&dir).map_err(|source| StagingError::CreateDir {
            path: dir.clone(),
            source,
        })?;
        self.inner.live_set().insert(dir.clone());
        debug!(%id, dir = %dir.display(), "staging scope acquired");
        Ok(StagedRequest {
            id,
            dir,
            reserved: 0,
            area: self.inner.clone(),
        })
    }

    /// Remove request directories not owned by a live request.
    ///
    /// Called at startup to clear what a crashed process left behind.
    /// Entries without the request prefix are left alone.
    pub fn sweep_orphans(&self) -> StagingResult<usize> {
        let entries = fs::read_dir(&self.inner.root).map_err(|source| StagingError::Read {
            path: self.inner.root.clone(),
            source,
        })?;

        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let is_request_dir = entry
                .file_name()
                .to_str()
                .is_some_and(|n| n.starts_with(REQUEST_DIR_PREFIX));
            if !is_request_dir || self.inner.live_set().contains(&path) {
                continue;
            }
            let result = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "failed to sweep orphaned staging entry"),
            }
        }

        if removed > 0 {
            info!(removed, root = %self.inner.root.display(), "swept orphaned staging entries");
        }
        Ok(removed)
    }
}

/// One request's staging directory. Deleted on drop.
pub struct StagedRequest {
    id: Uuid,
    dir: PathBuf,
    /// Bytes this request has reserved against the area quota.
    reserved: u64,
    area: Arc<AreaInner>,
}

impl std::fmt::Debug for StagedRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedRequest")
            .field("id", &self.id)
            .field("dir", &self.dir)
            .field("reserved", &self.reserved)
            .finish()
    }
}

impl StagedRequest {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Resolve a file name inside this request's directory.
    ///
    /// Only the final path component of `name` is kept, so callers cannot
    /// escape the directory with `..` or absolute paths.
    pub fn path_for(&self, name: &str) -> StagingResult<PathBuf> {
        Ok(self.dir.join(sanitize_file_name(name)?))
    }

    /// Create a subdirectory inside this request's directory.
    pub fn subdir(&self, name: &str) -> StagingResult<PathBuf> {
        let path = self.path_for(name)?;
        fs::create_dir_all(&path).map_err(|source| StagingError::CreateDir {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    /// Reserve quota for `bytes` that the engine is about to write.
    pub fn reserve(&mut self, bytes: u64) -> StagingResult<()> {
        self.area.reserve(bytes)?;
        self.reserved += bytes;
        Ok(())
    }

    /// Write an input payload into the request directory.
    ///
    /// On failure the partial file is removed and its reservation released.
    pub fn write_input(&mut self, name: &str, bytes: &[u8]) -> StagingResult<PathBuf> {
        let path = self.path_for(name)?;
        let len = bytes.len() as u64;
        self.area.reserve(len)?;

        let written = fs::File::create(&path).and_then(|mut f| {
            f.write_all(bytes)?;
            f.sync_all()
        });
        if let Err(source) = written {
            let _ = fs::remove_file(&path);
            self.area.release(len);
            return Err(StagingError::Write { path, source });
        }

        self.reserved += len;
        debug!(id = %self.id, path = %path.display(), bytes = len, "input staged");
        Ok(path)
    }

    /// Read a file the engine produced inside this request's directory.
    pub fn read_output(&self, path: &Path) -> StagingResult<Vec<u8>> {
        if !self.contains(path) {
            return Err(StagingError::OutsideRequest(path.to_path_buf()));
        }
        fs::read(path).map_err(|source| StagingError::Read {
            path: path.to_path_buf(),
            source,
        })
    }

    /// True when `path` lies inside this request's directory.
    pub fn contains(&self, path: &Path) -> bool {
        let no_parent_hops = !path.components().any(|c| matches!(c, Component::ParentDir));
        no_parent_hops && path.starts_with(&self.dir)
    }
}

impl Drop for StagedRequest {
    fn drop(&mut self) {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => debug!(id = %self.id, "staging scope released"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(id = %self.id, dir = %self.dir.display(), error = %e, "failed to remove staging directory"),
        }
        self.area.release(self.reserved);
        self.area.live_set().remove(&self.dir);
    }
}

/// Keep only a safe final file-name component.
fn sanitize_file_name(name: &str) -> StagingResult<String> {
    let last = name.rsplit(['/', '\\']).next().unwrap_or(name).trim();
    let cleaned: String = last
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        return Err(StagingError::InvalidName(name.to_string()));
    }
    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn area(quota: Option<u64>) -> (tempfile::TempDir, StagingArea) {
        let root = tempfile::tempdir().unwrap();
        let area = StagingArea::open(root.path().join("staging"), quota).unwrap();
        (root, area)
    }

    fn entries(area: &StagingArea) -> usize {
        fs::read_dir(area.root()).unwrap().count()
    }

    #[test]
    fn acquire_creates_unique_dirs() {
        let (_root, area) = area(None);
        let a = area.acquire().unwrap();
        let b = area.acquire().unwrap();
        assert_ne!(a.dir(), b.dir());
        assert!(a.dir().is_dir());
        assert!(b.dir().is_dir());
        assert_eq!(area.live_requests(), 2);
    }

    #[test]
    fn drop_removes_directory_and_files() {
        let (_root, area) = area(None);
        let dir = {
            let mut staged = area.acquire().unwrap();
            staged.write_input("roads.geojson", b"{}").unwrap();
            staged.subdir("out").unwrap();
            staged.dir().to_path_buf()
        };
        assert!(!dir.exists());
        assert_eq!(entries(&area), 0);
        assert_eq!(area.live_requests(), 0);
        assert_eq!(area.used_bytes(), 0);
    }

    #[test]
    fn drop_runs_on_panic_unwind() {
        let (_root, area) = area(None);
        let cloned = area.clone();
        let result = std::panic::catch_unwind(move || {
            let mut staged = cloned.acquire().unwrap();
            staged.write_input("a.tif", b"II*\0").unwrap();
            panic!("engine blew up");
        });
        assert!(result.is_err());
        assert_eq!(entries(&area), 0);
    }

    #[test]
    fn write_input_sanitizes_names() {
        let (_root, area) = area(None);
        let mut staged = area.acquire().unwrap();
        let path = staged.write_input("../../etc/passwd", b"x").unwrap();
        assert_eq!(path, staged.dir().join("passwd"));
        let path = staged.write_input("my file (1).shp.zip", b"x").unwrap();
        assert_eq!(path.file_name().unwrap(), "my_file__1_.shp.zip");
        assert!(matches!(staged.write_input("..", b"x"), Err(StagingError::InvalidName(_))));
        assert!(matches!(staged.write_input("", b"x"), Err(StagingError::InvalidName(_))));
    }

    #[test]
    fn quota_rejects_and_leaves_no_partial_file() {
        let (_root, area) = area(Some(8));
        let mut staged = area.acquire().unwrap();
        staged.write_input("small.bin", b"1234").unwrap();
        let err = staged.write_input("big.bin", b"123456789").unwrap_err();
        assert!(matches!(err, StagingError::QuotaExceeded { requested: 9, available: 4 }));
        assert!(!staged.dir().join("big.bin").exists());
        assert_eq!(area.used_bytes(), 4);
        drop(staged);
        assert_eq!(area.used_bytes(), 0);
    }

    #[test]
    fn quota_is_shared_across_requests() {
        let (_root, area) = area(Some(10));
        let mut a = area.acquire().unwrap();
        let mut b = area.acquire().unwrap();
        a.write_input("a", &[0u8; 6]).unwrap();
        assert!(b.write_input("b", &[0u8; 6]).is_err());
        drop(a);
        b.write_input("b", &[0u8; 6]).unwrap();
    }

    #[test]
    fn reserve_counts_against_quota() {
        let (_root, area) = area(Some(100));
        let mut staged = area.acquire().unwrap();
        staged.reserve(60).unwrap();
        assert!(staged.reserve(60).is_err());
        assert_eq!(area.used_bytes(), 60);
    }

    #[test]
    fn acquire_fails_when_root_is_unusable() {
        let (_root, area) = area(None);
        fs::remove_dir_all(area.root()).unwrap();
        fs::write(area.root(), b"not a directory").unwrap();
        let err = area.acquire().unwrap_err();
        assert!(err.is_exhaustion());
    }

    #[test]
    fn read_output_stays_inside_request() {
        let (_root, area) = area(None);
        let mut staged = area.acquire().unwrap();
        let path = staged.write_input("out.geojson", b"{\"type\":\"FeatureCollection\"}").unwrap();
        assert_eq!(staged.read_output(&path).unwrap(), b"{\"type\":\"FeatureCollection\"}");

        let escape = staged.dir().join("..").join("elsewhere");
        assert!(matches!(
            staged.read_output(&escape),
            Err(StagingError::OutsideRequest(_))
        ));
        assert!(matches!(
            staged.read_output(&staged.dir().join("missing.tif")),
            Err(StagingError::Read { .. })
        ));
    }

    #[test]
    fn sweep_removes_only_orphans() {
        let (_root, area) = area(None);
        let live = area.acquire().unwrap();
        fs::create_dir(area.root().join(format!("{REQUEST_DIR_PREFIX}stale"))).unwrap();
        fs::write(area.root().join(format!("{REQUEST_DIR_PREFIX}stale.zip")), b"x").unwrap();
        fs::write(area.root().join("keep.txt"), b"x").unwrap();

        let removed = area.sweep_orphans().unwrap();
        assert_eq!(removed, 2);
        assert!(live.dir().is_dir());
        assert!(area.root().join("keep.txt").exists());
    }

    #[tokio::test]
    async fn concurrent_requests_get_disjoint_paths() {
        let (_root, area) = area(None);
        let mut handles = Vec::new();
        for i in 0..16 {
            let area = area.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                let mut staged = area.acquire().unwrap();
                let path = staged.write_input("input.geojson", format!("{i}").as_bytes()).unwrap();
                let seen = staged.read_output(&path).unwrap();
                assert_eq!(seen, format!("{i}").into_bytes());
                staged.dir().to_path_buf()
            }));
        }
        let mut dirs = HashSet::new();
        for h in handles {
            assert!(dirs.insert(h.await.unwrap()));
        }
        assert_eq!(dirs.len(), 16);
        assert_eq!(entries(&area), 0);
    }
}
