//! Read-only snapshot mirrors.
//!
//! When a snapshot directory is configured, every sealed segment of a table
//! is mirrored into it through symlinks:
//!
//! ```text
//! <snapshot>/<table>/
//! ├─ {index}.metadata -> <root>/<table>/{index}.metadata
//! ├─ {index}.keys     -> ...
//! ├─ {index}-{shard}.values -> ...
//! ├─ upper-bound.txt  # highest segment index linked
//! └─ lower-bound.txt  # written by the consumer: indices at or below are pruned
//! ```
//!
//! The active segment is never linked. A consumer copies the linked files,
//! then records what it no longer needs in `lower-bound.txt`; links at or
//! below that bound are never recreated.

use crate::dir::{remove_dir_if_exists, remove_file_if_exists, write_atomic};
use crate::error::{DbError, DbResult};
use crate::segment::Segment;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// File recording the highest linked segment index.
pub const UPPER_BOUND_FILE: &str = "upper-bound.txt";
/// File recording the highest pruned segment index.
pub const LOWER_BOUND_FILE: &str = "lower-bound.txt";

/// The snapshot directory of one table.
#[derive(Debug, Clone)]
pub struct SnapshotDir {
    dir: PathBuf,
}

impl SnapshotDir {
    /// Opens the snapshot directory of `table`, creating it if needed.
    pub fn open(snapshot_root: &Path, table: &str) -> DbResult<Self> {
        let dir = snapshot_root.join(table);
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Returns the highest linked segment index, if any.
    pub fn upper_bound(&self) -> DbResult<Option<u32>> {
        read_bound(&self.dir.join(UPPER_BOUND_FILE))
    }

    /// Returns the highest pruned segment index, if any.
    pub fn lower_bound(&self) -> DbResult<Option<u32>> {
        read_bound(&self.dir.join(LOWER_BOUND_FILE))
    }

    /// Links every file of a sealed segment and raises the upper bound.
    pub fn link_segment(&self, segment: &Segment) -> DbResult<()> {
        if !segment.is_sealed() {
            return Err(DbError::invalid_operation(format!(
                "segment {} is not sealed",
                segment.index()
            )));
        }
        for target in segment.paths() {
            if !target.exists() {
                continue;
            }
            let Some(name) = target.file_name() else {
                continue;
            };
            let link = self.dir.join(name);
            if fs::symlink_metadata(&link).is_ok() {
                continue;
            }
            let target = fs::canonicalize(&target)?;
            symlink(&target, &link)?;
        }

        if self.upper_bound()?.map_or(true, |bound| segment.index() > bound) {
            write_atomic(
                &self.dir.join(UPPER_BOUND_FILE),
                segment.index().to_string().as_bytes(),
                false,
            )?;
        }
        debug!(index = segment.index(), "linked segment into snapshot");
        Ok(())
    }

    /// Removes the links of a segment.
    pub fn unlink_segment(&self, segment: &Segment) -> DbResult<()> {
        for target in segment.paths() {
            if let Some(name) = target.file_name() {
                remove_file_if_exists(&self.dir.join(name))?;
            }
        }
        Ok(())
    }

    /// Recreates missing links for sealed segments above the lower bound.
    ///
    /// Returns how many segments were checked.
    pub fn repair<'a>(
        &self,
        segments: impl IntoIterator<Item = &'a Arc<Segment>>,
    ) -> DbResult<usize> {
        let lower = self.lower_bound()?;
        let mut checked = 0;
        for segment in segments {
            if !segment.is_sealed() || lower.is_some_and(|bound| segment.index() <= bound) {
                continue;
            }
            self.link_segment(segment)?;
            checked += 1;
        }
        if checked > 0 {
            info!(dir = %self.dir.display(), checked, "repaired snapshot links");
        }
        Ok(checked)
    }

    /// Deletes the snapshot directory.
    pub fn destroy(&self) -> DbResult<()> {
        remove_dir_if_exists(&self.dir)
    }
}

/// Records that a consumer no longer needs segments up to `index`.
pub fn set_lower_bound(snapshot_root: &Path, table: &str, index: u32) -> DbResult<()> {
    let dir = snapshot_root.join(table);
    fs::create_dir_all(&dir)?;
    write_atomic(&dir.join(LOWER_BOUND_FILE), index.to_string().as_bytes(), true)
}

fn read_bound(path: &Path) -> DbResult<Option<u32>> {
    match fs::read_to_string(path) {
        Ok(text) => text.trim().parse().map(Some).map_err(|_| {
            DbError::invalid_format(format!("invalid bound in {}: {text:?}", path.display()))
        }),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> DbResult<()> {
    std::os::unix::fs::symlink(target, link)?;
    Ok(())
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path) -> DbResult<()> {
    std::os::windows::fs::symlink_file(target, link)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentLimits;
    use tempfile::tempdir;

    const LIMITS: SegmentLimits = SegmentLimits {
        target_file_size: 1 << 20,
        max_key_count: 100,
        target_key_file_size: 1 << 20,
    };

    fn sealed_segment(dirs: &[PathBuf], index: u32) -> Arc<Segment> {
        let segment = Segment::create(index, dirs, 2, LIMITS, false).unwrap();
        segment.write(b"k", b"v").unwrap();
        segment.seal().unwrap();
        Arc::new(segment)
    }

    #[test]
    fn links_sealed_segments() {
        let data = tempdir().unwrap();
        let snap = tempdir().unwrap();
        let dirs = vec![data.path().to_path_buf()];
        let segment = sealed_segment(&dirs, 0);

        let snapshot = SnapshotDir::open(snap.path(), "t").unwrap();
        snapshot.link_segment(&segment).unwrap();

        let link = snapshot.path().join("0.keys");
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(snapshot.upper_bound().unwrap(), Some(0));
    }

    #[test]
    fn active_segment_not_linked() {
        let data = tempdir().unwrap();
        let snap = tempdir().unwrap();
        let dirs = vec![data.path().to_path_buf()];
        let segment = Segment::create(0, &dirs, 1, LIMITS, false).unwrap();

        let snapshot = SnapshotDir::open(snap.path(), "t").unwrap();
        assert!(snapshot.link_segment(&segment).is_err());
        assert_eq!(snapshot.repair([&Arc::new(segment)]).unwrap(), 0);
    }

    #[test]
    fn repair_respects_lower_bound() {
        let data = tempdir().unwrap();
        let snap = tempdir().unwrap();
        let dirs = vec![data.path().to_path_buf()];
        let segments: Vec<_> = (0..3).map(|i| sealed_segment(&dirs, i)).collect();

        set_lower_bound(snap.path(), "t", 1).unwrap();
        let snapshot = SnapshotDir::open(snap.path(), "t").unwrap();
        assert_eq!(snapshot.repair(&segments).unwrap(), 1);

        assert!(!snapshot.path().join("0.keys").exists());
        assert!(!snapshot.path().join("1.keys").exists());
        assert!(fs::symlink_metadata(snapshot.path().join("2.keys")).is_ok());
        assert_eq!(snapshot.upper_bound().unwrap(), Some(2));
    }

    #[test]
    fn unlink_removes_links() {
        let data = tempdir().unwrap();
        let snap = tempdir().unwrap();
        let dirs = vec![data.path().to_path_buf()];
        let segment = sealed_segment(&dirs, 4);

        let snapshot = SnapshotDir::open(snap.path(), "t").unwrap();
        snapshot.link_segment(&segment).unwrap();
        snapshot.unlink_segment(&segment).unwrap();
        assert!(fs::symlink_metadata(snapshot.path().join("4.keys")).is_err());
    }
}
