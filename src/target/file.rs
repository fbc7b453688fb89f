// src/target/file.rs

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// File-backed completion evidence.
///
/// The file *is* the task's output; a non-empty file at the final path
/// denotes completion. Materialization writes to a `.part` sibling and
/// renames into place, so a crash mid-write never leaves a target that
/// looks complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTarget {
    path: PathBuf,
}

impl FileTarget {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True if the final path exists with non-zero length. A zero-length
    /// file is treated as incomplete: it cannot be distinguished from an
    /// interrupted write.
    pub fn exists(&self) -> bool {
        fs::metadata(&self.path).map(|m| m.len() > 0).unwrap_or(false)
    }

    /// Durably record completion with the given contents.
    ///
    /// Only called after the task's run action has fully succeeded. The
    /// write is atomic with respect to process crash: contents go to
    /// `<path>.part`, are flushed, then renamed onto the final path.
    pub fn materialize(&self, contents: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {:?}", parent))?;
        }

        let part = self.part_path();
        {
            let mut file = fs::File::create(&part)
                .with_context(|| format!("creating partial file {:?}", part))?;
            file.write_all(contents)
                .with_context(|| format!("writing partial file {:?}", part))?;
            file.sync_all()
                .with_context(|| format!("syncing partial file {:?}", part))?;
        }

        fs::rename(&part, &self.path)
            .with_context(|| format!("renaming {:?} into place", part))?;
        Ok(())
    }

    fn part_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".part");
        self.path.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_does_not_exist() {
        let dir = tempfile::tempdir().unwrap();
        let target = FileTarget::new(dir.path().join("out.csv"));
        assert!(!target.exists());
    }

    #[test]
    fn empty_file_does_not_count_as_complete() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        fs::File::create(&path).unwrap();
        assert!(!FileTarget::new(&path).exists());
    }

    #[test]
    fn materialize_creates_parents_and_leaves_no_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("2018/05/01/out.csv");
        let target = FileTarget::new(&path);

        target.materialize(b"id,timestamp\n").unwrap();

        assert!(target.exists());
        assert!(!path.with_file_name("out.csv.part").exists());
        assert_eq!(fs::read(&path).unwrap(), b"id,timestamp\n");
    }
}
