use std::fs;
use std::io;
use std::path::Path;
use tempfile::TempDir;
use uuid::Uuid;

const WORKDIR_PREFIX: &str = "job-";

/// Scoped working directory for one pipeline attempt. Dropping it removes
/// the directory; directories surviving a crash are collected by
/// [`sweep_orphans`] at startup.
pub struct Workdir {
    dir: TempDir,
}

impl Workdir {
    pub fn create(root: &Path, upload_id: Uuid) -> io::Result<Self> {
        fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{WORKDIR_PREFIX}{upload_id}-"))
            .tempdir_in(root)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Remove leftover working directories under `root`. Only entries carrying
/// the workdir prefix are touched; anything else in the temp root is kept.
pub fn sweep_orphans(root: &Path) -> io::Result<usize> {
    if !root.exists() {
        return Ok(0);
    }
    let mut removed = 0;
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let name = entry.file_name();
        let is_orphan = name
            .to_str()
            .is_some_and(|n| n.starts_with(WORKDIR_PREFIX));
        if is_orphan && entry.file_type()?.is_dir() {
            fs::remove_dir_all(entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}
