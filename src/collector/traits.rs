//! Filesystem seam between the backends and the kernel interfaces.
//!
//! Both backends read `/proc` and `/sys/fs/cgroup` through [`FileSystem`], so
//! tests can drive them with [`MockFs`](crate::collector::MockFs). The cgroup
//! v2 backend also creates and removes its leaf directory and appends PIDs to
//! `cgroup.procs`.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Filesystem operations used by the collectors.
pub trait FileSystem: Send + Sync {
    /// Reads a whole file.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Reports whether `path` exists.
    fn exists(&self, path: &Path) -> bool;

    /// Lists the full paths of the entries of a directory, in no particular order.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    /// Creates a single directory. The parent must exist.
    fn create_dir(&self, path: &Path) -> io::Result<()>;

    /// Removes an empty directory.
    fn remove_dir(&self, path: &Path) -> io::Result<()>;

    /// Appends `content` to an existing file with a single write.
    ///
    /// Kernel control files such as `cgroup.procs` take one value per write,
    /// so implementations must not split the content.
    fn append(&self, path: &Path, content: &str) -> io::Result<()>;
}

/// [`FileSystem`] over `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl RealFs {
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for RealFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        std::fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect()
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir(path)
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_dir(path)
    }

    fn append(&self, path: &Path, content: &str) -> io::Result<()> {
        let mut file = OpenOptions::new().append(true).open(path)?;
        file.write_all(content.as_bytes())
    }
}
