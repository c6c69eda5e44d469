//! In-memory stand-in for `/proc` and `/sys/fs/cgroup`.
//!
//! `MockFs` keeps its state behind an `Arc<Mutex<_>>`, so clones share one
//! tree: a test hands a clone to a collector and keeps advancing counters
//! through its own handle between ticks.
//!
//! Directories created under a registered cgroup root behave like cgroup v2
//! nodes: the interface files appear on creation, writing a PID to a
//! `cgroup.procs` moves it out of every other group of that hierarchy, and
//! `remove_dir` only succeeds while `cgroup.procs` is empty.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::collector::traits::FileSystem;

fn fs_error(kind: io::ErrorKind, what: &str, path: &Path) -> io::Error {
    io::Error::new(kind, format!("{}: {}", what, path.display()))
}

#[derive(Debug, Default)]
struct MockState {
    files: HashMap<PathBuf, String>,
    directories: HashSet<PathBuf>,
    /// Roots under which `create_dir` produces cgroup nodes.
    cgroup_roots: HashSet<PathBuf>,
    /// Files whose appends fail with `PermissionDenied`.
    denied_writes: HashSet<PathBuf>,
}

impl MockState {
    fn add_parents(&mut self, path: &Path) {
        for ancestor in path.ancestors().skip(1) {
            if !ancestor.as_os_str().is_empty() {
                self.directories.insert(ancestor.to_path_buf());
            }
        }
    }

    fn is_cgroup_node(&self, path: &Path) -> bool {
        self.cgroup_roots
            .iter()
            .any(|root| path.starts_with(root) && path != root)
    }

    fn cgroup_root_of(&self, path: &Path) -> Option<PathBuf> {
        self.cgroup_roots
            .iter()
            .find(|root| path.starts_with(root))
            .cloned()
    }

    /// Moves `pid` into the group owning `procs`: a PID is a member of
    /// exactly one `cgroup.procs` file per hierarchy.
    fn migrate(&mut self, root: &Path, procs: &Path, pid: &str) {
        for (file, members) in self.files.iter_mut() {
            if file.as_path() == procs
                || !file.starts_with(root)
                || file.file_name().is_none_or(|n| n != "cgroup.procs")
            {
                continue;
            }
            let kept: String = members
                .lines()
                .filter(|line| line.trim() != pid)
                .map(|line| format!("{line}\n"))
                .collect();
            *members = kept;
        }

        if let Some(members) = self.files.get_mut(procs)
            && !members.lines().any(|line| line.trim() == pid)
        {
            members.push_str(pid);
            members.push('\n');
        }
    }

    fn has_children(&self, path: &Path) -> bool {
        self.files
            .keys()
            .chain(self.directories.iter())
            .any(|p| p.parent() == Some(path))
    }
}

/// Shared in-memory tree implementing [`FileSystem`].
#[derive(Debug, Clone, Default)]
pub struct MockFs {
    state: Arc<Mutex<MockState>>,
}

impl MockFs {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread must not hide the tree from the others.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Writes (or overwrites) a file, creating its ancestors.
    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<String>) {
        let mut state = self.lock();
        state.add_parents(path.as_ref());
        state.files.insert(path.as_ref().into(), content.into());
    }

    /// Creates a directory and its ancestors.
    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let mut state = self.lock();
        state.add_parents(path.as_ref());
        state.directories.insert(path.as_ref().into());
    }

    /// Removes a file or a whole directory subtree.
    ///
    /// Used to simulate a process exiting between ticks.
    pub fn remove(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let mut state = self.lock();
        state.files.retain(|p, _| !p.starts_with(path));
        state.directories.retain(|p| !p.starts_with(path));
    }

    /// Marks `path` as a cgroup v2 mount point.
    pub fn add_cgroup_root(&self, path: impl AsRef<Path>) {
        self.add_dir(path.as_ref());
        self.lock().cgroup_roots.insert(path.as_ref().into());
    }

    /// Makes every `append` to `path` fail with `PermissionDenied`.
    pub fn deny_writes(&self, path: impl AsRef<Path>) {
        self.lock().denied_writes.insert(path.as_ref().to_path_buf());
    }

    /// Lists directories that are direct children of `path`.
    pub fn subdirs(&self, path: impl AsRef<Path>) -> Vec<PathBuf> {
        let path = path.as_ref();
        let state = self.lock();
        let mut dirs: Vec<PathBuf> = state
            .directories
            .iter()
            .filter(|d| d.parent() == Some(path))
            .cloned()
            .collect();
        dirs.sort();
        dirs
    }
}

impl FileSystem for MockFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.lock()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| fs_error(io::ErrorKind::NotFound, "no such file", path))
    }

    fn exists(&self, path: &Path) -> bool {
        let state = self.lock();
        state.files.contains_key(path) || state.directories.contains(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let state = self.lock();
        if !state.directories.contains(path) {
            return Err(fs_error(io::ErrorKind::NotFound, "no such directory", path));
        }

        let entries: BTreeSet<PathBuf> = state
            .files
            .keys()
            .chain(state.directories.iter())
            .filter(|p| p.parent() == Some(path))
            .cloned()
            .collect();
        Ok(entries.into_iter().collect())
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        let mut state = self.lock();
        if state.directories.contains(path) || state.files.contains_key(path) {
            return Err(fs_error(io::ErrorKind::AlreadyExists, "already exists", path));
        }
        if let Some(parent) = path.parent()
            && !state.directories.contains(parent)
        {
            return Err(fs_error(io::ErrorKind::NotFound, "parent not found", parent));
        }

        state.directories.insert(path.to_path_buf());
        if state.is_cgroup_node(path) {
            state.files.insert(path.join("cgroup.procs"), String::new());
            state.files.insert(
                path.join("cpu.stat"),
                "usage_usec 0\nuser_usec 0\nsystem_usec 0\n".to_string(),
            );
            state.files.insert(
                path.join("memory.stat"),
                "anon 0\nfile 0\nworkingset_refault_anon 0\nworkingset_refault_file 0\n"
                    .to_string(),
            );
        }
        Ok(())
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        let mut state = self.lock();
        if !state.directories.contains(path) {
            return Err(fs_error(io::ErrorKind::NotFound, "directory not found", path));
        }

        if state.is_cgroup_node(path) {
            let members = state
                .files
                .get(&path.join("cgroup.procs"))
                .map(|c| c.trim().to_string())
                .unwrap_or_default();
            if !members.is_empty() {
                return Err(fs_error(io::ErrorKind::ResourceBusy, "cgroup not empty", path));
            }
            let has_subgroups = state.directories.iter().any(|d| d.parent() == Some(path));
            if has_subgroups {
                return Err(fs_error(io::ErrorKind::ResourceBusy, "cgroup has children", path));
            }
            state.files.retain(|p, _| p.parent() != Some(path));
        } else if state.has_children(path) {
            return Err(fs_error(io::ErrorKind::DirectoryNotEmpty, "directory not empty", path));
        }

        state.directories.remove(path);
        Ok(())
    }

    fn append(&self, path: &Path, content: &str) -> io::Result<()> {
        let mut state = self.lock();
        if state.denied_writes.contains(path) {
            return Err(fs_error(io::ErrorKind::PermissionDenied, "permission denied", path));
        }
        if !state.files.contains_key(path) {
            return Err(fs_error(io::ErrorKind::NotFound, "file not found", path));
        }

        if path.file_name().is_some_and(|n| n == "cgroup.procs")
            && let Some(root) = state.cgroup_root_of(path)
        {
            state.migrate(&root, path, content.trim());
            return Ok(());
        }

        if let Some(existing) = state.files.get_mut(path) {
            existing.push_str(content);
        }
        Ok(())
    }
}
