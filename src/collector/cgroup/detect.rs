//! Cgroup mode detection from `/proc/self/mountinfo`.

use std::fmt;
use std::path::Path;

use crate::collector::error::CollectError;
use crate::collector::procfs::parser::parse_mountinfo;
use crate::collector::traits::FileSystem;

/// Which cgroup hierarchies the host mounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupMode {
    /// No cgroup filesystem mounted.
    Unsupported,
    /// Legacy per-controller hierarchies only.
    V1,
    /// Unified hierarchy only.
    V2,
    /// Both v1 and v2 mounted.
    Hybrid,
}

impl fmt::Display for CgroupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CgroupMode::Unsupported => "unsupported",
            CgroupMode::V1 => "cgroup v1",
            CgroupMode::V2 => "cgroup v2",
            CgroupMode::Hybrid => "cgroup hybrid",
        };
        f.write_str(s)
    }
}

/// Detection outcome with the discovered mount points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgroupDetection {
    pub mode: CgroupMode,
    /// Human-readable list of mount points, e.g. `cgroup2 on /sys/fs/cgroup`.
    pub detail: String,
    pub v1_mounts: Vec<String>,
    pub v2_mounts: Vec<String>,
}

impl CgroupDetection {
    /// Classifies mountinfo content.
    pub fn from_mountinfo(content: &str) -> Self {
        let mut v1_mounts = Vec::new();
        let mut v2_mounts = Vec::new();

        for mount in parse_mountinfo(content) {
            match mount.fs_type.as_str() {
                "cgroup2" => v2_mounts.push(mount.mount_point),
                "cgroup" => v1_mounts.push(mount.mount_point),
                _ => {}
            }
        }

        let (mode, detail) = match (v1_mounts.is_empty(), v2_mounts.is_empty()) {
            (false, false) => (
                CgroupMode::Hybrid,
                format!(
                    "cgroup2 on {}; cgroup v1 on {}",
                    v2_mounts.join(","),
                    v1_mounts.join(",")
                ),
            ),
            (true, false) => (
                CgroupMode::V2,
                format!("cgroup2 on {}", v2_mounts.join(",")),
            ),
            (false, true) => (
                CgroupMode::V1,
                format!("cgroup v1 on {}", v1_mounts.join(",")),
            ),
            (true, true) => (CgroupMode::Unsupported, "no cgroup mounts found".to_string()),
        };

        Self {
            mode,
            detail,
            v1_mounts,
            v2_mounts,
        }
    }

    /// Reports whether a cgroup2 filesystem is mounted exactly at `path`.
    pub fn is_cgroup2_at(&self, path: &Path) -> bool {
        self.v2_mounts.iter().any(|m| Path::new(m) == path)
    }
}

/// Reads `<proc_path>/self/mountinfo` and classifies the host.
///
/// Fails only when the mount table cannot be read.
pub fn detect_cgroup_mode<F: FileSystem>(
    fs: &F,
    proc_path: &Path,
) -> Result<CgroupDetection, CollectError> {
    let content = fs.read_to_string(&proc_path.join("self").join("mountinfo"))?;
    Ok(CgroupDetection::from_mountinfo(&content))
}
