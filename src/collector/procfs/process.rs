//! Per-process reads from `/proc/[pid]/` and the per-PID delta bookkeeping
//! shared by both sampling backends.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::io;
use std::path::PathBuf;

use tracing::trace;

use crate::collector::error::CollectError;
use crate::collector::procfs::parser::{
    CpuTimes, ProcIo, ProcStat, parse_cgroup_v2_path, parse_children, parse_cpu_line,
    parse_meminfo_total_kb, parse_proc_io, parse_proc_stat, parse_smaps_rollup_rss,
    parse_statm_resident_pages,
};
use crate::collector::traits::FileSystem;
use crate::util::delta;

/// Reads process and system information from a procfs tree.
pub struct ProcReader<F: FileSystem> {
    fs: F,
    proc_path: PathBuf,
    page_size: u64,
}

impl<F: FileSystem> ProcReader<F> {
    /// Creates a new reader.
    ///
    /// # Arguments
    /// * `fs` - Filesystem implementation (real or mock)
    /// * `proc_path` - Base path to proc filesystem (usually "/proc")
    /// * `page_size` - Memory page size in bytes, used for `statm` conversion
    pub fn new(fs: F, proc_path: impl Into<PathBuf>, page_size: u64) -> Self {
        Self {
            fs,
            proc_path: proc_path.into(),
            page_size,
        }
    }

    /// Returns the underlying filesystem.
    pub fn fs(&self) -> &F {
        &self.fs
    }

    fn pid_file(&self, pid: u32, name: &str) -> PathBuf {
        self.proc_path.join(pid.to_string()).join(name)
    }

    /// Reports whether `/proc/[pid]` exists.
    pub fn exists(&self, pid: u32) -> bool {
        self.fs.exists(&self.proc_path.join(pid.to_string()))
    }

    /// Reads `/proc/[pid]/stat`.
    ///
    /// Returns `Ok(None)` when the process vanished before the read.
    pub fn read_stat(&self, pid: u32) -> Result<Option<ProcStat>, CollectError> {
        match self.fs.read_to_string(&self.pid_file(pid, "stat")) {
            Ok(content) => Ok(Some(parse_proc_stat(&content)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Reads `/proc/[pid]/io`. Best-effort: kernel threads and processes of
    /// other users without `CAP_SYS_PTRACE` have no readable io file.
    pub fn read_io(&self, pid: u32) -> Option<ProcIo> {
        let content = self
            .fs
            .read_to_string(&self.pid_file(pid, "io"))
            .map_err(|e| trace!(pid, error = %e, "io unreadable"))
            .ok()?;
        parse_proc_io(&content)
            .map_err(|e| trace!(pid, error = %e, "io unparsable"))
            .ok()
    }

    /// Reads resident set size in bytes.
    ///
    /// Prefers `smaps_rollup` (kernel 4.14+), falls back to `statm` pages.
    pub fn read_rss(&self, pid: u32) -> Option<u64> {
        if let Ok(content) = self.fs.read_to_string(&self.pid_file(pid, "smaps_rollup"))
            && let Some(rss) = parse_smaps_rollup_rss(&content)
        {
            return Some(rss);
        }

        let content = self
            .fs
            .read_to_string(&self.pid_file(pid, "statm"))
            .map_err(|e| trace!(pid, error = %e, "statm unreadable"))
            .ok()?;
        parse_statm_resident_pages(&content).map(|pages| pages * self.page_size)
    }

    /// Reads the aggregate CPU line of `/proc/stat`.
    pub fn read_system_cpu(&self) -> Result<CpuTimes, CollectError> {
        let content = self.fs.read_to_string(&self.proc_path.join("stat"))?;
        Ok(parse_cpu_line(&content)?)
    }

    /// Returns the direct children of `pid`, collected from every
    /// `/proc/[pid]/task/*/children` file. Empty when there are none.
    pub fn children(&self, pid: u32) -> Vec<u32> {
        let task_dir = self.pid_file(pid, "task");
        let Ok(tasks) = self.fs.read_dir(&task_dir) else {
            return Vec::new();
        };

        let mut set = BTreeSet::new();
        for task in tasks {
            if let Ok(content) = self.fs.read_to_string(&task.join("children")) {
                set.extend(parse_children(&content));
            }
        }
        set.into_iter().collect()
    }

    /// Expands `roots` with all their descendants (breadth-first).
    ///
    /// The result is sorted and deduplicated; roots are always included even
    /// if they no longer exist, so the collector can report them as exited.
    pub fn process_tree(&self, roots: &[u32]) -> Vec<u32> {
        let mut seen: BTreeSet<u32> = roots.iter().copied().collect();
        let mut queue: VecDeque<u32> = roots.iter().copied().collect();

        while let Some(pid) = queue.pop_front() {
            for child in self.children(pid) {
                if seen.insert(child) {
                    queue.push_back(child);
                }
            }
        }

        seen.into_iter().collect()
    }

    /// Reads the command name from `/proc/[pid]/comm`.
    pub fn comm(&self, pid: u32) -> Option<String> {
        self.fs
            .read_to_string(&self.pid_file(pid, "comm"))
            .ok()
            .map(|s| s.trim_end().to_string())
    }

    /// Reads the unified-hierarchy cgroup of `pid`, relative to the mount point.
    pub fn cgroup_v2_path(&self, pid: u32) -> Option<String> {
        let content = self.fs.read_to_string(&self.pid_file(pid, "cgroup")).ok()?;
        parse_cgroup_v2_path(&content)
    }

    /// Reads a `/proc/sys/...` value, trimmed.
    pub fn sys_value(&self, key: &str) -> Option<String> {
        self.fs
            .read_to_string(&self.proc_path.join("sys").join(key))
            .ok()
            .map(|s| s.trim().to_string())
    }

    /// Reads total memory in bytes from `/proc/meminfo`.
    pub fn mem_total(&self) -> Option<u64> {
        let content = self
            .fs
            .read_to_string(&self.proc_path.join("meminfo"))
            .ok()?;
        parse_meminfo_total_kb(&content).map(|kb| kb * 1024)
    }
}

/// Disk and RSS deltas summed over the sampled PIDs for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoRssDelta {
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub rss_churn_bytes: u64,
}

impl std::ops::AddAssign for IoRssDelta {
    fn add_assign(&mut self, rhs: Self) {
        self.read_bytes += rhs.read_bytes;
        self.write_bytes += rhs.write_bytes;
        self.rss_churn_bytes += rhs.rss_churn_bytes;
    }
}

/// Previous-tick I/O and RSS counters keyed by PID.
///
/// The first observation of a PID only records a baseline, so a process that
/// joins the sampled set mid-run does not report its whole lifetime as one
/// tick of activity. Entries of exited PIDs are never pruned.
#[derive(Debug, Default)]
pub struct IoRssCounters {
    read: HashMap<u32, u64>,
    write: HashMap<u32, u64>,
    rss: HashMap<u32, u64>,
}

impl IoRssCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads I/O and RSS for `pid` and returns the deltas since the previous
    /// call. Missing files contribute zero.
    pub fn account<F: FileSystem>(&mut self, reader: &ProcReader<F>, pid: u32) -> IoRssDelta {
        let mut out = IoRssDelta::default();

        if let Some(io) = reader.read_io(pid) {
            if let Some(prev) = self.read.insert(pid, io.read_bytes) {
                out.read_bytes = delta(io.read_bytes, prev);
            }
            if let Some(prev) = self.write.insert(pid, io.write_bytes) {
                out.write_bytes = delta(io.write_bytes, prev);
            }
        }

        if let Some(rss) = reader.read_rss(pid)
            && let Some(prev) = self.rss.insert(pid, rss)
        {
            out.rss_churn_bytes = rss.abs_diff(prev);
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::MockFs;

    fn reader(fs: &MockFs) -> ProcReader<MockFs> {
        ProcReader::new(fs.clone(), "/proc", 4096)
    }

    #[test]
    fn test_read_stat_and_exists() {
        let fs = MockFs::new();
        fs.add_proc_process(42, "worker", 10, 5, 100);
        let r = reader(&fs);

        assert!(r.exists(42));
        assert!(!r.exists(43));

        let stat = r.read_stat(42).unwrap().unwrap();
        assert_eq!(stat.comm, "worker");
        assert_eq!(stat.utime, 10);
        assert_eq!(stat.stime, 5);
        assert_eq!(stat.minflt, 100);

        assert!(r.read_stat(43).unwrap().is_none());
    }

    #[test]
    fn test_read_stat_malformed_is_error() {
        let fs = MockFs::new();
        fs.add_file("/proc/7/stat", "7 (x) S 1");
        assert!(matches!(
            reader(&fs).read_stat(7),
            Err(CollectError::Parse(_))
        ));
    }

    #[test]
    fn test_read_rss_prefers_smaps_rollup() {
        let fs = MockFs::new();
        fs.add_file("/proc/1/smaps_rollup", "Rss:  100 kB\n");
        fs.add_file("/proc/1/statm", "1000 50 0 0 0 0 0\n");
        fs.add_file("/proc/2/statm", "1000 50 0 0 0 0 0\n");
        let r = reader(&fs);

        assert_eq!(r.read_rss(1), Some(100 * 1024));
        assert_eq!(r.read_rss(2), Some(50 * 4096));
        assert_eq!(r.read_rss(3), None);
    }

    #[test]
    fn test_read_system_cpu() {
        let fs = MockFs::new();
        fs.set_proc_stat(1000, 9000);
        let cpu = reader(&fs).read_system_cpu().unwrap();
        assert_eq!(cpu.active(), 1000);
        assert_eq!(cpu.total(), 10000);

        let empty = MockFs::new();
        assert!(matches!(
            reader(&empty).read_system_cpu(),
            Err(CollectError::Io(_))
        ));
    }

    #[test]
    fn test_children_across_threads() {
        let fs = MockFs::new();
        fs.add_file("/proc/10/task/10/children", "11 12");
        fs.add_file("/proc/10/task/13/children", "12 14 ");
        let r = reader(&fs);

        assert_eq!(r.children(10), vec![11, 12, 14]);
        assert!(r.children(99).is_empty());
    }

    #[test]
    fn test_process_tree() {
        let fs = MockFs::new();
        fs.add_file("/proc/1/task/1/children", "2 3");
        fs.add_file("/proc/2/task/2/children", "4");
        fs.add_file("/proc/4/task/4/children", "5");
        fs.add_file("/proc/3/task/3/children", "");
        let r = reader(&fs);

        assert_eq!(r.process_tree(&[1]), vec![1, 2, 3, 4, 5]);
        assert_eq!(r.process_tree(&[4, 100]), vec![4, 5, 100]);
    }

    #[test]
    fn test_comm_and_host_values() {
        let fs = MockFs::new();
        fs.add_file("/proc/5/comm", "postgres\n");
        fs.add_file("/proc/sys/kernel/hostname", "db-01\n");
        fs.add_file("/proc/meminfo", "MemTotal: 2048 kB\n");
        fs.add_file("/proc/5/cgroup", "0::/system.slice/postgres.service\n");
        let r = reader(&fs);

        assert_eq!(
            r.cgroup_v2_path(5).as_deref(),
            Some("/system.slice/postgres.service")
        );
        assert_eq!(r.cgroup_v2_path(6), None);

        assert_eq!(r.comm(5).as_deref(), Some("postgres"));
        assert_eq!(r.sys_value("kernel/hostname").as_deref(), Some("db-01"));
        assert_eq!(r.mem_total(), Some(2048 * 1024));
    }

    #[test]
    fn test_io_rss_counters_baseline_then_delta() {
        let fs = MockFs::new();
        fs.set_proc_io(9, 1000, 500);
        fs.add_file("/proc/9/smaps_rollup", "Rss: 10 kB\n");
        let r = reader(&fs);
        let mut counters = IoRssCounters::new();

        // First observation records a baseline.
        assert_eq!(counters.account(&r, 9), IoRssDelta::default());

        fs.set_proc_io(9, 3000, 700);
        fs.add_file("/proc/9/smaps_rollup", "Rss: 8 kB\n");
        let d = counters.account(&r, 9);
        assert_eq!(d.read_bytes, 2000);
        assert_eq!(d.write_bytes, 200);
        assert_eq!(d.rss_churn_bytes, 2 * 1024);

        // Counter reset contributes nothing.
        fs.set_proc_io(9, 10, 700);
        let d = counters.account(&r, 9);
        assert_eq!(d.read_bytes, 0);
        assert_eq!(d.rss_churn_bytes, 0);
    }

    #[test]
    fn test_io_rss_counters_missing_files() {
        let fs = MockFs::new();
        fs.add_dir("/proc/3");
        let r = reader(&fs);
        let mut counters = IoRssCounters::new();
        assert_eq!(counters.account(&r, 3), IoRssDelta::default());

        // Files appearing later start from a fresh baseline.
        fs.set_proc_io(3, 5000, 5000);
        assert_eq!(counters.account(&r, 3), IoRssDelta::default());
    }
}
