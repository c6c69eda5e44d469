//! Pre-built mock filesystem scenarios for testing.
//!
//! These scenarios provide realistic `/proc` and `/sys/fs/cgroup` states for
//! the supported cgroup layouts, plus helpers to move counters between ticks.

use std::path::Path;

use super::filesystem::MockFs;

const PROC_MOUNTS: &str = "\
21 26 0:20 / /sys rw,nosuid,nodev,noexec,relatime shared:7 - sysfs sysfs rw
22 26 0:21 / /proc rw,nosuid,nodev,noexec,relatime shared:13 - proc proc rw
26 1 259:2 / / rw,relatime shared:1 - ext4 /dev/nvme0n1p2 rw,errors=remount-ro
";

const V2_MOUNT: &str =
    "27 21 0:23 / /sys/fs/cgroup rw,nosuid,nodev,noexec,relatime shared:9 - cgroup2 cgroup2 rw,nsdelegate,memory_recursiveprot\n";

const V1_MOUNTS: &str = "\
27 21 0:22 / /sys/fs/cgroup ro,nosuid,nodev,noexec shared:8 - tmpfs tmpfs ro,mode=755
31 27 0:26 / /sys/fs/cgroup/cpu,cpuacct rw,nosuid,nodev,noexec,relatime shared:12 - cgroup cgroup rw,cpu,cpuacct
32 27 0:27 / /sys/fs/cgroup/memory rw,nosuid,nodev,noexec,relatime shared:13 - cgroup cgroup rw,memory
";

const UNIFIED_MOUNT: &str =
    "28 27 0:23 / /sys/fs/cgroup/unified rw,nosuid,nodev,noexec,relatime shared:9 - cgroup2 cgroup2 rw,nsdelegate\n";

impl MockFs {
    /// Creates a host without any cgroup filesystem mounted.
    pub fn no_cgroup_host() -> Self {
        let fs = Self::new();

        fs.add_file("/proc/self/mountinfo", PROC_MOUNTS);
        fs.set_proc_stat(10_000, 80_000);
        fs.add_file(
            "/proc/meminfo",
            "\
MemTotal:       16777216 kB
MemFree:         8192000 kB
MemAvailable:   12000000 kB
",
        );
        fs.add_file("/proc/sys/kernel/hostname", "test-host\n");
        fs.add_file("/proc/sys/kernel/osrelease", "6.8.0-test\n");

        fs
    }

    /// Creates a host with the unified hierarchy on `/sys/fs/cgroup`.
    pub fn cgroup_v2_host() -> Self {
        let fs = Self::no_cgroup_host();

        fs.add_file("/proc/self/mountinfo", format!("{PROC_MOUNTS}{V2_MOUNT}"));
        fs.add_cgroup_root("/sys/fs/cgroup");
        fs.add_file("/sys/fs/cgroup/cgroup.procs", "1\n");
        fs.set_cgroup_usage("/sys/fs/cgroup", 0);

        fs
    }

    /// Creates a legacy host with per-controller cgroup v1 hierarchies.
    pub fn cgroup_v1_host() -> Self {
        let fs = Self::no_cgroup_host();

        fs.add_file("/proc/self/mountinfo", format!("{PROC_MOUNTS}{V1_MOUNTS}"));
        fs.add_dir("/sys/fs/cgroup/cpu,cpuacct");
        fs.add_dir("/sys/fs/cgroup/memory");

        fs
    }

    /// Creates a hybrid host: v1 controllers plus the unified hierarchy on
    /// `/sys/fs/cgroup/unified`.
    pub fn hybrid_host() -> Self {
        let fs = Self::cgroup_v1_host();

        fs.add_file(
            "/proc/self/mountinfo",
            format!("{PROC_MOUNTS}{V1_MOUNTS}{UNIFIED_MOUNT}"),
        );
        fs.add_cgroup_root("/sys/fs/cgroup/unified");
        fs.set_cgroup_usage("/sys/fs/cgroup/unified", 0);

        fs
    }

    /// Adds or updates a process with the given CPU ticks and minor faults.
    pub fn add_proc_process(&self, pid: u32, comm: &str, utime: u64, stime: u64, minflt: u64) {
        self.write_pid_stat(pid, 1, comm, utime, stime, minflt);
    }

    /// Registers `pid` as a forked child of `ppid` with zeroed counters.
    pub fn add_child_process(&self, pid: u32, ppid: u32, comm: &str) {
        self.write_pid_stat(pid, ppid, comm, 0, 0, 0);
    }

    fn write_pid_stat(&self, pid: u32, ppid: u32, comm: &str, utime: u64, stime: u64, minflt: u64) {
        self.add_file(
            format!("/proc/{pid}/stat"),
            format!(
                "{pid} ({comm}) S {ppid} {pid} {pid} 0 -1 4194304 {minflt} 0 0 0 {utime} {stime} 0 0 20 0 1 0 100 10000000 250 18446744073709551615 0 0 0 0 0 0 0 0 0 0 0 0 17 0 0 0 0 0 0"
            ),
        );
        self.add_file(format!("/proc/{pid}/comm"), format!("{comm}\n"));
        self.add_dir(format!("/proc/{pid}/task/{pid}"));
    }

    /// Rewrites `/proc/stat` with the given active and idle tick totals.
    pub fn set_proc_stat(&self, active: u64, idle: u64) {
        self.add_file(
            "/proc/stat",
            format!(
                "\
cpu  {active} 0 0 {idle} 0 0 0 0 0 0
cpu0 {active} 0 0 {idle} 0 0 0 0 0 0
ctxt 500000
btime 1700000000
"
            ),
        );
    }

    /// Rewrites `/proc/[pid]/io` with the given storage counters.
    pub fn set_proc_io(&self, pid: u32, read_bytes: u64, write_bytes: u64) {
        self.add_file(
            format!("/proc/{pid}/io"),
            format!(
                "\
rchar: {}
wchar: {}
syscr: 10
syscw: 10
read_bytes: {read_bytes}
write_bytes: {write_bytes}
cancelled_write_bytes: 0
",
                read_bytes * 2,
                write_bytes * 2
            ),
        );
    }

    /// Rewrites `/proc/[pid]/smaps_rollup` with the given RSS.
    pub fn set_rss_kb(&self, pid: u32, rss_kb: u64) {
        self.add_file(
            format!("/proc/{pid}/smaps_rollup"),
            format!(
                "\
00400000-7ffd1b5fe000 ---p 00000000 00:00 0                          [rollup]
Rss:            {rss_kb:>8} kB
Pss:            {rss_kb:>8} kB
"
            ),
        );
    }

    /// Rewrites `<dir>/cpu.stat` with the given `usage_usec`.
    pub fn set_cgroup_usage(&self, dir: impl AsRef<Path>, usage_usec: u64) {
        self.add_file(
            dir.as_ref().join("cpu.stat"),
            format!(
                "usage_usec {usage_usec}\nuser_usec {}\nsystem_usec {}\n",
                usage_usec / 2,
                usage_usec - usage_usec / 2
            ),
        );
    }

    /// Rewrites `<dir>/memory.stat` with the given refault page count, split
    /// across anon and file the way kernels since 5.9 report it.
    pub fn set_cgroup_refault(&self, dir: impl AsRef<Path>, pages: u64) {
        self.add_file(
            dir.as_ref().join("memory.stat"),
            format!(
                "anon 0\nfile 0\nworkingset_refault_anon {}\nworkingset_refault_file {}\n",
                pages / 2,
                pages - pages / 2
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::cgroup::{CgroupMode, detect_cgroup_mode};
    use crate::collector::traits::FileSystem;

    fn mode(fs: &MockFs) -> CgroupMode {
        detect_cgroup_mode(fs, Path::new("/proc")).unwrap().mode
    }

    #[test]
    fn test_scenario_modes() {
        assert_eq!(mode(&MockFs::no_cgroup_host()), CgroupMode::Unsupported);
        assert_eq!(mode(&MockFs::cgroup_v1_host()), CgroupMode::V1);
        assert_eq!(mode(&MockFs::cgroup_v2_host()), CgroupMode::V2);
        assert_eq!(mode(&MockFs::hybrid_host()), CgroupMode::Hybrid);
    }

    #[test]
    fn test_add_proc_process_is_parsable() {
        let fs = MockFs::no_cgroup_host();
        fs.add_proc_process(77, "my app", 12, 34, 56);

        let content = fs.read_to_string(Path::new("/proc/77/stat")).unwrap();
        let stat = crate::collector::procfs::parser::parse_proc_stat(&content).unwrap();
        assert_eq!(stat.comm, "my app");
        assert_eq!(stat.utime, 12);
        assert_eq!(stat.stime, 34);
        assert_eq!(stat.minflt, 56);
        assert!(fs.exists(Path::new("/proc/77/task/77")));
    }
}
