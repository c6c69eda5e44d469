//! Cgroup-v2-backed sampling backend.
//!
//! The sampled PIDs are moved into a temporary leaf cgroup so the kernel
//! accounts their CPU time and memory refaults for us:
//! - VM CPU: `<root>/cpu.stat` `usage_usec`
//! - Group CPU: `<leaf>/cpu.stat` `usage_usec`
//! - Memory refaults: `<leaf>/memory.stat` `workingset_refault*`
//! - Per-PID I/O and RSS churn: procfs, same as the procfs backend

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::collector::cgroup::detect::detect_cgroup_mode;
use crate::collector::cgroup::parser::{parse_usage_usec, parse_workingset_refault};
use crate::collector::error::CollectError;
use crate::collector::procfs::parser::parse_children;
use crate::collector::procfs::{IoRssCounters, IoRssDelta, ProcReader};
use crate::collector::sample::{Collector, CollectorOptions, Snapshot, SystemParams, vm_smoother};
use crate::collector::traits::FileSystem;
use crate::util::{Ema, clamp01, delta, safe_div};

const USEC_PER_SEC: f64 = 1e6;
/// Bound on the parent walk when looking for a sampled ancestor.
const MAX_ANCESTOR_HOPS: usize = 64;

/// Collector that attributes CPU through a temporary cgroup v2 leaf.
///
/// The leaf is created on construction and removed by [`Collector::close`],
/// or on drop if `close` was never called successfully.
pub struct CgroupV2Collector<F: FileSystem> {
    reader: ProcReader<F>,
    params: SystemParams,
    root: PathBuf,
    group: PathBuf,
    closed: bool,

    vm_ema: Option<Ema>,
    vm_usage_prev: u64,
    group_usage_prev: u64,
    refault_prev: u64,
    refault_missing_logged: bool,

    /// PIDs written to the leaf, with the cgroup they came from.
    moved: HashMap<u32, Option<PathBuf>>,
    io_rss: IoRssCounters,
}

impl<F: FileSystem> CgroupV2Collector<F> {
    /// Verifies the unified hierarchy, creates the leaf and seeds the VM
    /// usage baseline.
    pub fn new(fs: F, options: &CollectorOptions) -> Result<Self, CollectError> {
        let root = options.cgroup_root.clone();
        if !fs.exists(&root) {
            return Err(CollectError::Cgroup2NotMounted(root));
        }
        let detection = detect_cgroup_mode(&fs, &options.proc_path)?;
        if !detection.is_cgroup2_at(&root) {
            return Err(CollectError::Cgroup2NotMounted(root));
        }

        let group = root.join(format!(
            "consumption.{}.{:08x}",
            std::process::id(),
            rand::random::<u32>()
        ));
        fs.create_dir(&group)?;
        debug!(path = %group.display(), "created temporary cgroup");

        let reader = ProcReader::new(fs, &options.proc_path, options.params.page_size);
        let vm_usage_prev = match read_usage_usec(reader.fs(), &root) {
            Ok(v) => v,
            Err(e) => {
                if let Err(rm) = reader.fs().remove_dir(&group) {
                    warn!(path = %group.display(), error = %rm, "failed to remove temporary cgroup");
                }
                return Err(e);
            }
        };

        let mut collector = Self {
            reader,
            params: options.params,
            root,
            group,
            closed: false,
            vm_ema: vm_smoother(options.ema_alpha),
            vm_usage_prev,
            group_usage_prev: 0,
            refault_prev: 0,
            refault_missing_logged: false,
            moved: HashMap::new(),
            io_rss: IoRssCounters::new(),
        };
        collector.refault_prev = collector.read_refault().unwrap_or(0);
        Ok(collector)
    }

    /// Path of the temporary leaf cgroup.
    pub fn group_path(&self) -> &Path {
        &self.group
    }

    fn read_refault(&self) -> Option<u64> {
        let content = self
            .reader
            .fs()
            .read_to_string(&self.group.join("memory.stat"))
            .ok()?;
        parse_workingset_refault(&content)
    }

    /// Writes `pid` into the leaf. Remembers its original cgroup the first
    /// time so `close` can put it back.
    fn move_into_group(&mut self, pid: u32) -> io::Result<()> {
        if !self.moved.contains_key(&pid) {
            let origin = self
                .reader
                .cgroup_v2_path(pid)
                .map(|p| self.root.join(p.trim_start_matches('/')))
                .filter(|p| *p != self.group);
            self.moved.insert(pid, origin);
        }
        self.reader
            .fs()
            .append(&self.group.join("cgroup.procs"), &format!("{}\n", pid))
    }

    /// Cgroup a leaf member goes back to: its own recorded origin, else the
    /// origin of its nearest sampled ancestor, else the hierarchy root.
    fn restore_target(&self, pid: u32) -> PathBuf {
        let mut current = pid;
        for _ in 0..MAX_ANCESTOR_HOPS {
            if let Some(Some(origin)) = self.moved.get(&current) {
                return origin.clone();
            }
            match self.reader.read_stat(current) {
                Ok(Some(stat)) if stat.ppid > 0 && stat.ppid != current => current = stat.ppid,
                _ => break,
            }
        }
        self.root.clone()
    }

    /// Moves every member of the leaf out of it, including children the
    /// kernel placed there when a sampled PID forked.
    fn evacuate_group(&self) {
        let procs = self.group.join("cgroup.procs");
        let members = match self.reader.fs().read_to_string(&procs) {
            Ok(content) => parse_children(&content),
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    debug!(path = %procs.display(), error = %e, "could not list cgroup members");
                }
                return;
            }
        };

        for pid in members {
            let line = format!("{}\n", pid);
            let target = self.restore_target(pid);
            let Err(e) = self.reader.fs().append(&target.join("cgroup.procs"), &line) else {
                continue;
            };
            debug!(pid, target = %target.display(), error = %e, "could not restore pid cgroup");
            if target != self.root
                && let Err(e) = self
                    .reader
                    .fs()
                    .append(&self.root.join("cgroup.procs"), &line)
            {
                debug!(pid, error = %e, "could not move pid to cgroup root");
            }
        }
    }
}

fn read_usage_usec<F: FileSystem>(fs: &F, dir: &Path) -> Result<u64, CollectError> {
    let path = dir.join("cpu.stat");
    let content = fs.read_to_string(&path)?;
    parse_usage_usec(&content)
        .ok_or_else(|| CollectError::Parse(format!("{}: usage_usec not found", path.display())))
}

impl<F: FileSystem> Collector for CgroupV2Collector<F> {
    fn sample(&mut self, pids: &[u32], dt_sec: f64) -> Result<Snapshot, CollectError> {
        if pids.is_empty() {
            return Err(CollectError::NoPids);
        }
        if !(dt_sec > 0.0) {
            return Err(CollectError::BadInterval(dt_sec));
        }

        // A PID that cannot be moved still counts as alive: its I/O and RSS
        // are read from procfs, only its CPU and refaults are missed.
        let mut alive = 0usize;
        for &pid in pids {
            if !self.reader.exists(pid) {
                continue;
            }
            if let Err(e) = self.move_into_group(pid) {
                debug!(pid, error = %e, "could not move pid into cgroup");
            }
            alive += 1;
        }
        if alive == 0 {
            return Err(CollectError::AllExited);
        }

        let vm_now = read_usage_usec(self.reader.fs(), &self.root)?;
        let group_now = read_usage_usec(self.reader.fs(), &self.group)?;
        let d_vm = delta(vm_now, self.vm_usage_prev);
        let d_group = delta(group_now, self.group_usage_prev);
        self.vm_usage_prev = vm_now;
        self.group_usage_prev = group_now;

        let capacity = self.params.nproc as f64 * dt_sec;
        let mut u_vm = safe_div(d_vm as f64 / USEC_PER_SEC, capacity);
        if let Some(ema) = self.vm_ema.as_mut() {
            u_vm = ema.next(u_vm);
        }
        let u_vm = clamp01(u_vm);
        let u_proc = clamp01(safe_div(d_group as f64 / USEC_PER_SEC, capacity));

        let refault_now = match self.read_refault() {
            Some(v) => v,
            None => {
                if !self.refault_missing_logged {
                    debug!(path = %self.group.display(), "no workingset_refault in memory.stat");
                    self.refault_missing_logged = true;
                }
                self.refault_prev
            }
        };
        let refault_pages = delta(refault_now, self.refault_prev);
        self.refault_prev = refault_now;

        let mut io_rss = IoRssDelta::default();
        let mut still_alive = 0usize;
        for &pid in pids {
            if !self.reader.exists(pid) {
                continue;
            }
            still_alive += 1;
            io_rss += self.io_rss.account(&self.reader, pid);
        }
        if still_alive == 0 {
            return Err(CollectError::AllExited);
        }

        Ok(Snapshot {
            time_sec: dt_sec,
            u_vm,
            u_proc,
            read_bytes: io_rss.read_bytes,
            write_bytes: io_rss.write_bytes,
            refault_bytes: refault_pages.saturating_mul(self.params.page_size),
            rss_churn_bytes: io_rss.rss_churn_bytes,
        })
    }

    /// Empties the leaf and removes it. Origins are kept until the
    /// directory is gone so a failed attempt can be retried.
    fn close(&mut self) -> Result<(), CollectError> {
        if self.closed {
            return Ok(());
        }
        self.evacuate_group();

        match self.reader.fs().remove_dir(&self.group) {
            Ok(()) => {
                debug!(path = %self.group.display(), "removed temporary cgroup");
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.moved.clear();
        self.closed = true;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "cgroup-v2"
    }
}

impl<F: FileSystem> Drop for CgroupV2Collector<F> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(path = %self.group.display(), error = %e, "temporary cgroup left behind");
        }
    }
}
