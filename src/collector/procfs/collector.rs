//! Procfs-only sampling backend, used when no cgroup v2 hierarchy is usable.
//!
//! - VM CPU: `/proc/stat` active/total ticks
//! - Per-PID CPU: `/proc/[pid]/stat` utime + stime
//! - RAM refault proxy: minor faults × page size
//! - Per-PID I/O and RSS churn: `/proc/[pid]/io`, `smaps_rollup` / `statm`

use std::collections::HashMap;

use tracing::trace;

use crate::collector::error::CollectError;
use crate::collector::procfs::parser::CpuTimes;
use crate::collector::procfs::process::{IoRssCounters, IoRssDelta, ProcReader};
use crate::collector::sample::{Collector, CollectorOptions, Snapshot, SystemParams, vm_smoother};
use crate::collector::traits::FileSystem;
use crate::util::{Ema, clamp01, delta, safe_div};

/// Collector that derives every metric from procfs.
pub struct ProcfsCollector<F: FileSystem> {
    reader: ProcReader<F>,
    params: SystemParams,
    vm_ema: Option<Ema>,
    vm_prev: CpuTimes,
    cpu_prev: HashMap<u32, u64>,
    minflt_prev: HashMap<u32, u64>,
    io_rss: IoRssCounters,
}

impl<F: FileSystem> ProcfsCollector<F> {
    /// Creates the collector and takes the VM CPU baseline.
    pub fn new(fs: F, options: &CollectorOptions) -> Result<Self, CollectError> {
        let reader = ProcReader::new(fs, &options.proc_path, options.params.page_size);
        let vm_prev = reader.read_system_cpu()?;

        Ok(Self {
            reader,
            params: options.params,
            vm_ema: vm_smoother(options.ema_alpha),
            vm_prev,
            cpu_prev: HashMap::new(),
            minflt_prev: HashMap::new(),
            io_rss: IoRssCounters::new(),
        })
    }

    /// VM utilization since the previous call, smoothed when enabled.
    fn sample_vm(&mut self) -> Result<f64, CollectError> {
        let now = self.reader.read_system_cpu()?;
        let d_active = delta(now.active(), self.vm_prev.active());
        let d_total = delta(now.total(), self.vm_prev.total());
        self.vm_prev = now;

        let mut u_vm = safe_div(d_active as f64, d_total as f64);
        if let Some(ema) = self.vm_ema.as_mut() {
            u_vm = ema.next(u_vm);
        }
        Ok(clamp01(u_vm))
    }
}

impl<F: FileSystem> Collector for ProcfsCollector<F> {
    fn sample(&mut self, pids: &[u32], dt_sec: f64) -> Result<Snapshot, CollectError> {
        if pids.is_empty() {
            return Err(CollectError::NoPids);
        }
        if !(dt_sec > 0.0) {
            return Err(CollectError::BadInterval(dt_sec));
        }

        let u_vm = self.sample_vm()?;

        let mut cpu_ticks = 0u64;
        let mut minflt = 0u64;
        let mut io_rss = IoRssDelta::default();
        let mut alive = 0usize;

        for &pid in pids {
            if !self.reader.exists(pid) {
                continue;
            }
            let Some(stat) = self.reader.read_stat(pid)? else {
                trace!(pid, "exited during sample");
                continue;
            };
            alive += 1;

            if let Some(prev) = self.cpu_prev.insert(pid, stat.cpu_ticks()) {
                cpu_ticks += delta(stat.cpu_ticks(), prev);
            }
            if let Some(prev) = self.minflt_prev.insert(pid, stat.minflt) {
                minflt += delta(stat.minflt, prev);
            }

            io_rss += self.io_rss.account(&self.reader, pid);
        }

        if alive == 0 {
            return Err(CollectError::AllExited);
        }

        let cpu_sec = cpu_ticks as f64 / self.params.clk_tck as f64;
        let u_proc = clamp01(safe_div(cpu_sec, self.params.nproc as f64 * dt_sec));

        Ok(Snapshot {
            time_sec: dt_sec,
            u_vm,
            u_proc,
            read_bytes: io_rss.read_bytes,
            write_bytes: io_rss.write_bytes,
            refault_bytes: minflt.saturating_mul(self.params.page_size),
            rss_churn_bytes: io_rss.rss_churn_bytes,
        })
    }

    fn close(&mut self) -> Result<(), CollectError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "procfs"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::MockFs;

    fn options(ema_alpha: f64) -> CollectorOptions {
        CollectorOptions {
            ema_alpha,
            params: SystemParams {
                clk_tck: 100,
                page_size: 4096,
                nproc: 2,
            },
            ..CollectorOptions::default()
        }
    }

    #[test]
    fn test_sample_rejects_bad_arguments() {
        let fs = MockFs::cgroup_v1_host();
        let mut c = ProcfsCollector::new(fs, &options(0.0)).unwrap();

        assert!(matches!(c.sample(&[], 1.0), Err(CollectError::NoPids)));
        assert!(matches!(
            c.sample(&[1], 0.0),
            Err(CollectError::BadInterval(_))
        ));
        assert!(matches!(
            c.sample(&[1], -1.0),
            Err(CollectError::BadInterval(_))
        ));
        assert!(c.sample(&[1], f64::NAN).unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_sample_all_exited() {
        let fs = MockFs::cgroup_v1_host();
        let mut c = ProcfsCollector::new(fs, &options(0.0)).unwrap();
        assert!(c.sample(&[4242, 4243], 1.0).unwrap_err().is_all_exited());
    }

    #[test]
    fn test_construction_requires_cpu_line() {
        let fs = MockFs::new();
        fs.add_file("/proc/stat", "intr 1\n");
        assert!(matches!(
            ProcfsCollector::new(fs, &options(0.0)),
            Err(CollectError::Parse(_))
        ));
    }

    #[test]
    fn test_sample_deltas() {
        let fs = MockFs::cgroup_v1_host();
        fs.set_proc_stat(1000, 9000);
        fs.add_proc_process(100, "app", 0, 0, 0);
        fs.set_proc_io(100, 0, 0);
        fs.set_rss_kb(100, 1000);

        let mut c = ProcfsCollector::new(fs.clone(), &options(0.0)).unwrap();

        // First tick: baseline for the PID, VM delta from construction.
        fs.set_proc_stat(1100, 9100);
        let s = c.sample(&[100], 1.0).unwrap();
        assert!((s.u_vm - 0.5).abs() < 1e-12);
        assert_eq!(s.u_proc, 0.0);
        assert_eq!(s.read_bytes, 0);

        // Second tick: 50 ticks over 2 cores and 1 s.
        fs.set_proc_stat(1200, 9400);
        fs.add_proc_process(100, "app", 30, 20, 10);
        fs.set_proc_io(100, 8192, 4096);
        fs.set_rss_kb(100, 900);
        let s = c.sample(&[100], 1.0).unwrap();

        assert!((s.u_vm - 0.25).abs() < 1e-12);
        assert!((s.u_proc - 0.25).abs() < 1e-12);
        assert_eq!(s.read_bytes, 8192);
        assert_eq!(s.write_bytes, 4096);
        assert_eq!(s.refault_bytes, 10 * 4096);
        assert_eq!(s.rss_churn_bytes, 100 * 1024);
        assert_eq!(s.time_sec, 1.0);
    }

    #[test]
    fn test_u_proc_is_clamped() {
        let fs = MockFs::cgroup_v1_host();
        fs.add_proc_process(100, "app", 0, 0, 0);
        let mut c = ProcfsCollector::new(fs.clone(), &options(0.0)).unwrap();
        c.sample(&[100], 1.0).unwrap();

        fs.add_proc_process(100, "app", 10_000, 0, 0);
        let s = c.sample(&[100], 1.0).unwrap();
        assert_eq!(s.u_proc, 1.0);
    }

    #[test]
    fn test_vm_ema_applied() {
        let fs = MockFs::cgroup_v1_host();
        fs.set_proc_stat(0, 0);
        fs.add_proc_process(1, "init", 0, 0, 0);
        let mut c = ProcfsCollector::new(fs.clone(), &options(0.5)).unwrap();

        fs.set_proc_stat(100, 0);
        let s = c.sample(&[1], 1.0).unwrap();
        assert!((s.u_vm - 1.0).abs() < 1e-12);

        fs.set_proc_stat(100, 100);
        let s = c.sample(&[1], 1.0).unwrap();
        // raw 0.0 blended with 1.0
        assert!((s.u_vm - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_idle_vm_has_zero_utilization() {
        let fs = MockFs::cgroup_v1_host();
        fs.add_proc_process(1, "init", 0, 0, 0);
        let mut c = ProcfsCollector::new(fs.clone(), &options(0.0)).unwrap();
        let s = c.sample(&[1], 1.0).unwrap();
        assert_eq!(s.u_vm, 0.0);
    }

    #[test]
    fn test_exited_pid_is_skipped() {
        let fs = MockFs::cgroup_v1_host();
        fs.add_proc_process(1, "a", 0, 0, 0);
        fs.add_proc_process(2, "b", 0, 0, 0);
        let mut c = ProcfsCollector::new(fs.clone(), &options(0.0)).unwrap();
        c.sample(&[1, 2], 1.0).unwrap();

        fs.remove("/proc/2");
        fs.add_proc_process(1, "a", 100, 0, 0);
        let s = c.sample(&[1, 2], 1.0).unwrap();
        assert!((s.u_proc - 0.5).abs() < 1e-12);

        fs.remove("/proc/1");
        assert!(c.sample(&[1, 2], 1.0).unwrap_err().is_all_exited());
    }

    #[test]
    fn test_missing_io_and_rss_are_best_effort() {
        let fs = MockFs::cgroup_v1_host();
        fs.add_proc_process(7, "kthread", 0, 0, 0);
        let mut c = ProcfsCollector::new(fs.clone(), &options(0.0)).unwrap();
        c.sample(&[7], 1.0).unwrap();
        let s = c.sample(&[7], 1.0).unwrap();
        assert_eq!(s.read_bytes, 0);
        assert_eq!(s.rss_churn_bytes, 0);
    }

    #[test]
    fn test_close_is_noop() {
        let fs = MockFs::cgroup_v1_host();
        let mut c = ProcfsCollector::new(fs, &options(0.0)).unwrap();
        assert!(c.close().is_ok());
        assert!(c.close().is_ok());
        assert_eq!(c.name(), "procfs");
    }
}
