//! The `Collector` capability, its output and the backend factory.

use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, info};

use crate::collector::cgroup::{CgroupMode, CgroupV2Collector, detect_cgroup_mode};
use crate::collector::error::CollectError;
use crate::collector::procfs::ProcfsCollector;
use crate::collector::traits::{FileSystem, RealFs};
use crate::util::{Ema, clamp01};

/// Resource usage of the sampled process group over one window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Snapshot {
    /// Window length in seconds.
    pub time_sec: f64,
    /// VM-wide CPU utilization in [0, 1].
    pub u_vm: f64,
    /// Process-group CPU utilization in [0, 1], relative to all cores.
    pub u_proc: f64,
    pub read_bytes: u64,
    pub write_bytes: u64,
    /// Working-set refaults (cgroup v2) or minor faults (procfs) in bytes.
    pub refault_bytes: u64,
    /// Sum of absolute RSS changes in bytes.
    pub rss_churn_bytes: u64,
}

/// A sampling backend.
///
/// Implementations keep previous-tick counters and must be driven strictly
/// sequentially.
pub trait Collector: Send {
    /// Samples `pids` over the last `dt_sec` seconds.
    fn sample(&mut self, pids: &[u32], dt_sec: f64) -> Result<Snapshot, CollectError>;

    /// Releases kernel-visible resources. Idempotent.
    fn close(&mut self) -> Result<(), CollectError>;

    /// Short backend name for logs and reports.
    fn name(&self) -> &'static str;
}

/// Host constants used to normalize raw counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemParams {
    /// Clock ticks per second (`_SC_CLK_TCK`).
    pub clk_tck: u64,
    /// Memory page size in bytes.
    pub page_size: u64,
    /// Number of online CPUs.
    pub nproc: usize,
}

impl SystemParams {
    /// Detects host constants. `CLK_TCK` and `PAGE_SIZE` environment
    /// variables override detection when set to positive integers.
    pub fn detect() -> Self {
        // SAFETY: sysconf has no preconditions.
        let clk_tck = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        // SAFETY: as above.
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };

        Self {
            clk_tck: env_override("CLK_TCK")
                .or_else(|| u64::try_from(clk_tck).ok().filter(|v| *v > 0))
                .unwrap_or(100),
            page_size: env_override("PAGE_SIZE")
                .or_else(|| u64::try_from(page_size).ok().filter(|v| *v > 0))
                .unwrap_or(4096),
            nproc: num_cpus::get().max(1),
        }
    }
}

impl Default for SystemParams {
    fn default() -> Self {
        Self {
            clk_tck: 100,
            page_size: 4096,
            nproc: 1,
        }
    }
}

fn env_override(name: &str) -> Option<u64> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
}

/// Construction options shared by both backends.
#[derive(Debug, Clone)]
pub struct CollectorOptions {
    /// Base path of the proc filesystem.
    pub proc_path: PathBuf,
    /// Mount point of the cgroup v2 hierarchy.
    pub cgroup_root: PathBuf,
    /// EMA factor for VM utilization; 0 disables smoothing.
    pub ema_alpha: f64,
    pub params: SystemParams,
}

impl Default for CollectorOptions {
    fn default() -> Self {
        Self {
            proc_path: PathBuf::from("/proc"),
            cgroup_root: PathBuf::from("/sys/fs/cgroup"),
            ema_alpha: 0.5,
            params: SystemParams::detect(),
        }
    }
}

/// Builds the VM-utilization smoother: `None` when `alpha` clamps to 0.
pub(crate) fn vm_smoother(alpha: f64) -> Option<Ema> {
    let alpha = clamp01(alpha);
    (alpha > 0.0).then(|| Ema::new(alpha))
}

/// Detects the cgroup mode of this host and opens the matching backend on the
/// real filesystem.
pub fn new_collector(ema_alpha: f64) -> Result<Box<dyn Collector>, CollectError> {
    let options = CollectorOptions {
        ema_alpha,
        ..CollectorOptions::default()
    };
    new_collector_with(RealFs::new(), &options)
}

/// Like [`new_collector`], over an arbitrary filesystem and options.
pub fn new_collector_with<F: FileSystem + 'static>(
    fs: F,
    options: &CollectorOptions,
) -> Result<Box<dyn Collector>, CollectError> {
    let detection = detect_cgroup_mode(&fs, &options.proc_path)?;
    debug!(mode = ?detection.mode, detail = %detection.detail, "cgroup detection");

    let collector: Box<dyn Collector> = match detection.mode {
        CgroupMode::V2 | CgroupMode::Hybrid => Box::new(CgroupV2Collector::new(fs, options)?),
        CgroupMode::V1 => Box::new(ProcfsCollector::new(fs, options)?),
        CgroupMode::Unsupported => return Err(CollectError::Unsupported),
    };

    info!(
        backend = collector.name(),
        nproc = options.params.nproc,
        clk_tck = options.params.clk_tck,
        page_size = options.params.page_size,
        "collector ready"
    );
    Ok(collector)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::MockFs;

    fn options() -> CollectorOptions {
        CollectorOptions {
            params: SystemParams {
                clk_tck: 100,
                page_size: 4096,
                nproc: 2,
            },
            ..CollectorOptions::default()
        }
    }

    #[test]
    fn test_factory_picks_cgroup_v2() {
        let fs = MockFs::cgroup_v2_host();
        let mut c = new_collector_with(fs.clone(), &options()).unwrap();
        assert_eq!(c.name(), "cgroup-v2");
        assert_eq!(fs.subdirs("/sys/fs/cgroup").len(), 1);
        c.close().unwrap();
        assert!(fs.subdirs("/sys/fs/cgroup").is_empty());
    }

    #[test]
    fn test_factory_hybrid_needs_unified_root() {
        let fs = MockFs::hybrid_host();

        // The unified hierarchy is not at the default root.
        let err = new_collector_with(fs.clone(), &options()).err().unwrap();
        assert!(matches!(err, CollectError::Cgroup2NotMounted(_)));

        let opts = CollectorOptions {
            cgroup_root: PathBuf::from("/sys/fs/cgroup/unified"),
            ..options()
        };
        let mut c = new_collector_with(fs.clone(), &opts).unwrap();
        assert_eq!(c.name(), "cgroup-v2");
        c.close().unwrap();
    }

    #[test]
    fn test_factory_picks_procfs_on_v1() {
        let fs = MockFs::cgroup_v1_host();
        let c = new_collector_with(fs, &options()).unwrap();
        assert_eq!(c.name(), "procfs");
    }

    #[test]
    fn test_factory_unsupported() {
        let fs = MockFs::no_cgroup_host();
        let err = new_collector_with(fs, &options()).err().unwrap();
        assert!(matches!(err, CollectError::Unsupported));
    }

    #[test]
    fn test_factory_propagates_detection_error() {
        let fs = MockFs::new();
        let err = new_collector_with(fs, &options()).err().unwrap();
        assert!(matches!(err, CollectError::Io(_)));
    }

    #[test]
    fn test_vm_smoother() {
        assert!(vm_smoother(0.0).is_none());
        assert!(vm_smoother(-1.0).is_none());
        assert!(vm_smoother(f64::NAN).is_none());

        // Alpha above 1 clamps to pass-through.
        let mut pass = vm_smoother(2.0).unwrap();
        pass.next(0.2);
        assert_eq!(pass.next(0.8), 0.8);

        let mut half = vm_smoother(0.5).unwrap();
        half.next(0.2);
        assert!((half.next(0.8) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_system_params_detect_is_positive() {
        let p = SystemParams::detect();
        assert!(p.clk_tck > 0);
        assert!(p.page_size > 0);
        assert!(p.nproc >= 1);
    }
}
