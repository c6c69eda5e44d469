//! Snapshot-to-watts model with cumulative energy and running averages.

use serde::Serialize;

use crate::collector::Snapshot;
use crate::power::Config;
use crate::util::{DIV_EPSILON, clamp01, pow_guarded};

/// Shortest window used when turning energy into power.
const MIN_DT_SEC: f64 = 1e-6;

/// Power breakdown for one snapshot, in watts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PowerResult {
    pub p_cpu: f64,
    pub p_disk: f64,
    pub p_ram: f64,
    /// Share of idle power charged to the process (0 unless `alpha > 0`).
    pub p_idle_share: f64,
    /// Sum of the four components above.
    pub p_total: f64,
}

/// Runs the power model tick by tick and keeps running totals.
#[derive(Debug, Clone)]
pub struct Accumulator {
    cfg: Config,
    energy_j: f64,
    count: u64,
    sum: PowerResult,
}

impl Accumulator {
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            energy_j: 0.0,
            count: 0,
            sum: PowerResult::default(),
        }
    }

    /// Converts `snap` into watts and adds it to the running totals.
    pub fn apply(&mut self, snap: &Snapshot) -> PowerResult {
        let cfg = &self.cfg;
        let u_vm = clamp01(snap.u_vm);
        let u_proc = clamp01(snap.u_proc);

        let p_dyn = (cfg.p_max - cfg.p_idle) * pow_guarded(u_vm, cfg.gamma);
        let share = if u_vm > DIV_EPSILON { u_proc / u_vm } else { 0.0 };
        let p_cpu = share * p_dyn;

        let dt = snap.time_sec.max(MIN_DT_SEC);
        let p_disk =
            (cfg.e_read * snap.read_bytes as f64 + cfg.e_write * snap.write_bytes as f64) / dt;
        let p_ram = (cfg.e_mem_refault * snap.refault_bytes as f64
            + cfg.e_mem_rss * snap.rss_churn_bytes as f64)
            / dt;

        let p_idle_share = if cfg.alpha > 0.0 {
            cfg.alpha * cfg.p_idle * share
        } else {
            0.0
        };

        let p_total = p_cpu + p_disk + p_ram + p_idle_share;

        self.energy_j += p_total * dt;
        self.count += 1;
        self.sum.p_cpu += p_cpu;
        self.sum.p_disk += p_disk;
        self.sum.p_ram += p_ram;
        self.sum.p_idle_share += p_idle_share;
        self.sum.p_total += p_total;

        PowerResult {
            p_cpu,
            p_disk,
            p_ram,
            p_idle_share,
            p_total,
        }
    }

    /// Mean of every component over the applied snapshots; zeros if none.
    pub fn averages(&self) -> PowerResult {
        if self.count == 0 {
            return PowerResult::default();
        }
        let n = self.count as f64;
        PowerResult {
            p_cpu: self.sum.p_cpu / n,
            p_disk: self.sum.p_disk / n,
            p_ram: self.sum.p_ram / n,
            p_idle_share: self.sum.p_idle_share / n,
            p_total: self.sum.p_total / n,
        }
    }

    /// Total energy in joules so far.
    pub fn cumulative_energy(&self) -> f64 {
        self.energy_j
    }

    /// Number of applied snapshots.
    pub fn samples(&self) -> u64 {
        self.count
    }
}

impl Default for Accumulator {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn snap(u_vm: f64, u_proc: f64, dt: f64) -> Snapshot {
        Snapshot {
            time_sec: dt,
            u_vm,
            u_proc,
            ..Snapshot::default()
        }
    }

    #[test]
    fn test_idle_vm_has_no_cpu_or_idle_share() {
        let mut acc = Accumulator::new(Config {
            alpha: 1.0,
            ..Config::default()
        });
        let r = acc.apply(&Snapshot {
            read_bytes: 1000,
            ..snap(0.0, 0.8, 1.0)
        });
        assert_eq!(r.p_cpu, 0.0);
        assert_eq!(r.p_idle_share, 0.0);
        assert!(r.p_disk > 0.0);
    }

    #[test]
    fn test_cpu_share() {
        let mut acc = Accumulator::default();
        let r = acc.apply(&snap(0.5, 0.25, 1.0));
        let expected = 0.5 * (20.0 - 5.0) * 0.5f64.powf(1.3);
        assert!((r.p_cpu - expected).abs() < EPS);
        assert!((r.p_total - expected).abs() < EPS);
    }

    #[test]
    fn test_utilization_is_clamped() {
        let mut acc = Accumulator::default();
        let r = acc.apply(&snap(2.0, f64::NAN, 1.0));
        assert_eq!(r.p_cpu, 0.0);

        let r = acc.apply(&snap(1.5, 1.5, 1.0));
        assert!((r.p_cpu - 15.0).abs() < EPS);
    }

    #[test]
    fn test_disk_and_ram_power() {
        let cfg = Config::default();
        let mut acc = Accumulator::new(cfg);
        let r = acc.apply(&Snapshot {
            time_sec: 2.0,
            read_bytes: 1_000_000,
            write_bytes: 500_000,
            refault_bytes: 4096 * 100,
            rss_churn_bytes: 1 << 20,
            ..Snapshot::default()
        });

        let disk = (cfg.e_read * 1_000_000.0 + cfg.e_write * 500_000.0) / 2.0;
        let ram = (cfg.e_mem_refault * 409_600.0 + cfg.e_mem_rss * 1_048_576.0) / 2.0;
        assert!((r.p_disk - disk).abs() < EPS);
        assert!((r.p_ram - ram).abs() < EPS);
        assert!((acc.cumulative_energy() - (disk + ram) * 2.0).abs() < EPS);
    }

    #[test]
    fn test_zero_dt_is_floored() {
        let mut acc = Accumulator::default();
        let r = acc.apply(&Snapshot {
            time_sec: 0.0,
            read_bytes: 1,
            ..Snapshot::default()
        });
        assert!((r.p_disk - 4.8e-8 / 1e-6).abs() < EPS);
        assert!(r.p_disk.is_finite());
    }

    #[test]
    fn test_idle_share() {
        let mut acc = Accumulator::new(Config {
            alpha: 0.5,
            ..Config::default()
        });
        let r = acc.apply(&snap(0.5, 0.25, 1.0));
        assert!((r.p_idle_share - 0.5 * 5.0 * 0.5).abs() < EPS);
        assert!((r.p_total - (r.p_cpu + r.p_idle_share)).abs() < EPS);
    }

    #[test]
    fn test_averages_empty() {
        let acc = Accumulator::default();
        assert_eq!(acc.averages(), PowerResult::default());
        assert_eq!(acc.cumulative_energy(), 0.0);
        assert_eq!(acc.samples(), 0);
    }

    #[test]
    fn test_four_snapshot_run() {
        let mut acc = Accumulator::new(Config {
            alpha: 0.2,
            ..Config::default()
        });
        let snaps = [
            Snapshot {
                time_sec: 1.0,
                u_vm: 0.1,
                u_proc: 0.05,
                read_bytes: 1_000,
                write_bytes: 2_000,
                refault_bytes: 4_096,
                rss_churn_bytes: 8_192,
            },
            Snapshot {
                time_sec: 0.5,
                u_vm: 0.3,
                u_proc: 0.1,
                read_bytes: 10_000,
                write_bytes: 20_000,
                refault_bytes: 40_960,
                rss_churn_bytes: 81_920,
            },
            Snapshot {
                time_sec: 1.5,
                u_vm: 0.6,
                u_proc: 0.4,
                read_bytes: 100_000,
                write_bytes: 200_000,
                refault_bytes: 409_600,
                rss_churn_bytes: 819_200,
            },
            Snapshot {
                time_sec: 2.0,
                u_vm: 0.9,
                u_proc: 0.8,
                read_bytes: 1_000_000,
                write_bytes: 2_000_000,
                refault_bytes: 4_096_000,
                rss_churn_bytes: 8_192_000,
            },
        ];

        let results: Vec<PowerResult> = snaps.iter().map(|s| acc.apply(s)).collect();

        let energy: f64 = results
            .iter()
            .zip(&snaps)
            .map(|(r, s)| r.p_total * s.time_sec)
            .sum();
        assert!((acc.cumulative_energy() - energy).abs() < EPS);

        let mean = |f: fn(&PowerResult) -> f64| results.iter().map(f).sum::<f64>() / 4.0;
        let avg = acc.averages();
        assert!((avg.p_cpu - mean(|r| r.p_cpu)).abs() < EPS);
        assert!((avg.p_disk - mean(|r| r.p_disk)).abs() < EPS);
        assert!((avg.p_ram - mean(|r| r.p_ram)).abs() < EPS);
        assert!((avg.p_idle_share - mean(|r| r.p_idle_share)).abs() < EPS);
        assert!((avg.p_total - mean(|r| r.p_total)).abs() < EPS);
        assert_eq!(acc.samples(), 4);

        // Power grows with activity in this sequence.
        assert!(results.windows(2).all(|w| w[1].p_total > w[0].p_total));
    }

    #[test]
    fn test_energy_is_monotonic() {
        let mut acc = Accumulator::default();
        let mut last = 0.0;
        for i in 0..10 {
            acc.apply(&snap(0.1 * i as f64, 0.05 * i as f64, 1.0));
            assert!(acc.cumulative_energy() >= last);
            last = acc.cumulative_energy();
        }
    }
}
