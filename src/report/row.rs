//! One reported tick.

use chrono::{DateTime, Local, SecondsFormat};
use serde::Serialize;

use crate::collector::Snapshot;
use crate::power::PowerResult;
use crate::util::clamp01;

/// A reported tick: the snapshot, its power breakdown and the running energy.
///
/// Field names double as CSV headers and JSON keys.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    #[serde(skip)]
    pub at: DateTime<Local>,
    /// RFC 3339 timestamp.
    pub time: String,
    pub u_vm: f64,
    pub u_proc: f64,
    pub p_cpu_w: f64,
    pub p_disk_w: f64,
    pub p_ram_w: f64,
    pub p_idle_share_w: f64,
    pub p_total_w: f64,
    pub e_cum_j: f64,
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub refault_bytes: u64,
    pub rss_churn_bytes: u64,
    pub interval_sec: f64,
}

impl Row {
    pub fn new(at: DateTime<Local>, snap: &Snapshot, power: &PowerResult, e_cum_j: f64) -> Self {
        Self {
            at,
            time: at.to_rfc3339_opts(SecondsFormat::Secs, false),
            u_vm: clamp01(snap.u_vm),
            u_proc: clamp01(snap.u_proc),
            p_cpu_w: power.p_cpu,
            p_disk_w: power.p_disk,
            p_ram_w: power.p_ram,
            p_idle_share_w: power.p_idle_share,
            p_total_w: power.p_total,
            e_cum_j,
            read_bytes: snap.read_bytes,
            write_bytes: snap.write_bytes,
            refault_bytes: snap.refault_bytes,
            rss_churn_bytes: snap.rss_churn_bytes,
            interval_sec: snap.time_sec,
        }
    }

    /// Local time as `YYYY-MM-DD HH:MM:SS`.
    pub fn display_time(&self) -> String {
        self.at.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}
