//! Host description printed in the report header.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::collector::{FileSystem, ProcReader};
use crate::fmt::{FmtStyle, format_bytes};

/// Static facts about the host being measured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostSummary {
    pub hostname: String,
    pub kernel: String,
    pub cpus: usize,
    /// `MemTotal` in bytes, if `/proc/meminfo` was readable.
    pub mem_total: Option<u64>,
}

impl HostSummary {
    /// Reads hostname, kernel release and total memory from procfs.
    /// Unreadable values are reported as `"unknown"`.
    pub fn read<F: FileSystem>(reader: &ProcReader<F>, cpus: usize) -> Self {
        let unknown = || "unknown".to_string();
        Self {
            hostname: reader.sys_value("kernel/hostname").unwrap_or_else(unknown),
            kernel: reader.sys_value("kernel/osrelease").unwrap_or_else(unknown),
            cpus,
            mem_total: reader.mem_total(),
        }
    }

    /// Total memory for display, e.g. `15.6 GiB`.
    pub fn mem_display(&self) -> String {
        self.mem_total
            .map(|b| format_bytes(b, FmtStyle::Detail))
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// Maps each PID to its command name; exited processes map to `"?"`.
pub fn pid_names<F: FileSystem>(reader: &ProcReader<F>, pids: &[u32]) -> BTreeMap<u32, String> {
    pids.iter()
        .map(|&pid| (pid, reader.comm(pid).unwrap_or_else(|| "?".to_string())))
        .collect()
}
