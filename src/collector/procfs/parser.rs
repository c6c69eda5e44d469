//! Pure parsers for the procfs files the sampling backends read.
//!
//! Every function takes file content as `&str`; I/O lives in [`super::process`].

/// Error type for parsing failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Parse error: {}", self.message)
    }
}

impl std::error::Error for ParseError {}

// ============ Per-process files ============

/// Fields of `/proc/[pid]/stat` the sampling backends consume.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcStat {
    pub pid: u32,
    pub comm: String,
    pub state: char,
    pub ppid: u32,
    pub minflt: u64,
    pub majflt: u64,
    /// User-mode CPU time in clock ticks.
    pub utime: u64,
    /// Kernel-mode CPU time in clock ticks.
    pub stime: u64,
}

impl ProcStat {
    /// Total CPU time (user + system) in clock ticks.
    pub fn cpu_ticks(&self) -> u64 {
        self.utime.saturating_add(self.stime)
    }
}

/// Parses `/proc/[pid]/stat` content.
///
/// The comm field can contain spaces and parentheses, so the fixed fields are
/// located after the *last* `)`.
pub fn parse_proc_stat(content: &str) -> Result<ProcStat, ParseError> {
    let content = content.trim();

    let open_paren = content
        .find('(')
        .ok_or_else(|| ParseError::new("stat: no comm start"))?;
    let close_paren = content
        .rfind(')')
        .ok_or_else(|| ParseError::new("stat: no comm end"))?;

    if close_paren <= open_paren {
        return Err(ParseError::new("stat: comm end before start"));
    }

    let pid: u32 = content[..open_paren]
        .trim()
        .parse()
        .map_err(|_| ParseError::new("stat: bad pid"))?;

    let comm = content[open_paren + 1..close_paren].to_string();

    let fields: Vec<&str> = content[close_paren + 1..].split_whitespace().collect();

    // state(0) .. stime(12)
    if fields.len() < 13 {
        return Err(ParseError::new(format!(
            "not enough fields in stat: expected 13+, got {}",
            fields.len()
        )));
    }

    let parse_u64 = |idx: usize, name: &str| -> Result<u64, ParseError> {
        fields[idx]
            .parse()
            .map_err(|_| ParseError::new(format!("stat: bad {}", name)))
    };

    Ok(ProcStat {
        pid,
        comm,
        state: fields[0].chars().next().unwrap_or('?'),
        ppid: parse_u64(1, "ppid")? as u32,
        minflt: parse_u64(7, "minflt")?,
        majflt: parse_u64(9, "majflt")?,
        utime: parse_u64(11, "utime")?,
        stime: parse_u64(12, "stime")?,
    })
}

/// Parsed data from `/proc/[pid]/io`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcIo {
    pub rchar: u64,
    pub wchar: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub cancelled_write_bytes: u64,
}

/// Parses `/proc/[pid]/io` content.
///
/// Format is key: value pairs, one per line. Missing storage counters are an
/// error: without them the file is useless for disk accounting.
pub fn parse_proc_io(content: &str) -> Result<ProcIo, ParseError> {
    let mut io = ProcIo::default();
    let mut seen_storage = false;

    for line in content.lines() {
        if let Some((key, value)) = line.split_once(':') {
            let value: u64 = value.trim().parse().unwrap_or(0);
            match key.trim() {
                "rchar" => io.rchar = value,
                "wchar" => io.wchar = value,
                "read_bytes" => {
                    io.read_bytes = value;
                    seen_storage = true;
                }
                "write_bytes" => {
                    io.write_bytes = value;
                    seen_storage = true;
                }
                "cancelled_write_bytes" => io.cancelled_write_bytes = value,
                _ => {}
            }
        }
    }

    if !seen_storage {
        return Err(ParseError::new("no read_bytes/write_bytes in io"));
    }

    Ok(io)
}

/// Parses the `Rss:` line of `/proc/[pid]/smaps_rollup` into bytes.
pub fn parse_smaps_rollup_rss(content: &str) -> Option<u64> {
    content
        .lines()
        .find(|line| line.starts_with("Rss:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb * 1024)
}

/// Parses the resident page count (second field) of `/proc/[pid]/statm`.
pub fn parse_statm_resident_pages(content: &str) -> Option<u64> {
    content.split_whitespace().nth(1)?.parse().ok()
}

/// Parses a `/proc/[pid]/task/[tid]/children` file: space separated PIDs.
pub fn parse_children(content: &str) -> Vec<u32> {
    content
        .split_whitespace()
        .filter_map(|s| s.parse().ok())
        .collect()
}

/// Parses the unified-hierarchy path (the `0::` entry) of `/proc/[pid]/cgroup`.
pub fn parse_cgroup_v2_path(content: &str) -> Option<String> {
    content
        .lines()
        .find_map(|line| line.strip_prefix("0::"))
        .map(|path| path.trim().to_string())
}

// ============ System-wide files ============

/// Aggregate CPU times from the `cpu` line of `/proc/stat`, in clock ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuTimes {
    /// Ticks spent doing work: user + nice + system + irq + softirq + steal.
    pub fn active(&self) -> u64 {
        self.user + self.nice + self.system + self.irq + self.softirq + self.steal
    }

    /// Active ticks plus idle and iowait.
    pub fn total(&self) -> u64 {
        self.active() + self.idle + self.iowait
    }
}

/// Parses the aggregate `cpu` line of `/proc/stat`.
///
/// Kernels older than 2.6.11 report fewer than eight columns; those are
/// rejected rather than guessed.
pub fn parse_cpu_line(content: &str) -> Result<CpuTimes, ParseError> {
    let line = content
        .lines()
        .find(|line| line.split_whitespace().next() == Some("cpu"))
        .ok_or_else(|| ParseError::new("no aggregate cpu line in stat"))?;

    let values: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map(|s| s.parse().unwrap_or(0))
        .collect();

    if values.len() < 8 {
        return Err(ParseError::new(format!(
            "short cpu line: expected 8+ values, got {}",
            values.len()
        )));
    }

    Ok(CpuTimes {
        user: values[0],
        nice: values[1],
        system: values[2],
        idle: values[3],
        iowait: values[4],
        irq: values[5],
        softirq: values[6],
        steal: values[7],
    })
}

/// One line of `/proc/[pid]/mountinfo`, reduced to what cgroup detection needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub mount_point: String,
    pub fs_type: String,
}

/// Parses `/proc/[pid]/mountinfo` content.
///
/// Format: `<id> <parent> <maj:min> <root> <mount point> <opts> [optional...] - <fstype> <source> <superopts>`.
/// The optional fields are variable in number, so the filesystem type is
/// located after the ` - ` separator. Malformed lines are skipped.
pub fn parse_mountinfo(content: &str) -> Vec<MountEntry> {
    let mut mounts = Vec::new();

    for line in content.lines() {
        let Some((pre, post)) = line.rsplit_once(" - ") else {
            continue;
        };
        let Some(mount_point) = pre.split_whitespace().nth(4) else {
            continue;
        };
        let Some(fs_type) = post.split_whitespace().next() else {
            continue;
        };

        mounts.push(MountEntry {
            mount_point: unescape_mount_path(mount_point),
            fs_type: fs_type.to_string(),
        });
    }

    mounts
}

/// Decodes the `\ooo` octal escapes the kernel uses for spaces, tabs,
/// newlines and backslashes in mount paths.
fn unescape_mount_path(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 3 < bytes.len()
            && bytes[i + 1..i + 4].iter().all(|b| (b'0'..=b'7').contains(b))
            && let Ok(code) = u8::try_from(
                u32::from(bytes[i + 1] - b'0') * 64
                    + u32::from(bytes[i + 2] - b'0') * 8
                    + u32::from(bytes[i + 3] - b'0'),
            )
        {
            out.push(code);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

/// Parses `MemTotal` (kB) from `/proc/meminfo`.
pub fn parse_meminfo_total_kb(content: &str) -> Option<u64> {
    content
        .lines()
        .find(|line| line.starts_with("MemTotal:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|s| s.parse().ok())
}
