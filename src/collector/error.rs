//! Error type shared by the cgroup detector and both sampling backends.

use std::path::PathBuf;

/// Error type for collection failures.
#[derive(Debug)]
pub enum CollectError {
    /// `sample` was called with an empty PID set.
    NoPids,
    /// `sample` was called with a non-positive (or NaN) interval.
    BadInterval(f64),
    /// None of the requested PIDs exists any more.
    AllExited,
    /// Neither cgroup v1 nor cgroup v2 is mounted.
    Unsupported,
    /// The unified hierarchy is not mounted at the expected root.
    Cgroup2NotMounted(PathBuf),
    /// I/O error reading a required kernel interface file.
    Io(std::io::Error),
    /// Parse error in a required kernel interface file.
    Parse(String),
}

impl CollectError {
    /// Returns `true` when every monitored process is gone.
    pub fn is_all_exited(&self) -> bool {
        matches!(self, CollectError::AllExited)
    }

    /// Returns `true` for caller mistakes (empty PID set, bad interval).
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, CollectError::NoPids | CollectError::BadInterval(_))
    }
}

impl std::fmt::Display for CollectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectError::NoPids => write!(f, "collector: no pids"),
            CollectError::BadInterval(dt) => {
                write!(f, "collector: interval must be > 0 (got {})", dt)
            }
            CollectError::AllExited => write!(f, "collector: all pids exited"),
            CollectError::Unsupported => write!(f, "collector: unsupported cgroup mode"),
            CollectError::Cgroup2NotMounted(root) => {
                write!(f, "cgroup v2 not mounted on {}", root.display())
            }
            CollectError::Io(e) => write!(f, "I/O error: {}", e),
            CollectError::Parse(msg) => write!(f, "parse error: {}", msg),
        }
    }
}

impl std::error::Error for CollectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CollectError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CollectError {
    fn from(e: std::io::Error) -> Self {
        CollectError::Io(e)
    }
}

impl From<crate::collector::procfs::parser::ParseError> for CollectError {
    fn from(e: crate::collector::procfs::parser::ParseError) -> Self {
        CollectError::Parse(e.message)
    }
}
