//! Utility modules for consumption.

mod args;
mod delta;
mod host;

pub use args::{ArgParseError, PID_MAX_LIMIT, parse_interval, parse_pids};
pub use delta::{DIV_EPSILON, Ema, clamp01, delta, pow_guarded, safe_div};
pub use host::{HostSummary, pid_names};
