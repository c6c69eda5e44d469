//! Parsers for command-line values: PID lists and sampling intervals.
//!
//! PID arguments accept:
//! - Single PID: `1234`
//! - Inclusive range: `30000..30032`
//! - Several of the above in one token, comma or space separated: `1,2,10..12`
//!
//! PIDs above [`PID_MAX_LIMIT`] are rejected, so a range never expands past
//! what the kernel can allocate.
//!
//! Intervals accept `250ms`, `1s`, `2m`, `1h`, or bare seconds (`1.5`).

use std::collections::BTreeSet;
use std::time::Duration;

/// Kernel ceiling for `/proc/sys/kernel/pid_max` on 64-bit hosts.
pub const PID_MAX_LIMIT: u32 = 4_194_304;

/// Error type for argument parsing failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ArgParseError {
    pub input: String,
    pub message: String,
}

impl ArgParseError {
    fn new(input: &str, message: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ArgParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to parse '{}': {}", self.input, self.message)
    }
}

impl std::error::Error for ArgParseError {}

/// Parses PID arguments into a sorted, deduplicated list.
pub fn parse_pids<S: AsRef<str>>(args: &[S]) -> Result<Vec<u32>, ArgParseError> {
    let mut pids = BTreeSet::new();

    for arg in args {
        for token in arg.as_ref().split(|c: char| c == ',' || c.is_whitespace()) {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }

            if let Some((start, end)) = token.split_once("..") {
                let start = parse_pid(token, start)?;
                let end = parse_pid(token, end)?;
                if end < start {
                    return Err(ArgParseError::new(token, "range end is below range start"));
                }
                pids.extend(start..=end);
            } else {
                pids.insert(parse_pid(token, token)?);
            }
        }
    }

    Ok(pids.into_iter().collect())
}

fn parse_pid(token: &str, part: &str) -> Result<u32, ArgParseError> {
    let pid: u32 = part
        .trim()
        .parse()
        .map_err(|_| ArgParseError::new(token, "not a valid PID"))?;
    if pid == 0 {
        return Err(ArgParseError::new(token, "PID 0 is not a process"));
    }
    if pid > PID_MAX_LIMIT {
        return Err(ArgParseError::new(
            token,
            format!("PID above the kernel limit {}", PID_MAX_LIMIT),
        ));
    }
    Ok(pid)
}

/// Parses a sampling interval. The result is always strictly positive.
pub fn parse_interval(input: &str) -> Result<Duration, ArgParseError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ArgParseError::new(input, "empty interval"));
    }

    // (number, multiplier, divisor)
    let (number_str, mul, div) = if let Some(n) = input.strip_suffix("ms") {
        (n, 1.0, 1000.0)
    } else if let Some(n) = input.strip_suffix('s') {
        (n, 1.0, 1.0)
    } else if let Some(n) = input.strip_suffix('m') {
        (n, 60.0, 1.0)
    } else if let Some(n) = input.strip_suffix('h') {
        (n, 3600.0, 1.0)
    } else {
        (input, 1.0, 1.0)
    };

    let number: f64 = number_str
        .trim()
        .parse()
        .map_err(|_| ArgParseError::new(input, "expected e.g. 500ms, 1s, 2m or 1.5"))?;
    let seconds = number * mul / div;
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(ArgParseError::new(input, "interval must be > 0"));
    }

    Ok(Duration::from_secs_f64(seconds))
}
