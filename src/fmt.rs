//! Shared formatting helpers for the stdout table and the HTML report.

use std::time::Duration;

/// Controls compact (table columns) vs verbose (summaries, HTML) output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FmtStyle {
    /// Compact: no spaces, short suffixes ("1.5G")
    Compact,
    /// Detail: spaces, full suffixes ("1.5 GiB")
    Detail,
}

/// Format byte count as human-readable size.
///
/// Compact: `"2.0T"`, `"1.5G"`, `"100.3M"`, `"50.0K"`, `"512B"`
/// Detail:  `"2.0 TiB"`, `"1.5 GiB"`, `"100.3 MiB"`, `"50.0 KiB"`, `"512 B"`
pub fn format_bytes(bytes: u64, style: FmtStyle) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;
    const TIB: u64 = GIB * 1024;

    let (t, g, m, k, b) = match style {
        FmtStyle::Compact => ("T", "G", "M", "K", "B"),
        FmtStyle::Detail => (" TiB", " GiB", " MiB", " KiB", " B"),
    };
    let f = bytes as f64;
    if bytes >= TIB {
        format!("{:.1}{}", f / TIB as f64, t)
    } else if bytes >= GIB {
        format!("{:.1}{}", f / GIB as f64, g)
    } else if bytes >= MIB {
        format!("{:.1}{}", f / MIB as f64, m)
    } else if bytes >= KIB {
        format!("{:.1}{}", f / KIB as f64, k)
    } else {
        format!("{}{}", bytes, b)
    }
}

/// Format a sampling interval: `"500ms"`, `"1s"`, `"1.5s"`, `"2m"`.
pub fn format_interval(interval: Duration) -> String {
    let ms = interval.as_millis();
    if ms < 1000 {
        format!("{}ms", ms)
    } else if ms % 60_000 == 0 {
        format!("{}m", ms / 60_000)
    } else if ms % 1000 == 0 {
        format!("{}s", ms / 1000)
    } else {
        let secs = format!("{:.3}", interval.as_secs_f64());
        format!("{}s", secs.trim_end_matches('0'))
    }
}
