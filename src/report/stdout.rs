//! Per-tick lines on stdout: an aligned table or CSV-like lines.

use std::io::{self, Write};

use crate::fmt::{FmtStyle, format_bytes};
use crate::report::Row;

/// Stdout layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdoutFormat {
    Table,
    Plain,
}

const TABLE_HEADER: [&str; 10] = [
    "TIME", "U_vm", "U_proc", "P_cpu(W)", "P_disk(W)", "P_ram(W)", "P_idle(W)", "P_total(W)",
    "E_cum(J)", "DISK R/W",
];
const TABLE_WIDTHS: [usize; 10] = [19, 7, 7, 9, 9, 9, 9, 10, 10, 13];

/// Writes the header for `format`.
pub fn write_header<W: Write>(w: &mut W, format: StdoutFormat) -> io::Result<()> {
    match format {
        StdoutFormat::Table => {
            let mut header = String::new();
            let mut rule = String::new();
            for (i, (name, width)) in TABLE_HEADER.iter().zip(TABLE_WIDTHS).enumerate() {
                if i > 0 {
                    header.push_str("  ");
                    rule.push_str("  ");
                }
                if i == 0 {
                    header.push_str(&format!("{:<width$}", name));
                } else {
                    header.push_str(&format!("{:>width$}", name));
                }
                rule.push_str(&"-".repeat(width));
            }
            writeln!(w, "{}", header.trim_end())?;
            writeln!(w, "{}", rule)
        }
        StdoutFormat::Plain => writeln!(
            w,
            "# time, U_vm, U_proc, P_cpu(W), P_disk(W), P_ram(W), P_idle(W), P_total(W), E_cum(J)"
        ),
    }
}

/// Writes one tick.
pub fn write_row<W: Write>(w: &mut W, format: StdoutFormat, row: &Row) -> io::Result<()> {
    match format {
        StdoutFormat::Table => {
            let disk = format!(
                "{}/{}",
                format_bytes(row.read_bytes, FmtStyle::Compact),
                format_bytes(row.write_bytes, FmtStyle::Compact)
            );
            let tw = TABLE_WIDTHS[0];
            let uw = TABLE_WIDTHS[1];
            let pw = TABLE_WIDTHS[3];
            writeln!(
                w,
                "{:<tw$}  {:>uw$.4}  {:>uw$.4}  {:>pw$.3}  {:>pw$.3}  {:>pw$.3}  {:>pw$.3}  {:>10.3}  {:>10.3}  {:>13}",
                row.display_time(),
                row.u_vm,
                row.u_proc,
                row.p_cpu_w,
                row.p_disk_w,
                row.p_ram_w,
                row.p_idle_share_w,
                row.p_total_w,
                row.e_cum_j,
                disk,
            )
        }
        StdoutFormat::Plain => writeln!(
            w,
            "{}, {:.4}, {:.4}, {:.3}, {:.3}, {:.3}, {:.3}, {:.3}, {:.3}",
            row.time,
            row.u_vm,
            row.u_proc,
            row.p_cpu_w,
            row.p_disk_w,
            row.p_ram_w,
            row.p_idle_share_w,
            row.p_total_w,
            row.e_cum_j,
        ),
    }
}
