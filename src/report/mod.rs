//! Per-tick output: stdout lines, the end-of-run summary and the CSV, JSON
//! and HTML report files.

mod files;
mod row;
mod stdout;
mod summary;

pub use files::{CSV_HEADER, ReportError, ReportPaths, ReportSink, RunSummary, escape_html, write_html};
pub use row::Row;
pub use stdout::{StdoutFormat, write_header, write_row};
pub use summary::{RunInfo, finish_run};
