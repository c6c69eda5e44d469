//! CSV, JSON and HTML report files.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::fmt::{FmtStyle, format_bytes, format_interval};
use crate::power::PowerResult;
use crate::report::Row;
use crate::util::HostSummary;

/// CSV header, in [`Row`] field order.
pub const CSV_HEADER: [&str; 14] = [
    "time",
    "u_vm",
    "u_proc",
    "p_cpu_w",
    "p_disk_w",
    "p_ram_w",
    "p_idle_share_w",
    "p_total_w",
    "e_cum_j",
    "read_bytes",
    "write_bytes",
    "refault_bytes",
    "rss_churn_bytes",
    "interval_sec",
];

/// Error type for report writers.
#[derive(Debug)]
pub enum ReportError {
    Io(io::Error),
    Csv(csv::Error),
    Json(serde_json::Error),
}

impl std::fmt::Display for ReportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportError::Io(e) => write!(f, "report I/O error: {}", e),
            ReportError::Csv(e) => write!(f, "CSV error: {}", e),
            ReportError::Json(e) => write!(f, "JSON error: {}", e),
        }
    }
}

impl std::error::Error for ReportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReportError::Io(e) => Some(e),
            ReportError::Csv(e) => Some(e),
            ReportError::Json(e) => Some(e),
        }
    }
}

impl From<io::Error> for ReportError {
    fn from(e: io::Error) -> Self {
        ReportError::Io(e)
    }
}

impl From<csv::Error> for ReportError {
    fn from(e: csv::Error) -> Self {
        ReportError::Csv(e)
    }
}

impl From<serde_json::Error> for ReportError {
    fn from(e: serde_json::Error) -> Self {
        ReportError::Json(e)
    }
}

/// Output file locations; `None` disables that report.
#[derive(Debug, Clone, Default)]
pub struct ReportPaths {
    pub csv: Option<PathBuf>,
    pub json: Option<PathBuf>,
    pub html: Option<PathBuf>,
}

/// Everything the end-of-run reports show besides the rows.
#[derive(Debug, Clone)]
pub struct RunSummary<'a> {
    pub host: &'a HostSummary,
    pub backend: &'a str,
    pub interval: Duration,
    pub processes: &'a BTreeMap<u32, String>,
    pub averages: PowerResult,
    pub energy_j: f64,
}

/// Creates the parent directories of `path`.
fn create_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// Collects rows and writes the enabled report files.
///
/// CSV rows are flushed as they arrive so an interrupted run keeps them;
/// JSON and HTML are written by [`ReportSink::finish`].
pub struct ReportSink {
    csv: Option<csv::Writer<File>>,
    json_path: Option<PathBuf>,
    html_path: Option<PathBuf>,
    rows: Vec<Row>,
}

impl ReportSink {
    /// Creates the enabled files (and their parent directories).
    pub fn open(paths: &ReportPaths) -> Result<Self, ReportError> {
        let csv = match &paths.csv {
            Some(path) => {
                create_parent(path)?;
                let mut writer = csv::WriterBuilder::new()
                    .has_headers(false)
                    .from_path(path)?;
                writer.write_record(CSV_HEADER)?;
                writer.flush()?;
                debug!(path = %path.display(), "CSV report opened");
                Some(writer)
            }
            None => None,
        };

        for path in [&paths.json, &paths.html].into_iter().flatten() {
            create_parent(path)?;
        }

        Ok(Self {
            csv,
            json_path: paths.json.clone(),
            html_path: paths.html.clone(),
            rows: Vec::new(),
        })
    }

    /// Records one tick.
    pub fn record(&mut self, row: Row) -> Result<(), ReportError> {
        if let Some(writer) = self.csv.as_mut() {
            writer.serialize(&row)?;
            writer.flush()?;
        }
        self.rows.push(row);
        Ok(())
    }

    /// Flushes CSV and writes the JSON and HTML files.
    pub fn finish(mut self, summary: &RunSummary<'_>) -> Result<(), ReportError> {
        if let Some(mut writer) = self.csv.take() {
            writer.flush()?;
        }

        if let Some(path) = &self.json_path {
            let mut w = BufWriter::new(File::create(path)?);
            serde_json::to_writer_pretty(&mut w, &self.rows)?;
            writeln!(w)?;
            w.flush()?;
            debug!(path = %path.display(), rows = self.rows.len(), "JSON report written");
        }

        if let Some(path) = &self.html_path {
            let mut w = BufWriter::new(File::create(path)?);
            write_html(&mut w, &self.rows, summary)?;
            w.flush()?;
            debug!(path = %path.display(), rows = self.rows.len(), "HTML report written");
        }

        Ok(())
    }
}

/// Escapes text for HTML element content and attribute values.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

const HTML_STYLE: &str = "\
body{font-family:system-ui,sans-serif;margin:24px;color:#222}
h1{margin:0 0 4px}h2{margin:20px 0 8px}
table{border-collapse:collapse;width:100%;font-size:13px}
th,td{border:1px solid #ddd;padding:4px 8px;text-align:right}
th:first-child,td:first-child{text-align:left}
th{background:#f4f4f4}
.meta{color:#555}
.pid{display:inline-block;min-width:80px;font-family:monospace}
";

/// Renders the HTML report.
pub fn write_html<W: Write>(
    w: &mut W,
    rows: &[Row],
    summary: &RunSummary<'_>,
) -> io::Result<()> {
    let host = summary.host;
    let avg = &summary.averages;

    writeln!(w, "<!doctype html>")?;
    writeln!(w, "<html lang=\"en\"><head><meta charset=\"utf-8\">")?;
    writeln!(w, "<title>Consumption report</title>")?;
    writeln!(w, "<style>\n{}</style></head><body>", HTML_STYLE)?;
    writeln!(w, "<h1>Consumption report</h1>")?;
    writeln!(
        w,
        "<p class=\"meta\">{} &middot; kernel {} &middot; {} CPUs &middot; {} RAM &middot; {} backend &middot; {} samples of {}</p>",
        escape_html(&host.hostname),
        escape_html(&host.kernel),
        host.cpus,
        escape_html(&host.mem_display()),
        escape_html(summary.backend),
        rows.len(),
        format_interval(summary.interval),
    )?;

    if !summary.processes.is_empty() {
        writeln!(w, "<h2>Processes</h2>\n<ul>")?;
        for (pid, name) in summary.processes {
            writeln!(
                w,
                "<li><span class=\"pid\">{}</span>{}</li>",
                pid,
                escape_html(name)
            )?;
        }
        writeln!(w, "</ul>")?;
    }

    writeln!(w, "<h2>Summary</h2>\n<table>")?;
    for (label, value) in [
        ("Avg P(cpu)", avg.p_cpu),
        ("Avg P(disk)", avg.p_disk),
        ("Avg P(ram)", avg.p_ram),
        ("Avg P(idle share)", avg.p_idle_share),
        ("Avg P(total)", avg.p_total),
    ] {
        writeln!(w, "<tr><th>{}</th><td>{:.3} W</td></tr>", label, value)?;
    }
    writeln!(
        w,
        "<tr><th>Energy</th><td>{:.3} J</td></tr>\n</table>",
        summary.energy_j
    )?;

    writeln!(w, "<h2>Per tick</h2>\n<table>\n<thead><tr>")?;
    for name in [
        "time", "U_vm", "U_proc", "P_cpu (W)", "P_disk (W)", "P_ram (W)", "P_idle (W)",
        "P_total (W)", "E_cum (J)", "read", "write", "refault", "RSS churn",
    ] {
        write!(w, "<th>{}</th>", name)?;
    }
    writeln!(w, "</tr></thead>\n<tbody>")?;
    for row in rows {
        writeln!(
            w,
            "<tr><td>{}</td><td>{:.4}</td><td>{:.4}</td><td>{:.3}</td><td>{:.3}</td><td>{:.3}</td><td>{:.3}</td><td>{:.3}</td><td>{:.3}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape_html(&row.display_time()),
            row.u_vm,
            row.u_proc,
            row.p_cpu_w,
            row.p_disk_w,
            row.p_ram_w,
            row.p_idle_share_w,
            row.p_total_w,
            row.e_cum_j,
            format_bytes(row.read_bytes, FmtStyle::Detail),
            format_bytes(row.write_bytes, FmtStyle::Detail),
            format_bytes(row.refault_bytes, FmtStyle::Detail),
            format_bytes(row.rss_churn_bytes, FmtStyle::Detail),
        )?;
    }
    writeln!(w, "</tbody>\n</table>\n</body></html>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::row::tests::sample_row;

    fn host() -> HostSummary {
        HostSummary {
            hostname: "db<01>".to_string(),
            kernel: "6.8.0".to_string(),
            cpus: 4,
            mem_total: Some(8 << 30),
        }
    }

    fn processes() -> BTreeMap<u32, String> {
        BTreeMap::from([(42, "evil & <script>".to_string()), (7, "init".to_string())])
    }

    fn summary<'a>(host: &'a HostSummary, processes: &'a BTreeMap<u32, String>) -> RunSummary<'a> {
        RunSummary {
            host,
            backend: "cgroup-v2",
            interval: Duration::from_secs(1),
            processes,
            averages: PowerResult {
                p_cpu: 1.5,
                p_disk: 0.25,
                p_ram: 0.125,
                p_idle_share: 0.0,
                p_total: 1.875,
            },
            energy_j: 3.75,
        }
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<a href="x">&'"#),
            "&lt;a href=&quot;x&quot;&gt;&amp;&#39;"
        );
        assert_eq!(escape_html("plain"), "plain");
    }

    #[test]
    fn test_reports_written() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ReportPaths {
            csv: Some(dir.path().join("nested/a/out.csv")),
            json: Some(dir.path().join("nested/b/out.json")),
            html: Some(dir.path().join("out.html")),
        };

        let mut sink = ReportSink::open(&paths).unwrap();
        sink.record(sample_row(0)).unwrap();
        sink.record(sample_row(1)).unwrap();

        let host = host();
        let procs = processes();
        sink.finish(&summary(&host, &procs)).unwrap();

        // CSV
        let mut rdr = csv::Reader::from_path(paths.csv.as_ref().unwrap()).unwrap();
        let headers: Vec<String> = rdr.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(headers, CSV_HEADER);
        let records: Vec<csv::StringRecord> = rdr.records().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(&records[1][9], "4096");
        assert_eq!(&records[1][7], "1.875");

        // JSON
        let json = std::fs::read_to_string(paths.json.as_ref().unwrap()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let arr = value.as_array().unwrap();
        assert_eq!(arr.len(), 2);
        assert_eq!(arr[1]["read_bytes"], 4096);
        assert_eq!(arr[0]["p_total_w"], 1.875);
        assert!(arr[0].get("at").is_none());

        // HTML
        let html = std::fs::read_to_string(paths.html.as_ref().unwrap()).unwrap();
        assert!(html.starts_with("<!doctype html>"));
        assert!(html.contains("db&lt;01&gt;"));
        assert!(html.contains("evil &amp; &lt;script&gt;"));
        assert!(!html.contains("<script>"));
        assert!(html.contains("3.750 J"));
        assert_eq!(html.matches("<tr><td>").count(), 2);
    }

    #[test]
    fn test_csv_header_written_without_rows() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ReportPaths {
            csv: Some(dir.path().join("empty.csv")),
            ..ReportPaths::default()
        };
        let sink = ReportSink::open(&paths).unwrap();
        let host = host();
        let procs = BTreeMap::new();
        sink.finish(&summary(&host, &procs)).unwrap();

        let content = std::fs::read_to_string(dir.path().join("empty.csv")).unwrap();
        assert_eq!(content.trim_end(), CSV_HEADER.join(","));
    }

    #[test]
    fn test_disabled_reports_write_nothing() {
        let sink = ReportSink::open(&ReportPaths::default()).unwrap();
        let host = host();
        let procs = BTreeMap::new();
        sink.finish(&summary(&host, &procs)).unwrap();
    }
}
