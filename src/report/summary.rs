//! End of a run: releasing the collector, the summary line and the report files.

use std::collections::BTreeMap;
use std::io::Write;
use std::time::Duration;

use tracing::warn;

use crate::collector::Collector;
use crate::power::Accumulator;
use crate::report::{ReportError, ReportSink, RunSummary};
use crate::util::HostSummary;

/// Run details known before sampling starts.
#[derive(Debug, Clone, Copy)]
pub struct RunInfo<'a> {
    pub host: &'a HostSummary,
    pub interval: Duration,
    pub processes: &'a BTreeMap<u32, String>,
}

/// Closes the collector, prints the averages to `out` and writes the
/// report files.
///
/// A failed close is logged and does not stop the summary or the reports:
/// the measurements are complete by then.
pub fn finish_run<W: Write>(
    out: &mut W,
    collector: &mut dyn Collector,
    accumulator: &Accumulator,
    sink: ReportSink,
    info: &RunInfo<'_>,
) -> Result<(), ReportError> {
    if let Err(e) = collector.close() {
        warn!(backend = collector.name(), error = %e, "Failed to close collector");
    }

    let avg = accumulator.averages();
    let energy_j = accumulator.cumulative_energy();
    writeln!(out)?;
    writeln!(
        out,
        "{} samples: avg P_cpu {:.3} W, P_disk {:.3} W, P_ram {:.3} W, P_idle {:.3} W, P_total {:.3} W; energy {:.3} J",
        accumulator.samples(),
        avg.p_cpu,
        avg.p_disk,
        avg.p_ram,
        avg.p_idle_share,
        avg.p_total,
        energy_j,
    )?;
    out.flush()?;

    sink.finish(&RunSummary {
        host: info.host,
        backend: collector.name(),
        interval: info.interval,
        processes: info.processes,
        averages: avg,
        energy_j,
    })
}
