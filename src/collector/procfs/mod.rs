//! Procfs access: parsers, per-process reads and the procfs-only backend.

mod collector;
pub mod parser;
pub mod process;

pub use collector::ProcfsCollector;
pub use process::{IoRssCounters, IoRssDelta, ProcReader};
