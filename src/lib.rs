//! consumption - process power and energy estimation for Linux.
//!
//! Samples CPU, disk and memory activity of a set of processes (through a
//! temporary cgroup v2 leaf, or procfs alone) and converts each sample into
//! watts with a configurable model:
//! - [`collector`] - kernel interfaces and the sampling backends
//! - [`power`] - model coefficients and the energy accumulator
//! - [`report`] - stdout table and report files

pub mod collector;
pub mod fmt;
pub mod power;
pub mod report;
pub mod util;
