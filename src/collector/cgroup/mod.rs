//! Cgroup mode detection and the cgroup-v2-backed sampling backend.

mod collector;
pub mod detect;
pub mod parser;

pub use collector::CgroupV2Collector;
pub use detect::{CgroupDetection, CgroupMode, detect_cgroup_mode};
