//! Resource sampling for a set of processes.
//!
//! Two interchangeable backends implement [`Collector`]:
//! - [`CgroupV2Collector`] moves the targets into a temporary cgroup v2 leaf
//!   and reads CPU time and refaults from the kernel's cgroup accounting
//! - [`ProcfsCollector`] derives everything from `/proc` and is used on hosts
//!   with only cgroup v1
//!
//! [`new_collector`] detects the cgroup mode once and picks the backend.

pub mod cgroup;
pub mod error;
pub mod mock;
pub mod procfs;
mod sample;
pub mod traits;

pub use cgroup::{CgroupDetection, CgroupMode, CgroupV2Collector, detect_cgroup_mode};
pub use error::CollectError;
pub use mock::MockFs;
pub use procfs::{ProcReader, ProcfsCollector};
pub use sample::{
    Collector, CollectorOptions, Snapshot, SystemParams, new_collector, new_collector_with,
};
pub use traits::{FileSystem, RealFs};
