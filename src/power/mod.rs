//! Power model: turns a [`Snapshot`](crate::collector::Snapshot) into watts.
//!
//! ```text
//! P_dyn   = (P_max - P_idle) * U_vm^gamma
//! P_cpu   = (U_proc / U_vm) * P_dyn
//! P_disk  = (E_read * read + E_write * write) / dt
//! P_ram   = (E_ref * refault + E_rss * rss_churn) / dt
//! P_idle  = alpha * P_idle * (U_proc / U_vm)
//! P_total = P_cpu + P_disk + P_ram + P_idle
//! ```

mod accumulator;
mod config;

pub use accumulator::{Accumulator, PowerResult};
pub use config::Config;
