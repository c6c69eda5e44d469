//! Model coefficients.

use serde::{Deserialize, Serialize};

/// Coefficients of the power model.
///
/// Units: `p_idle`/`p_max` in watts, `gamma` dimensionless, the `e_*` fields
/// in joules per byte, `alpha` a fraction in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Host power at idle.
    pub p_idle: f64,
    /// Host power at full utilization.
    pub p_max: f64,
    /// CPU curve exponent.
    pub gamma: f64,
    /// Disk read energy per byte.
    pub e_read: f64,
    /// Disk write energy per byte.
    pub e_write: f64,
    /// Energy per refaulted byte.
    pub e_mem_refault: f64,
    /// Energy per byte of RSS churn.
    pub e_mem_rss: f64,
    /// Fraction of idle power charged to the process share.
    pub alpha: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            p_idle: 5.0,
            p_max: 20.0,
            gamma: 1.3,
            e_read: 4.8e-8,
            e_write: 9.5e-8,
            e_mem_refault: 7e-10,
            e_mem_rss: 3e-10,
            alpha: 0.0,
        }
    }
}

impl Config {
    /// An override set with every field unset.
    pub fn unset() -> Self {
        Self {
            p_idle: -1.0,
            p_max: -1.0,
            gamma: -1.0,
            e_read: -1.0,
            e_write: -1.0,
            e_mem_refault: -1.0,
            e_mem_rss: -1.0,
            alpha: -1.0,
        }
    }

    /// Applies `overrides` on top of the defaults.
    ///
    /// - `p_idle`, `p_max`, `gamma`, `e_read`, `e_write`: positive values win
    /// - `e_mem_refault`, `e_mem_rss`: zero disables the term, negative is unset
    /// - `alpha`: any value in [0, 1] wins, 0 included
    ///
    /// `p_max` is raised to `p_idle` if it ends up below it.
    pub fn merged(overrides: &Config) -> Self {
        let base = Self::default();
        let positive = |v: f64, d: f64| if v > 0.0 { v } else { d };
        let non_negative = |v: f64, d: f64| if v >= 0.0 { v } else { d };

        let p_idle = positive(overrides.p_idle, base.p_idle);
        let p_max = positive(overrides.p_max, base.p_max).max(p_idle);

        Self {
            p_idle,
            p_max,
            gamma: positive(overrides.gamma, base.gamma),
            e_read: positive(overrides.e_read, base.e_read),
            e_write: positive(overrides.e_write, base.e_write),
            e_mem_refault: non_negative(overrides.e_mem_refault, base.e_mem_refault),
            e_mem_rss: non_negative(overrides.e_mem_rss, base.e_mem_rss),
            alpha: if (0.0..=1.0).contains(&overrides.alpha) {
                overrides.alpha
            } else {
                base.alpha
            },
        }
    }
}
