//! Counter arithmetic shared by the sampling backends and the power model.
//!
//! Kernel counters are monotonic until they are not: a process can be replaced
//! by another one with the same PID, a cgroup can be recreated, and a 64-bit
//! counter can in principle wrap. All of those look like `now < prev` and are
//! reported as "no progress this tick".

/// Denominators with an absolute value at or below this are treated as zero.
pub const DIV_EPSILON: f64 = 1e-12;

/// Returns `now - prev`, or 0 when the counter went backwards.
pub fn delta(now: u64, prev: u64) -> u64 {
    now.saturating_sub(prev)
}

/// Divides `numerator` by `denominator`, returning 0 for near-zero denominators.
pub fn safe_div(numerator: f64, denominator: f64) -> f64 {
    if denominator.abs() > DIV_EPSILON {
        numerator / denominator
    } else {
        0.0
    }
}

/// Clamps `x` to `[0, 1]`. NaN maps to 0.
pub fn clamp01(x: f64) -> f64 {
    if x.is_nan() {
        return 0.0;
    }
    x.clamp(0.0, 1.0)
}

/// `base^exp` evaluated as `exp(exp * ln(base))`, defined as 0 for `base <= 0`.
pub fn pow_guarded(base: f64, exp: f64) -> f64 {
    if base <= 0.0 || base.is_nan() {
        return 0.0;
    }
    (exp * base.ln()).exp()
}

/// Exponential moving average.
///
/// The first input seeds the state verbatim; every later input is blended as
/// `alpha * input + (1 - alpha) * state`.
#[derive(Debug, Clone, Copy)]
pub struct Ema {
    alpha: f64,
    state: Option<f64>,
}

impl Ema {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, state: None }
    }

    /// Feeds one value and returns the smoothed value.
    pub fn next(&mut self, value: f64) -> f64 {
        let next = match self.state {
            None => value,
            Some(prev) => self.alpha * value + (1.0 - self.alpha) * prev,
        };
        self.state = Some(next);
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_normal_increase() {
        assert_eq!(delta(110, 100), 10);
        assert_eq!(delta(100, 100), 0);
    }

    #[test]
    fn test_delta_counter_reset() {
        assert_eq!(delta(99, 100), 0);
        assert_eq!(delta(0, u64::MAX), 0);
    }

    #[test]
    fn test_delta_large_values() {
        let hi = u64::MAX - 5;
        assert_eq!(delta(hi, hi - 5), 5);
    }

    #[test]
    fn test_safe_div() {
        assert!((safe_div(5.0, 2.0) - 2.5).abs() < 1e-12);
        assert!((safe_div(-5.0, 2.0) + 2.5).abs() < 1e-12);
        assert!((safe_div(5.0, -2.0) + 2.5).abs() < 1e-12);
        assert_eq!(safe_div(123.0, 0.0), 0.0);
    }

    #[test]
    fn test_safe_div_epsilon_boundary() {
        assert_eq!(safe_div(1.0, DIV_EPSILON), 0.0);
        assert_eq!(safe_div(1.0, -DIV_EPSILON), 0.0);
        assert_eq!(safe_div(1.0, DIV_EPSILON / 10.0), 0.0);

        let d = DIV_EPSILON * 10.0;
        assert!((safe_div(1.0, d) - 1.0 / d).abs() < 1e-3);
        assert!((safe_div(1.0, -d) + 1.0 / d).abs() < 1e-3);
    }

    #[test]
    fn test_clamp01() {
        assert_eq!(clamp01(-1e9), 0.0);
        assert_eq!(clamp01(0.0), 0.0);
        assert_eq!(clamp01(1.0), 1.0);
        assert_eq!(clamp01(0.123), 0.123);
        assert_eq!(clamp01(42.0), 1.0);
        assert_eq!(clamp01(f64::MAX), 1.0);
    }

    #[test]
    fn test_clamp01_non_finite() {
        assert_eq!(clamp01(f64::NAN), 0.0);
        assert_eq!(clamp01(f64::INFINITY), 1.0);
        assert_eq!(clamp01(f64::NEG_INFINITY), 0.0);
    }

    #[test]
    fn test_pow_guarded() {
        assert_eq!(pow_guarded(0.0, 1.3), 0.0);
        assert_eq!(pow_guarded(-0.5, 1.3), 0.0);
        assert!((pow_guarded(0.5, 1.3) - 0.5f64.powf(1.3)).abs() < 1e-12);
        assert!((pow_guarded(1.0, 1.3) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_ema_first_value_verbatim() {
        let mut ema = Ema::new(0.3);
        assert_eq!(ema.next(42.0), 42.0);
        assert!((ema.next(52.0) - 45.0).abs() < 1e-12);
    }

    #[test]
    fn test_ema_half_sequence() {
        let mut ema = Ema::new(0.5);
        let outputs: Vec<f64> = [10.0, 20.0, 20.0, 40.0]
            .iter()
            .map(|v| ema.next(*v))
            .collect();
        let expected = [10.0, 15.0, 17.5, 28.75];
        for (got, want) in outputs.iter().zip(expected) {
            assert!((got - want).abs() < 1e-12, "got {got}, want {want}");
        }
    }

    #[test]
    fn test_ema_pass_through_and_frozen() {
        let mut pass = Ema::new(1.0);
        let mut frozen = Ema::new(0.0);
        for v in [3.0, 7.0, -2.0, 11.5] {
            assert_eq!(pass.next(v), v);
            assert_eq!(frozen.next(v), 3.0);
        }
    }

    #[test]
    fn test_ema_closed_form_convergence() {
        let alpha = 0.2;
        let target = 50.0;
        let mut ema = Ema::new(alpha);
        ema.next(0.0);

        for n in 1..=25 {
            let got = ema.next(target);
            let want = target * (1.0 - (1.0 - alpha).powi(n));
            assert!((got - want).abs() < 1e-9, "step {n}: got {got}, want {want}");
        }
    }
}
