//! Loop timing helpers.

use crate::error::ConfigError;

/// Bounds applied to every measured loop period before it reaches the filter.
///
/// Keeps scheduler hiccups and debugger halts from producing a single huge
/// integration step, and timer glitches from producing a zero one.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DtClamp {
    pub min_s: f32,
    pub max_s: f32,
}

impl Default for DtClamp {
    fn default() -> Self {
        Self {
            min_s: 0.001,
            max_s: 0.05,
        }
    }
}

impl DtClamp {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.min_s.is_finite() || !self.max_s.is_finite() || self.min_s <= 0.0 || self.min_s > self.max_s {
            return Err(ConfigError::InvalidDtRange);
        }
        Ok(())
    }

    /// NaN maps to `min_s`.
    pub fn apply(&self, dt_s: f32) -> f32 {
        if dt_s.is_nan() {
            return self.min_s;
        }
        dt_s.clamp(self.min_s, self.max_s)
    }
}

/// Measures the period between consecutive ticks from a microsecond clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct DeltaTimer {
    last_us: Option<u64>,
}

impl DeltaTimer {
    pub const fn new() -> Self {
        Self { last_us: None }
    }

    /// Seconds since the previous call, `None` on the first one.
    ///
    /// A clock that steps backwards yields zero rather than wrapping.
    pub fn elapsed(&mut self, now_us: u64) -> Option<f32> {
        let dt = self.last_us.map(|last| now_us.saturating_sub(last) as f32 * 1e-6);
        self.last_us = Some(now_us);
        dt
    }

    pub fn reset(&mut self) {
        self.last_us = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_clamp_bounds() {
        let c = DtClamp::default();
        assert_eq!(c.apply(0.0), 0.001);
        assert_eq!(c.apply(-1.0), 0.001);
        assert_eq!(c.apply(0.01), 0.01);
        assert_eq!(c.apply(0.2), 0.05);
        assert_eq!(c.apply(f32::INFINITY), 0.05);
        assert_eq!(c.apply(f32::NAN), 0.001);
    }

    #[test]
    fn test_clamp_validation() {
        assert!(DtClamp::default().validate().is_ok());
        assert_eq!(DtClamp { min_s: 0.0, max_s: 0.05 }.validate(), Err(ConfigError::InvalidDtRange));
        assert_eq!(DtClamp { min_s: 0.1, max_s: 0.05 }.validate(), Err(ConfigError::InvalidDtRange));
    }

    #[test]
    fn test_timer_first_tick_has_no_period() {
        let mut t = DeltaTimer::new();
        assert_eq!(t.elapsed(5_000), None);
        assert_abs_diff_eq!(t.elapsed(15_000).unwrap(), 0.01, epsilon = 1e-7);
        assert_abs_diff_eq!(t.elapsed(17_500).unwrap(), 0.0025, epsilon = 1e-7);
    }

    #[test]
    fn test_timer_backwards_clock_and_reset() {
        let mut t = DeltaTimer::new();
        t.elapsed(10_000);
        assert_eq!(t.elapsed(9_000), Some(0.0));

        t.reset();
        assert_eq!(t.elapsed(20_000), None);
    }
}
