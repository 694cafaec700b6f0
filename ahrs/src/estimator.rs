//! Per-tick pipeline: bias subtraction, validity gate, dt clamp, filter
//! update and stationary bias trim.

use crate::calibration::{BiasEstimate, BiasTrimmer, TrimConfig};
use crate::error::ConfigError;
use crate::gate::{GateConfig, RejectReason, SampleGate};
use crate::madgwick::{field_usable, Madgwick, MadgwickConfig, SkipReason, UpdateStatus};
use crate::quaternion::{Euler, Quaternion};
use crate::sample::{AxisRemap, Sample};
use crate::timing::DtClamp;

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EstimatorConfig {
    pub filter: MadgwickConfig,
    pub gate: GateConfig,
    pub dt: DtClamp,
    /// `None` freezes the startup bias.
    pub trim: Option<TrimConfig>,
    /// Applied to magnetometer readings before fusion.
    pub mag_remap: AxisRemap,
    /// When false magnetometer readings are ignored and only the IMU path runs.
    pub use_mag: bool,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            filter: MadgwickConfig::default(),
            gate: GateConfig::default(),
            dt: DtClamp::default(),
            trim: Some(TrimConfig::default()),
            mag_remap: AxisRemap::IDENTITY,
            use_mag: true,
        }
    }
}

impl EstimatorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.filter.validate()?;
        self.gate.validate()?;
        self.dt.validate()?;
        if let Some(trim) = &self.trim {
            trim.validate()?;
        }
        self.mag_remap.validate()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StepOutcome {
    Updated(UpdateStatus),
    /// Sample discarded, orientation held.
    Dropped(RejectReason),
}

/// What happened during one [`AttitudeEstimator::step`].
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StepReport {
    pub outcome: StepOutcome,
    /// Integration period actually used (s), after clamping.
    pub dt_used: f32,
    pub accel_trusted: bool,
    /// The magnetometer contributed to this step's correction.
    pub mag_used: bool,
    pub stationary: bool,
    pub bias_trimmed: bool,
}

impl StepReport {
    pub fn is_reset(&self) -> bool {
        matches!(self.outcome, StepOutcome::Updated(UpdateStatus::Reset))
    }

    pub fn is_dropped(&self) -> bool {
        matches!(self.outcome, StepOutcome::Dropped(_))
    }
}

#[derive(Clone, Debug)]
pub struct AttitudeEstimator {
    filter: Madgwick,
    gate: SampleGate,
    dt_clamp: DtClamp,
    trimmer: Option<BiasTrimmer>,
    bias: BiasEstimate,
    mag_remap: AxisRemap,
    use_mag: bool,
    nominal_dt: f32,
    dropped: u32,
}

impl AttitudeEstimator {
    pub fn new(config: EstimatorConfig, bias: BiasEstimate) -> Result<Self, ConfigError> {
        config.validate()?;

        let filter = Madgwick::with_config(config.filter);
        Ok(Self {
            nominal_dt: filter.sample_period(),
            filter,
            gate: SampleGate::new(config.gate),
            dt_clamp: config.dt,
            trimmer: config.trim.map(BiasTrimmer::new),
            bias,
            mag_remap: config.mag_remap,
            use_mag: config.use_mag,
            dropped: 0,
        })
    }

    /// Feed one raw sample. `measured_dt` is the time since the previous
    /// tick in seconds, `None` on the first tick to use the nominal period.
    pub fn step(&mut self, raw: &Sample, measured_dt: Option<f32>) -> StepReport {
        let dt_used = match measured_dt {
            Some(dt) => self.dt_clamp.apply(dt),
            None => self.nominal_dt,
        };

        let corrected = Sample {
            gyro_dps: self.bias.correct_gyro(raw.gyro_dps),
            accel_g: raw.accel_g.map(|a| self.bias.correct_accel(a)),
            mag: if self.use_mag {
                raw.mag.map(|m| self.mag_remap.apply(m))
            } else {
                None
            },
        };

        let gated = match self.gate.check(&corrected) {
            Ok(g) => g,
            Err(reason) => {
                self.dropped = self.dropped.saturating_add(1);
                return StepReport {
                    outcome: StepOutcome::Dropped(reason),
                    dt_used,
                    accel_trusted: false,
                    mag_used: false,
                    stationary: false,
                    bias_trimmed: false,
                };
            }
        };

        self.filter.set_sample_period(dt_used);
        let status = match gated.mag {
            Some(mag) => self.filter.update_marg(gated.gyro_dps, gated.accel_g, mag),
            None => self.filter.update_imu(gated.gyro_dps, gated.accel_g),
        };
        // Without accel the MARG path runs gyro-only too.
        let mag_used = gated.mag.is_some_and(field_usable)
            && status != UpdateStatus::GyroOnly(SkipReason::AccelRejected);

        let (stationary, bias_trimmed) = match &self.trimmer {
            Some(trimmer) => {
                let stationary = trimmer.is_stationary(gated.gyro_dps, gated.accel_norm);
                let trimmed = stationary && trimmer.trim(&mut self.bias, raw.gyro_dps, gated.accel_norm, dt_used);
                (stationary, trimmed)
            }
            None => (false, false),
        };

        StepReport {
            outcome: StepOutcome::Updated(status),
            dt_used,
            accel_trusted: gated.accel_trusted,
            mag_used,
            stationary,
            bias_trimmed,
        }
    }

    pub fn euler(&self) -> Euler {
        self.filter.euler()
    }

    pub fn quaternion(&self) -> Quaternion {
        self.filter.quaternion()
    }

    pub fn filter(&self) -> &Madgwick {
        &self.filter
    }

    pub fn bias(&self) -> &BiasEstimate {
        &self.bias
    }

    pub fn set_bias(&mut self, bias: BiasEstimate) {
        self.bias = bias;
    }

    pub fn reset_count(&self) -> u32 {
        self.filter.reset_count()
    }

    pub fn dropped_count(&self) -> u32 {
        self.dropped
    }

    pub fn reset(&mut self) {
        self.filter.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const LEVEL: [f32; 3] = [0.0, 0.0, 1.0];

    fn estimator() -> AttitudeEstimator {
        AttitudeEstimator::new(EstimatorConfig::default(), BiasEstimate::ZERO).unwrap()
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = EstimatorConfig {
            dt: DtClamp { min_s: 0.1, max_s: 0.01 },
            ..Default::default()
        };
        assert_eq!(
            AttitudeEstimator::new(config, BiasEstimate::ZERO).unwrap_err(),
            ConfigError::InvalidDtRange
        );

        let config = EstimatorConfig {
            mag_remap: AxisRemap::new(crate::sample::Axis::Y, crate::sample::Axis::Y, crate::sample::Axis::Z),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_first_tick_uses_nominal_period() {
        let mut est = estimator();
        let report = est.step(&Sample::imu([0.0; 3], LEVEL), None);
        assert_abs_diff_eq!(report.dt_used, 0.01, epsilon = 1e-7);
    }

    #[test]
    fn test_measured_dt_is_clamped() {
        let mut est = estimator();
        assert_eq!(est.step(&Sample::imu([0.0; 3], LEVEL), Some(2.0)).dt_used, 0.05);
        assert_eq!(est.step(&Sample::imu([0.0; 3], LEVEL), Some(0.0)).dt_used, 0.001);
        assert_eq!(est.step(&Sample::imu([0.0; 3], LEVEL), Some(f32::NAN)).dt_used, 0.001);
        assert_abs_diff_eq!(est.filter().sample_period(), 0.001, epsilon = 1e-9);
    }

    #[test]
    fn test_bad_gyro_holds_orientation() {
        let mut est = estimator();
        est.step(&Sample::imu([30.0, 0.0, 0.0], [0.0; 3]), None);
        let held = est.quaternion();

        let report = est.step(&Sample::imu([f32::NAN, 0.0, 0.0], LEVEL), Some(0.01));
        assert_eq!(report.outcome, StepOutcome::Dropped(RejectReason::GyroNonFinite));
        assert!(report.is_dropped());
        assert_eq!(est.quaternion(), held);

        let report = est.step(&Sample::imu([0.0, 2500.0, 0.0], LEVEL), Some(0.01));
        assert_eq!(report.outcome, StepOutcome::Dropped(RejectReason::GyroOutOfRange));
        assert_eq!(est.quaternion(), held);
        assert_eq!(est.dropped_count(), 2);
        assert_eq!(est.reset_count(), 0);
    }

    #[test]
    fn test_out_of_band_accel_runs_gyro_only() {
        let mut est = estimator();
        let report = est.step(&Sample::imu([0.0, 0.0, 10.0], [0.0, 0.5, 1.8]), Some(0.01));
        assert_eq!(
            report.outcome,
            StepOutcome::Updated(UpdateStatus::GyroOnly(SkipReason::AccelRejected))
        );
        assert!(!report.accel_trusted);
        assert_abs_diff_eq!(est.euler().yaw_deg(), 0.1, epsilon = 1e-3);
    }

    #[test]
    fn test_bias_is_subtracted_before_filter() {
        let bias = BiasEstimate {
            gyro_dps: [0.0, 0.0, 5.0],
            accel_g: [0.0; 3],
        };
        let config = EstimatorConfig { trim: None, ..Default::default() };
        let mut est = AttitudeEstimator::new(config, bias).unwrap();

        for _ in 0..100 {
            est.step(&Sample::imu([0.0, 0.0, 5.0], LEVEL), Some(0.01));
        }
        assert_abs_diff_eq!(est.euler().yaw_deg(), 0.0, epsilon = 1e-4);
        assert_eq!(est.bias(), &bias);
    }

    #[test]
    fn test_trim_runs_only_when_stationary() {
        let mut est = estimator();

        let report = est.step(&Sample::imu([0.5, 0.0, 0.0], LEVEL), Some(0.01));
        assert!(report.stationary);
        assert!(report.bias_trimmed);
        assert_abs_diff_eq!(est.bias().gyro_dps[0], 0.001, epsilon = 1e-6);

        let report = est.step(&Sample::imu([40.0, 0.0, 0.0], LEVEL), Some(0.01));
        assert!(!report.stationary);
        assert!(!report.bias_trimmed);
        assert_abs_diff_eq!(est.bias().gyro_dps[0], 0.001, epsilon = 1e-6);
    }

    #[test]
    fn test_mag_disabled_matches_imu() {
        let config = EstimatorConfig { use_mag: false, trim: None, ..Default::default() };
        let mut with_mag_ignored = AttitudeEstimator::new(config, BiasEstimate::ZERO).unwrap();
        let mut imu_only = AttitudeEstimator::new(config, BiasEstimate::ZERO).unwrap();

        for _ in 0..50 {
            let accel = [0.1, 0.2, 0.97];
            with_mag_ignored.step(&Sample::marg([1.0, 2.0, 3.0], accel, [0.3, -0.2, -0.9]), Some(0.01));
            imu_only.step(&Sample::imu([1.0, 2.0, 3.0], accel), Some(0.01));
        }
        assert_eq!(with_mag_ignored.quaternion(), imu_only.quaternion());
    }

    #[test]
    fn test_mag_remap_is_applied() {
        let swapped = EstimatorConfig {
            mag_remap: AxisRemap::SWAP_XY,
            trim: None,
            ..Default::default()
        };
        let plain = EstimatorConfig { trim: None, ..Default::default() };
        let mut a = AttitudeEstimator::new(swapped, BiasEstimate::ZERO).unwrap();
        let mut b = AttitudeEstimator::new(plain, BiasEstimate::ZERO).unwrap();

        for _ in 0..50 {
            a.step(&Sample::marg([0.0; 3], LEVEL, [0.1, 0.5, -0.8]), Some(0.01));
            b.step(&Sample::marg([0.0; 3], LEVEL, [0.5, 0.1, -0.8]), Some(0.01));
        }
        assert_eq!(a.quaternion(), b.quaternion());
    }

    #[test]
    fn test_mag_used_only_when_fused() {
        let mut est = estimator();
        let mag = [0.3, 0.0, -0.9];

        assert!(est.step(&Sample::marg([0.0; 3], LEVEL, mag), Some(0.01)).mag_used);
        assert!(!est.step(&Sample::imu([0.0; 3], LEVEL), Some(0.01)).mag_used);
        // Zero field falls back to the IMU path.
        assert!(!est.step(&Sample::marg([0.0; 3], LEVEL, [0.0; 3]), Some(0.01)).mag_used);
        // Dropped by the gate.
        assert!(!est.step(&Sample::marg([0.0; 3], LEVEL, [f32::NAN, 0.0, 0.0]), Some(0.01)).mag_used);
        // Accel out of band leaves nothing to pair the field with.
        assert!(!est.step(&Sample::marg([0.0; 3], [0.0, 0.0, 1.5], mag), Some(0.01)).mag_used);

        let config = EstimatorConfig { use_mag: false, ..Default::default() };
        let mut est = AttitudeEstimator::new(config, BiasEstimate::ZERO).unwrap();
        assert!(!est.step(&Sample::marg([0.0; 3], LEVEL, mag), Some(0.01)).mag_used);
    }
}
