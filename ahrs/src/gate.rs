//! Per-sample validity screening ahead of the filter.

use libm::{fabsf, sqrtf};

use crate::error::ConfigError;
use crate::sample::{Sample, Vector3};

/// Plausibility limits for raw sensor data.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GateConfig {
    /// Gyro full-scale (deg/s). Any axis beyond this rejects the sample.
    pub gyro_max_dps: f32,
    /// Accelerometer norm band (g) within which the vector is trusted as gravity.
    pub accel_min_g: f32,
    pub accel_max_g: f32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            gyro_max_dps: 2000.0,
            accel_min_g: 0.8,
            accel_max_g: 1.2,
        }
    }
}

impl GateConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.gyro_max_dps.is_finite() || self.gyro_max_dps <= 0.0 {
            return Err(ConfigError::InvalidGyroRange);
        }
        if !self.accel_min_g.is_finite()
            || !self.accel_max_g.is_finite()
            || self.accel_min_g <= 0.0
            || self.accel_min_g > self.accel_max_g
        {
            return Err(ConfigError::InvalidAccelBand);
        }
        Ok(())
    }
}

/// Why a whole sample was dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RejectReason {
    GyroNonFinite,
    GyroOutOfRange,
}

/// A sample that passed the gate, ready for the filter.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GatedSample {
    pub gyro_dps: Vector3,
    /// Zero vector when the accelerometer is missing or outside the trusted
    /// band, so the filter skips its correction step.
    pub accel_g: Vector3,
    pub accel_trusted: bool,
    /// Norm of the raw accelerometer vector, NaN when absent or non-finite.
    pub accel_norm: f32,
    /// `None` when absent or non-finite.
    pub mag: Option<Vector3>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SampleGate {
    config: GateConfig,
}

impl SampleGate {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn check(&self, sample: &Sample) -> Result<GatedSample, RejectReason> {
        let gyro = sample.gyro_dps;
        if !all_finite(gyro) {
            return Err(RejectReason::GyroNonFinite);
        }
        if gyro.iter().any(|g| fabsf(*g) > self.config.gyro_max_dps) {
            return Err(RejectReason::GyroOutOfRange);
        }

        let accel_norm = match sample.accel_g {
            Some(a) if all_finite(a) => sqrtf(a[0] * a[0] + a[1] * a[1] + a[2] * a[2]),
            _ => f32::NAN,
        };
        // NaN fails both comparisons.
        let accel_trusted = accel_norm >= self.config.accel_min_g && accel_norm <= self.config.accel_max_g;
        let accel_g = match sample.accel_g {
            Some(a) if accel_trusted => a,
            _ => [0.0; 3],
        };

        let mag = sample.mag.filter(|m| all_finite(*m));

        Ok(GatedSample {
            gyro_dps: gyro,
            accel_g,
            accel_trusted,
            accel_norm,
            mag,
        })
    }
}

fn all_finite(v: Vector3) -> bool {
    v.iter().all(|x| x.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> SampleGate {
        SampleGate::new(GateConfig::default())
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(GateConfig::default().validate().is_ok());
        let bad = GateConfig { accel_min_g: 1.3, ..Default::default() };
        assert_eq!(bad.validate(), Err(ConfigError::InvalidAccelBand));
        let bad = GateConfig { gyro_max_dps: 0.0, ..Default::default() };
        assert_eq!(bad.validate(), Err(ConfigError::InvalidGyroRange));
    }

    #[test]
    fn test_clean_sample_passes() {
        let s = Sample::marg([1.0, -2.0, 3.0], [0.0, 0.0, 1.0], [0.2, 0.0, -0.4]);
        let g = gate().check(&s).unwrap();
        assert!(g.accel_trusted);
        assert_eq!(g.accel_g, [0.0, 0.0, 1.0]);
        assert_eq!(g.accel_norm, 1.0);
        assert_eq!(g.mag, Some([0.2, 0.0, -0.4]));
    }

    #[test]
    fn test_non_finite_gyro_rejects_sample() {
        let s = Sample::imu([0.0, f32::NAN, 0.0], [0.0, 0.0, 1.0]);
        assert_eq!(gate().check(&s), Err(RejectReason::GyroNonFinite));
        let s = Sample::imu([f32::NEG_INFINITY, 0.0, 0.0], [0.0, 0.0, 1.0]);
        assert_eq!(gate().check(&s), Err(RejectReason::GyroNonFinite));
    }

    #[test]
    fn test_gyro_beyond_full_scale_rejects_sample() {
        let s = Sample::imu([0.0, 0.0, -2000.5], [0.0, 0.0, 1.0]);
        assert_eq!(gate().check(&s), Err(RejectReason::GyroOutOfRange));

        let s = Sample::imu([0.0, 0.0, 2000.0], [0.0, 0.0, 1.0]);
        assert!(gate().check(&s).is_ok());
    }

    #[test]
    fn test_accel_band_edges() {
        for (norm, trusted) in [(0.79, false), (0.8, true), (1.0, true), (1.2, true), (1.21, false)] {
            let g = gate().check(&Sample::imu([0.0; 3], [0.0, 0.0, norm])).unwrap();
            assert_eq!(g.accel_trusted, trusted, "norm {}", norm);
            if !trusted {
                assert_eq!(g.accel_g, [0.0; 3]);
            }
        }
    }

    #[test]
    fn test_bad_accel_is_substituted_not_rejected() {
        let g = gate().check(&Sample::imu([5.0, 0.0, 0.0], [f32::NAN, 0.0, 1.0])).unwrap();
        assert!(!g.accel_trusted);
        assert!(g.accel_norm.is_nan());
        assert_eq!(g.accel_g, [0.0; 3]);
        assert_eq!(g.gyro_dps, [5.0, 0.0, 0.0]);

        let g = gate().check(&Sample::gyro_only([0.0; 3])).unwrap();
        assert!(!g.accel_trusted);
    }

    #[test]
    fn test_non_finite_mag_is_dropped() {
        let s = Sample::marg([0.0; 3], [0.0, 0.0, 1.0], [0.1, f32::INFINITY, 0.0]);
        assert_eq!(gate().check(&s).unwrap().mag, None);
    }
}
