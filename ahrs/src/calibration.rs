//! Sensor bias estimation: a stationary window at startup, then optional
//! slow trimming whenever the device is detected at rest.

use libm::fabsf;

use crate::error::{CalibrationError, ConfigError};
use crate::sample::{Sample, Vector3};

/// Offsets subtracted from raw readings before they reach the filter.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BiasEstimate {
    pub gyro_dps: Vector3,
    /// Gravity already removed from the vertical axis.
    pub accel_g: Vector3,
}

impl BiasEstimate {
    pub const ZERO: Self = Self {
        gyro_dps: [0.0; 3],
        accel_g: [0.0; 3],
    };

    pub fn correct_gyro(&self, raw: Vector3) -> Vector3 {
        sub(raw, self.gyro_dps)
    }

    pub fn correct_accel(&self, raw: Vector3) -> Vector3 {
        sub(raw, self.accel_g)
    }
}

/// Averages a fixed number of samples taken with the device at rest.
#[derive(Clone, Debug)]
pub struct BiasCalibrator {
    window: u32,
    with_accel: bool,
    gyro_sum: [f64; 3],
    accel_sum: [f64; 3],
    gyro_count: u32,
    accel_count: u32,
}

impl BiasCalibrator {
    /// `with_accel` also estimates accelerometer offsets, assuming the board is
    /// level with +Z up during the window.
    pub fn new(window: u32, with_accel: bool) -> Result<Self, ConfigError> {
        if window == 0 {
            return Err(ConfigError::InvalidCalibrationWindow);
        }
        Ok(Self {
            window,
            with_accel,
            gyro_sum: [0.0; 3],
            accel_sum: [0.0; 3],
            gyro_count: 0,
            accel_count: 0,
        })
    }

    /// Accumulate one reading. Returns `Ok(true)` once the window is full.
    ///
    /// A sample with a non-finite gyro axis, or a non-finite accelerometer
    /// axis when accel offsets are being estimated, is not accumulated.
    pub fn add(&mut self, sample: &Sample) -> Result<bool, CalibrationError> {
        if !all_finite(sample.gyro_dps) {
            return Err(CalibrationError::NonFiniteSample);
        }
        let accel = if self.with_accel { sample.accel_g } else { None };
        if let Some(a) = accel {
            if !all_finite(a) {
                return Err(CalibrationError::NonFiniteSample);
            }
        }

        accumulate(&mut self.gyro_sum, sample.gyro_dps);
        self.gyro_count += 1;
        if let Some(a) = accel {
            accumulate(&mut self.accel_sum, a);
            self.accel_count += 1;
        }

        Ok(self.is_ready())
    }

    pub fn is_ready(&self) -> bool {
        self.gyro_count >= self.window
    }

    pub fn sample_count(&self) -> u32 {
        self.gyro_count
    }

    pub fn window(&self) -> u32 {
        self.window
    }

    /// Fraction of the window collected, `0.0..=1.0`.
    pub fn progress(&self) -> f32 {
        (self.gyro_count as f32 / self.window as f32).min(1.0)
    }

    /// Mean of whatever was collected, even if the window is not yet full.
    pub fn finish(&self) -> Result<BiasEstimate, CalibrationError> {
        if self.gyro_count == 0 {
            return Err(CalibrationError::NoSamples);
        }

        let gyro_dps = mean(&self.gyro_sum, self.gyro_count);
        let accel_g = if self.accel_count > 0 {
            let mut a = mean(&self.accel_sum, self.accel_count);
            a[2] -= 1.0;
            a
        } else {
            [0.0; 3]
        };

        Ok(BiasEstimate { gyro_dps, accel_g })
    }
}

/// Stationary detection and gyro bias tracking constants.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TrimConfig {
    /// Allowed relative deviation of the accel norm from 1 g.
    pub accel_tolerance: f32,
    /// Every corrected gyro axis must be below this (deg/s).
    pub gyro_threshold_dps: f32,
    /// Bias tracking time constant (s).
    pub time_constant_s: f32,
    /// Upper bound on the per-sample blend factor.
    pub alpha_max: f32,
}

impl Default for TrimConfig {
    fn default() -> Self {
        Self {
            accel_tolerance: 0.08,
            gyro_threshold_dps: 1.2,
            time_constant_s: 5.0,
            alpha_max: 0.02,
        }
    }
}

impl TrimConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = |v: f32| v.is_finite() && v > 0.0;
        if !positive(self.accel_tolerance)
            || !positive(self.gyro_threshold_dps)
            || !positive(self.time_constant_s)
            || !positive(self.alpha_max)
            || self.alpha_max > 1.0
        {
            return Err(ConfigError::InvalidTrim);
        }
        Ok(())
    }
}

/// Slowly pulls the gyro bias toward the raw reading while at rest.
#[derive(Clone, Copy, Debug, Default)]
pub struct BiasTrimmer {
    config: TrimConfig,
}

impl BiasTrimmer {
    pub fn new(config: TrimConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrimConfig {
        &self.config
    }

    /// `corrected_gyro` is the reading with the current bias removed.
    pub fn is_stationary(&self, corrected_gyro: Vector3, accel_norm: f32) -> bool {
        if !accel_norm.is_finite() || fabsf(accel_norm - 1.0) > self.config.accel_tolerance {
            return false;
        }
        corrected_gyro
            .iter()
            .all(|g| fabsf(*g) < self.config.gyro_threshold_dps)
    }

    /// Blend factor for one step of `dt_s` seconds.
    pub fn alpha(&self, dt_s: f32) -> f32 {
        if !dt_s.is_finite() || dt_s <= 0.0 {
            return 0.0;
        }
        (dt_s / self.config.time_constant_s).clamp(0.0, self.config.alpha_max)
    }

    /// Update `bias` from one raw gyro reading. Returns whether it was applied.
    pub fn trim(&self, bias: &mut BiasEstimate, raw_gyro: Vector3, accel_norm: f32, dt_s: f32) -> bool {
        if !self.is_stationary(bias.correct_gyro(raw_gyro), accel_norm) {
            return false;
        }

        let alpha = self.alpha(dt_s);
        if alpha <= 0.0 {
            return false;
        }
        for (b, raw) in bias.gyro_dps.iter_mut().zip(raw_gyro) {
            *b += alpha * (raw - *b);
        }
        true
    }
}

fn sub(a: Vector3, b: Vector3) -> Vector3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn all_finite(v: Vector3) -> bool {
    v.iter().all(|x| x.is_finite())
}

fn accumulate(sum: &mut [f64; 3], v: Vector3) {
    for (s, x) in sum.iter_mut().zip(v) {
        *s += f64::from(x);
    }
}

fn mean(sum: &[f64; 3], count: u32) -> Vector3 {
    let n = f64::from(count);
    [(sum[0] / n) as f32, (sum[1] / n) as f32, (sum[2] / n) as f32]
}
