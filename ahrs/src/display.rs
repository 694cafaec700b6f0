//! Presentation-side shaping of filter output: smoothing, limits and the
//! heading convention a compass card expects.

use libm::{fabsf, fmodf};

use crate::error::ConfigError;
use crate::quaternion::Euler;

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DisplayConfig {
    /// Exponential smoothing factor per frame, `0.0..=1.0`. 1.0 disables smoothing.
    pub smoothing: f32,
    /// Roll and pitch are clamped to ±this many degrees.
    pub max_attitude_deg: f32,
    /// Absolute roll above which `bank_warning` is raised.
    pub bank_warning_deg: f32,
    /// Report heading clockwise from north (`-yaw`) instead of the raw yaw angle.
    pub compass_heading: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            smoothing: 0.12,
            max_attitude_deg: 80.0,
            bank_warning_deg: 20.0,
            compass_heading: true,
        }
    }
}

impl DisplayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.smoothing) {
            return Err(ConfigError::InvalidSmoothing);
        }
        Ok(())
    }
}

/// One frame worth of indicator values, in degrees.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DisplayAttitude {
    pub roll_deg: f32,
    pub pitch_deg: f32,
    /// `[0, 360)`.
    pub heading_deg: f32,
    pub bank_warning: bool,
}

/// First-order low pass, seeded by its first input.
#[derive(Clone, Copy, Debug)]
struct LowPassFilter {
    alpha: f32,
    last_output: f32,
    initialized: bool,
}

impl LowPassFilter {
    fn new(alpha: f32) -> Self {
        Self {
            // NaN would poison every output; fall back to pass-through.
            alpha: if alpha.is_finite() { alpha.clamp(0.0, 1.0) } else { 1.0 },
            last_output: 0.0,
            initialized: false,
        }
    }

    fn filter(&mut self, input: f32) -> f32 {
        if !self.initialized {
            self.last_output = input;
            self.initialized = true;
        } else {
            self.last_output += self.alpha * (input - self.last_output);
        }
        self.last_output
    }

    /// Same as `filter` but steps along the shorter arc of a circle. `wrap`
    /// picks the output range (`wrap_360` or `wrap_180`).
    fn filter_angle(&mut self, input_deg: f32, wrap: fn(f32) -> f32) -> f32 {
        if !self.initialized {
            return self.filter(wrap(input_deg));
        }
        let delta = wrap_180(input_deg - self.last_output);
        self.last_output = wrap(self.last_output + self.alpha * delta);
        self.last_output
    }

    fn reset(&mut self) {
        self.initialized = false;
    }
}

#[derive(Clone, Debug)]
pub struct AttitudeDisplay {
    config: DisplayConfig,
    roll: LowPassFilter,
    pitch: LowPassFilter,
    heading: LowPassFilter,
}

impl Default for AttitudeDisplay {
    fn default() -> Self {
        Self::from_valid(DisplayConfig::default())
    }
}

impl AttitudeDisplay {
    pub fn new(config: DisplayConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_valid(config))
    }

    fn from_valid(config: DisplayConfig) -> Self {
        Self {
            config,
            roll: LowPassFilter::new(config.smoothing),
            pitch: LowPassFilter::new(config.smoothing),
            heading: LowPassFilter::new(config.smoothing),
        }
    }

    pub fn config(&self) -> &DisplayConfig {
        &self.config
    }

    pub fn update(&mut self, euler: Euler) -> DisplayAttitude {
        let limit = self.config.max_attitude_deg;

        // Roll lives on the full circle; inverted flight must not sweep back through level.
        let roll_deg = self.roll.filter_angle(euler.roll_deg(), wrap_180).clamp(-limit, limit);
        let pitch_deg = self.pitch.filter(euler.pitch_deg()).clamp(-limit, limit);

        let yaw_deg = euler.yaw_deg();
        let raw_heading = if self.config.compass_heading { -yaw_deg } else { yaw_deg };
        let heading_deg = self.heading.filter_angle(raw_heading, wrap_360);

        DisplayAttitude {
            roll_deg,
            pitch_deg,
            heading_deg,
            bank_warning: fabsf(roll_deg) > self.config.bank_warning_deg,
        }
    }

    /// Next frame snaps to the input instead of easing toward it.
    pub fn reset(&mut self) {
        self.roll.reset();
        self.pitch.reset();
        self.heading.reset();
    }
}

/// Wrap degrees into `[0, 360)`.
pub fn wrap_360(deg: f32) -> f32 {
    let wrapped = fmodf(deg, 360.0);
    let wrapped = if wrapped < 0.0 { wrapped + 360.0 } else { wrapped };
    // -tiny + 360 rounds to 360
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}

/// Wrap degrees into `[-180, 180)`.
pub fn wrap_180(deg: f32) -> f32 {
    wrap_360(deg + 180.0) - 180.0
}
