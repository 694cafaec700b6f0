//! Madgwick gradient-descent orientation filter.
//!
//! One call = one gyro integration step plus, when the reference vectors are
//! usable, one normalized gradient-descent correction toward them. Gyro input
//! is degrees per second; the conversion to radians happens here and nowhere
//! else.
//!
//! Reference: S.O.H. Madgwick, "An efficient orientation filter for inertial
//! and inertial/magnetic sensor arrays", 2010.

use libm::sqrtf;

use crate::error::ConfigError;
use crate::quaternion::{Euler, Quaternion};
use crate::sample::Vector3;

/// Filter construction parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MadgwickConfig {
    /// Nominal update rate (Hz), used until the caller supplies a measured period.
    pub sample_freq: f32,
    /// Gradient-descent gain (rad/s). Higher converges faster and passes more accel noise.
    pub beta: f32,
    /// Accelerometer squared norms at or below this skip the correction step.
    pub accel_epsilon: f32,
    /// Gradient squared norms at or below this skip the feedback step.
    pub gradient_epsilon: f32,
}

impl Default for MadgwickConfig {
    fn default() -> Self {
        Self {
            sample_freq: 100.0,
            beta: 0.1,
            accel_epsilon: 1e-8,
            gradient_epsilon: 1e-12,
        }
    }
}

impl MadgwickConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.sample_freq.is_finite() || self.sample_freq <= 0.0 {
            return Err(ConfigError::InvalidSampleFrequency(self.sample_freq));
        }
        if !self.beta.is_finite() || self.beta < 0.0 {
            return Err(ConfigError::InvalidBeta(self.beta));
        }
        let eps_ok = |e: f32| e.is_finite() && e >= 0.0;
        if !eps_ok(self.accel_epsilon) || !eps_ok(self.gradient_epsilon) {
            return Err(ConfigError::InvalidEpsilon);
        }
        Ok(())
    }
}

/// Why a correction step was skipped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SkipReason {
    /// Accelerometer vector was zero, near zero or not finite.
    AccelRejected,
    /// Gradient vanished (already aligned, or a singular orientation).
    DegenerateGradient,
}

/// Outcome of one filter update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UpdateStatus {
    /// Gyro integrated and the gradient correction applied.
    Corrected,
    /// Gyro integrated, no correction.
    GyroOnly(SkipReason),
    /// The integrated quaternion collapsed; orientation was reset to identity.
    Reset,
}

impl UpdateStatus {
    pub fn correction_applied(&self) -> bool {
        matches!(self, UpdateStatus::Corrected)
    }

    pub fn is_reset(&self) -> bool {
        matches!(self, UpdateStatus::Reset)
    }
}

/// Filter state. Owned by the caller and updated strictly serially.
#[derive(Clone, Debug)]
pub struct Madgwick {
    q: Quaternion,
    beta: f32,
    sample_freq: f32,
    sample_period: f32,
    accel_epsilon: f32,
    gradient_epsilon: f32,
    resets: u32,
}

impl Madgwick {
    /// `sample_freq` must be positive; use [`Madgwick::try_with_config`] for a checked path.
    pub fn new(sample_freq: f32, beta: f32) -> Self {
        Self::with_config(MadgwickConfig {
            sample_freq,
            beta,
            ..MadgwickConfig::default()
        })
    }

    pub fn with_config(config: MadgwickConfig) -> Self {
        Self {
            q: Quaternion::IDENTITY,
            beta: config.beta,
            sample_freq: config.sample_freq,
            sample_period: 1.0 / config.sample_freq,
            accel_epsilon: config.accel_epsilon,
            gradient_epsilon: config.gradient_epsilon,
            resets: 0,
        }
    }

    pub fn try_with_config(config: MadgwickConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::with_config(config))
    }

    pub fn quaternion(&self) -> Quaternion {
        self.q
    }

    pub fn euler(&self) -> Euler {
        self.q.to_euler()
    }

    pub fn beta(&self) -> f32 {
        self.beta
    }

    pub fn set_beta(&mut self, beta: f32) {
        self.beta = beta;
    }

    pub fn sample_freq(&self) -> f32 {
        self.sample_freq
    }

    pub fn sample_period(&self) -> f32 {
        self.sample_period
    }

    /// Use `dt` (seconds) as the integration step from now on.
    ///
    /// Non-finite or non-positive values are ignored and the previous period
    /// is kept; callers clamp measured dt before it gets here.
    pub fn set_sample_period(&mut self, dt: f32) {
        if dt.is_finite() && dt > 0.0 {
            self.sample_period = dt;
            self.sample_freq = 1.0 / dt;
        }
    }

    /// Number of collapse-and-reset events since construction.
    pub fn reset_count(&self) -> u32 {
        self.resets
    }

    /// Start from a known orientation. Returns false, leaving the state
    /// untouched, if `q` cannot be normalized.
    pub fn set_quaternion(&mut self, q: Quaternion) -> bool {
        match q.normalized() {
            Some(q) => {
                self.q = q;
                true
            }
            None => false,
        }
    }

    /// Back to identity orientation. Gain and period are kept.
    pub fn reset(&mut self) {
        self.q = Quaternion::IDENTITY;
    }

    /// 6-DOF update: gyro (deg/s) and accelerometer (g).
    pub fn update_imu(&mut self, gyro_dps: Vector3, accel_g: Vector3) -> UpdateStatus {
        let mut q_dot = self.gyro_derivative(gyro_dps);

        let status = match normalize(accel_g, self.accel_epsilon) {
            None => UpdateStatus::GyroOnly(SkipReason::AccelRejected),
            Some(a) => {
                let step = gravity_gradient(&self.q, a);
                self.apply_feedback(&mut q_dot, step)
            }
        };

        self.integrate(q_dot, status)
    }

    /// 9-DOF update: gyro (deg/s), accelerometer (g) and magnetometer.
    ///
    /// A zero (or non-finite) magnetometer vector makes this exactly
    /// [`Madgwick::update_imu`].
    pub fn update_marg(&mut self, gyro_dps: Vector3, accel_g: Vector3, mag: Vector3) -> UpdateStatus {
        // Keep in sync with `field_usable`.
        let Some(m) = normalize(mag, 0.0) else {
            return self.update_imu(gyro_dps, accel_g);
        };

        let mut q_dot = self.gyro_derivative(gyro_dps);

        let status = match normalize(accel_g, self.accel_epsilon) {
            None => UpdateStatus::GyroOnly(SkipReason::AccelRejected),
            Some(a) => {
                let g = gravity_gradient(&self.q, a);
                let b = field_gradient(&self.q, m);
                let step = [g[0] + b[0], g[1] + b[1], g[2] + b[2], g[3] + b[3]];
                self.apply_feedback(&mut q_dot, step)
            }
        };

        self.integrate(q_dot, status)
    }

    /// `0.5 * q ⊗ (0, ω)` with ω in rad/s.
    fn gyro_derivative(&self, gyro_dps: Vector3) -> Quaternion {
        let omega = Quaternion::from_vector([
            gyro_dps[0].to_radians(),
            gyro_dps[1].to_radians(),
            gyro_dps[2].to_radians(),
        ]);
        self.q * omega * 0.5
    }

    fn apply_feedback(&self, q_dot: &mut Quaternion, step: [f32; 4]) -> UpdateStatus {
        let step_sq = step[0] * step[0] + step[1] * step[1] + step[2] * step[2] + step[3] * step[3];
        if !step_sq.is_finite() || step_sq <= self.gradient_epsilon {
            return UpdateStatus::GyroOnly(SkipReason::DegenerateGradient);
        }

        let gain = self.beta / sqrtf(step_sq);
        *q_dot = *q_dot - Quaternion::new(step[0], step[1], step[2], step[3]) * gain;
        UpdateStatus::Corrected
    }

    fn integrate(&mut self, q_dot: Quaternion, status: UpdateStatus) -> UpdateStatus {
        let q = self.q + q_dot * self.sample_period;
        match q.normalized() {
            Some(q) => {
                self.q = q;
                status
            }
            None => {
                self.q = Quaternion::IDENTITY;
                self.resets = self.resets.saturating_add(1);
                UpdateStatus::Reset
            }
        }
    }
}

/// Unit vector, or `None` when the squared norm is at or below `epsilon` or not finite.
/// Whether `update_marg` will fuse `mag` rather than fall back to the IMU path.
pub(crate) fn field_usable(mag: Vector3) -> bool {
    normalize(mag, 0.0).is_some()
}

fn normalize(v: Vector3, epsilon: f32) -> Option<Vector3> {
    let norm_sq = v[0] * v[0] + v[1] * v[1] + v[2] * v[2];
    if !norm_sq.is_finite() || norm_sq <= epsilon {
        return None;
    }
    let recip_norm = 1.0 / sqrtf(norm_sq);
    Some([v[0] * recip_norm, v[1] * recip_norm, v[2] * recip_norm])
}

/// `Jᵀ·f` for the gravity objective: predicted gravity in the sensor frame
/// minus the measured (unit) accelerometer direction.
fn gravity_gradient(q: &Quaternion, a: Vector3) -> [f32; 4] {
    let (q0, q1, q2, q3) = (q.w, q.x, q.y, q.z);

    let f0 = 2.0 * (q1 * q3 - q0 * q2) - a[0];
    let f1 = 2.0 * (q0 * q1 + q2 * q3) - a[1];
    let f2 = 1.0 - 2.0 * (q1 * q1 + q2 * q2) - a[2];

    [
        -2.0 * q2 * f0 + 2.0 * q1 * f1,
        2.0 * q3 * f0 + 2.0 * q0 * f1 - 4.0 * q1 * f2,
        -2.0 * q0 * f0 + 2.0 * q3 * f1 - 4.0 * q2 * f2,
        2.0 * q1 * f0 + 2.0 * q2 * f1,
    ]
}

/// `Jᵀ·f` for the magnetic objective.
///
/// The Earth-frame reference `(bx, 0, bz)` is solved from the current
/// estimate: rotate the measured direction into the reference frame and fold
/// its horizontal part onto the x axis, which discards the unknown
/// declination.
fn field_gradient(q: &Quaternion, m: Vector3) -> [f32; 4] {
    let (q0, q1, q2, q3) = (q.w, q.x, q.y, q.z);

    let h = q.rotate_vector(m);
    let bx = sqrtf(h[0] * h[0] + h[1] * h[1]);
    let bz = h[2];

    let f0 = 2.0 * bx * (0.5 - q2 * q2 - q3 * q3) + 2.0 * bz * (q1 * q3 - q0 * q2) - m[0];
    let f1 = 2.0 * bx * (q1 * q2 - q0 * q3) + 2.0 * bz * (q0 * q1 + q2 * q3) - m[1];
    let f2 = 2.0 * bx * (q0 * q2 + q1 * q3) + 2.0 * bz * (0.5 - q1 * q1 - q2 * q2) - m[2];

    [
        -2.0 * bz * q2 * f0 + (-2.0 * bx * q3 + 2.0 * bz * q1) * f1 + 2.0 * bx * q2 * f2,
        2.0 * bz * q3 * f0 + (2.0 * bx * q2 + 2.0 * bz * q0) * f1 + (2.0 * bx * q3 - 4.0 * bz * q1) * f2,
        (-4.0 * bx * q2 - 2.0 * bz * q0) * f0
            + (2.0 * bx * q1 + 2.0 * bz * q3) * f1
            + (2.0 * bx * q0 - 4.0 * bz * q2) * f2,
        (-4.0 * bx * q3 + 2.0 * bz * q1) * f0
            + (-2.0 * bx * q0 + 2.0 * bz * q2) * f1
            + 2.0 * bx * q1 * f2,
    ]
}
