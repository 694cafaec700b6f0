use core::f32::consts::FRAC_PI_2;
use core::ops::{Add, Mul, Sub};

use libm::{asinf, atan2f, copysignf, cosf, fabsf, sinf, sqrtf};

/// Orientation quaternion, scalar first: `w + xi + yj + zk`.
///
/// Rotates vectors from the device frame into the reference frame.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Quaternion {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Quaternion {
    pub const IDENTITY: Self = Self::new(1.0, 0.0, 0.0, 0.0);

    pub const fn new(w: f32, x: f32, y: f32, z: f32) -> Self {
        Self { w, x, y, z }
    }

    /// Pure quaternion `(0, v)`.
    pub const fn from_vector(v: [f32; 3]) -> Self {
        Self::new(0.0, v[0], v[1], v[2])
    }

    /// Build the orientation for the given roll/pitch/yaw (radians).
    pub fn from_euler(angles: Euler) -> Self {
        let (sr, cr) = (sinf(angles.roll * 0.5), cosf(angles.roll * 0.5));
        let (sp, cp) = (sinf(angles.pitch * 0.5), cosf(angles.pitch * 0.5));
        let (sy, cy) = (sinf(angles.yaw * 0.5), cosf(angles.yaw * 0.5));

        Self {
            w: cr * cp * cy + sr * sp * sy,
            x: sr * cp * cy - cr * sp * sy,
            y: cr * sp * cy + sr * cp * sy,
            z: cr * cp * sy - sr * sp * cy,
        }
    }

    pub fn norm_squared(&self) -> f32 {
        self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z
    }

    pub fn norm(&self) -> f32 {
        sqrtf(self.norm_squared())
    }

    pub fn is_finite(&self) -> bool {
        self.w.is_finite() && self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Unit-length copy, or `None` when the norm is zero, subnormal or not finite.
    pub fn normalized(&self) -> Option<Self> {
        let norm_sq = self.norm_squared();
        if !norm_sq.is_finite() || norm_sq < f32::MIN_POSITIVE {
            return None;
        }
        let recip_norm = 1.0 / sqrtf(norm_sq);
        Some(*self * recip_norm)
    }

    pub fn conjugate(&self) -> Self {
        Self::new(self.w, -self.x, -self.y, -self.z)
    }

    /// Rotate `v` from the device frame into the reference frame.
    pub fn rotate_vector(&self, v: [f32; 3]) -> [f32; 3] {
        let (q0, q1, q2, q3) = (self.w, self.x, self.y, self.z);
        let (q0q0, q1q1, q2q2, q3q3) = (q0 * q0, q1 * q1, q2 * q2, q3 * q3);
        let [x, y, z] = v;

        [
            x * (q0q0 + q1q1 - q2q2 - q3q3)
                + y * (2.0 * (q1 * q2 - q0 * q3))
                + z * (2.0 * (q1 * q3 + q0 * q2)),
            x * (2.0 * (q1 * q2 + q0 * q3))
                + y * (q0q0 - q1q1 + q2q2 - q3q3)
                + z * (2.0 * (q2 * q3 - q0 * q1)),
            x * (2.0 * (q1 * q3 - q0 * q2))
                + y * (2.0 * (q2 * q3 + q0 * q1))
                + z * (q0q0 - q1q1 - q2q2 + q3q3),
        ]
    }

    /// Roll/pitch/yaw in radians.
    ///
    /// At the poles the pitch argument can reach or exceed ±1 through
    /// rounding; pitch is then pinned to exactly ±π/2 instead of feeding
    /// `asin` an out-of-domain value.
    pub fn to_euler(&self) -> Euler {
        let (q0, q1, q2, q3) = (self.w, self.x, self.y, self.z);

        // Roll (x-axis rotation)
        let sinr_cosp = 2.0 * (q0 * q1 + q2 * q3);
        let cosr_cosp = 1.0 - 2.0 * (q1 * q1 + q2 * q2);
        let roll = atan2f(sinr_cosp, cosr_cosp);

        // Pitch (y-axis rotation)
        let sinp = 2.0 * (q0 * q2 - q3 * q1);
        let pitch = if fabsf(sinp) >= 1.0 {
            copysignf(FRAC_PI_2, sinp)
        } else {
            asinf(sinp)
        };

        // Yaw (z-axis rotation)
        let siny_cosp = 2.0 * (q0 * q3 + q1 * q2);
        let cosy_cosp = 1.0 - 2.0 * (q2 * q2 + q3 * q3);
        let yaw = atan2f(siny_cosp, cosy_cosp);

        Euler { roll, pitch, yaw }
    }
}

/// Hamilton product.
impl Mul for Quaternion {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        let (a0, a1, a2, a3) = (self.w, self.x, self.y, self.z);
        let (b0, b1, b2, b3) = (rhs.w, rhs.x, rhs.y, rhs.z);
        Self {
            w: a0 * b0 - a1 * b1 - a2 * b2 - a3 * b3,
            x: a0 * b1 + a1 * b0 + a2 * b3 - a3 * b2,
            y: a0 * b2 - a1 * b3 + a2 * b0 + a3 * b1,
            z: a0 * b3 + a1 * b2 - a2 * b1 + a3 * b0,
        }
    }
}

impl Mul<f32> for Quaternion {
    type Output = Self;

    fn mul(self, k: f32) -> Self {
        Self::new(self.w * k, self.x * k, self.y * k, self.z * k)
    }
}

impl Add for Quaternion {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.w + rhs.w, self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Quaternion {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.w - rhs.w, self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

/// Roll, pitch and yaw. Radians unless a `*_deg` accessor says otherwise.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Euler {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
}

impl Euler {
    pub const fn new(roll: f32, pitch: f32, yaw: f32) -> Self {
        Self { roll, pitch, yaw }
    }

    pub fn from_degrees(roll: f32, pitch: f32, yaw: f32) -> Self {
        Self::new(roll.to_radians(), pitch.to_radians(), yaw.to_radians())
    }

    pub fn roll_deg(&self) -> f32 {
        self.roll.to_degrees()
    }

    pub fn pitch_deg(&self) -> f32 {
        self.pitch.to_degrees()
    }

    pub fn yaw_deg(&self) -> f32 {
        self.yaw.to_degrees()
    }

    pub fn is_finite(&self) -> bool {
        self.roll.is_finite() && self.pitch.is_finite() && self.yaw.is_finite()
    }
}
