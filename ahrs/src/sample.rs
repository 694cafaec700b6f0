use crate::error::ConfigError;

/// Device-frame X/Y/Z triple.
pub type Vector3 = [f32; 3];

/// One sensor reading, consumed within a single filter update.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Sample {
    /// Angular rate, degrees per second.
    pub gyro_dps: Vector3,
    /// Specific force, g.
    pub accel_g: Option<Vector3>,
    /// Magnetic field, any consistent unit.
    pub mag: Option<Vector3>,
}

impl Sample {
    pub const fn gyro_only(gyro_dps: Vector3) -> Self {
        Self {
            gyro_dps,
            accel_g: None,
            mag: None,
        }
    }

    pub const fn imu(gyro_dps: Vector3, accel_g: Vector3) -> Self {
        Self {
            gyro_dps,
            accel_g: Some(accel_g),
            mag: None,
        }
    }

    pub const fn marg(gyro_dps: Vector3, accel_g: Vector3, mag: Vector3) -> Self {
        Self {
            gyro_dps,
            accel_g: Some(accel_g),
            mag: Some(mag),
        }
    }

    pub fn with_mag(mut self, mag: Option<Vector3>) -> Self {
        self.mag = mag;
        self
    }
}

/// Source axis for one output axis of an [`AxisRemap`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Axis {
    X,
    Y,
    Z,
    NegX,
    NegY,
    NegZ,
}

impl Axis {
    fn index(self) -> usize {
        match self {
            Axis::X | Axis::NegX => 0,
            Axis::Y | Axis::NegY => 1,
            Axis::Z | Axis::NegZ => 2,
        }
    }

    fn pick(self, v: Vector3) -> f32 {
        let value = v[self.index()];
        match self {
            Axis::X | Axis::Y | Axis::Z => value,
            Axis::NegX | Axis::NegY | Axis::NegZ => -value,
        }
    }
}

/// Maps a sensor's axes onto the accel/gyro frame.
///
/// Used for magnetometers mounted rotated relative to the IMU die.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AxisRemap([Axis; 3]);

impl Default for AxisRemap {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl AxisRemap {
    pub const IDENTITY: Self = Self([Axis::X, Axis::Y, Axis::Z]);
    pub const SWAP_XY: Self = Self([Axis::Y, Axis::X, Axis::Z]);

    pub const fn new(x: Axis, y: Axis, z: Axis) -> Self {
        Self([x, y, z])
    }

    pub fn apply(&self, v: Vector3) -> Vector3 {
        [self.0[0].pick(v), self.0[1].pick(v), self.0[2].pick(v)]
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut used = [false; 3];
        for axis in self.0 {
            let i = axis.index();
            if used[i] {
                return Err(ConfigError::DegenerateRemap);
            }
            used[i] = true;
        }
        Ok(())
    }
}
