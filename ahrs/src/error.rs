use thiserror::Error;

/// Rejected configuration value.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    #[error("sample frequency must be finite and positive, got {0}")]
    InvalidSampleFrequency(f32),
    #[error("filter gain must be finite and non-negative, got {0}")]
    InvalidBeta(f32),
    #[error("gate epsilon must be finite and non-negative")]
    InvalidEpsilon,
    #[error("gyro full-scale range must be finite and positive")]
    InvalidGyroRange,
    #[error("accelerometer norm band is empty or non-positive")]
    InvalidAccelBand,
    #[error("dt clamp range is empty or non-positive")]
    InvalidDtRange,
    #[error("calibration window must hold at least one sample")]
    InvalidCalibrationWindow,
    #[error("bias trim constants out of range")]
    InvalidTrim,
    #[error("axis remap must use each axis exactly once")]
    DegenerateRemap,
    #[error("display smoothing factor must be within 0..=1")]
    InvalidSmoothing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalibrationError {
    /// Every sample in the window was missing or non-finite.
    #[error("no valid samples collected during the calibration window")]
    NoSamples,
    #[error("calibration sample contained a non-finite value")]
    NonFiniteSample,
}
