//! Attitude estimation core for the instrument cluster.
//!
//! Everything in here is plain fixed-size arithmetic: no allocation, no
//! statics, no I/O. The firmware owns one [`AttitudeEstimator`] inside its
//! fast loop and feeds it one sensor sample per tick.
//!
//! # Units
//!
//! - angular rate: degrees per second at every public boundary; the filter
//!   converts to radians per second internally
//! - specific force: g
//! - magnetic field: any consistent unit, only the direction is used
//! - angles returned by [`Euler`]: radians, aerospace (roll about X, pitch
//!   about Y, yaw about Z) with mathematically standard signs

#![cfg_attr(not(test), no_std)]

pub mod calibration;
pub mod display;
pub mod error;
pub mod estimator;
pub mod gate;
pub mod madgwick;
pub mod quaternion;
pub mod sample;
pub mod timing;

pub use calibration::{BiasCalibrator, BiasEstimate, BiasTrimmer, TrimConfig};
pub use display::{AttitudeDisplay, DisplayAttitude, DisplayConfig};
pub use error::{CalibrationError, ConfigError};
pub use estimator::{AttitudeEstimator, EstimatorConfig, StepOutcome, StepReport};
pub use gate::{GateConfig, GatedSample, RejectReason, SampleGate};
pub use madgwick::{Madgwick, MadgwickConfig, SkipReason, UpdateStatus};
pub use quaternion::{Euler, Quaternion};
pub use sample::{Axis, AxisRemap, Sample, Vector3};
pub use timing::{DeltaTimer, DtClamp};
