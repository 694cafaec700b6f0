/// Shared state types for inter-task communication via Embassy channels.
///
/// All types are `Copy` to minimise overhead when sent through channels.

// ── Data types ────────────────────────────────────────────────────────────────

/// Latest magnetometer reading, microtesla, sensor axes.
#[derive(Clone, Copy, Default, defmt::Format)]
pub struct MagData {
    pub field_ut: [f32; 3],
}

/// Attitude published by fast_loop, read by the telemetry task.
/// Angles are radians with standard signs; display flips happen downstream.
#[derive(Clone, Copy, Default, defmt::Format)]
pub struct AttitudeState {
    pub roll_rad: f32,
    pub pitch_rad: f32,
    pub yaw_rad: f32,
    pub accel_trusted: bool,
    pub mag_used: bool,
    pub stationary: bool,
    pub resets: u32,
    pub dropped: u32,
}
