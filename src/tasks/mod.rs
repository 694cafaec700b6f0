pub mod fast_loop;
pub mod mag_task;
pub mod telemetry_task;
