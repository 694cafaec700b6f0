use attitude_ahrs::{AttitudeEstimator, BiasEstimate, DeltaTimer, EstimatorConfig, Sample, StepOutcome};
use embassy_executor::task;
use embassy_stm32::peripherals::SPI1;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Receiver, Sender};
use embassy_time::{Duration, Instant, Ticker};

use crate::drivers::icm42688::Icm42688;
use crate::state::{AttitudeState, MagData};

/// A magnetometer reading older than this is not fused.
const MAG_STALE: Duration = Duration::from_millis(200);
/// Log one line per this many consecutive IMU read failures.
const IMU_ERROR_LOG_EVERY: u32 = 100;

// ── Calibration and tuning (filled from main after static calib) ──────────────

pub struct FastLoopConfig {
    pub loop_hz: u64,
    pub estimator: EstimatorConfig,
    pub bias: BiasEstimate,
}

// ── Task ─────────────────────────────────────────────────────────────────────

#[task]
pub async fn fast_loop_task(
    mut imu: Icm42688<'static, SPI1>,
    config: FastLoopConfig,
    mag_rx: Receiver<'static, CriticalSectionRawMutex, MagData, 1>,
    attitude_tx: Sender<'static, CriticalSectionRawMutex, AttitudeState, 1>,
) {
    let mut estimator = match AttitudeEstimator::new(config.estimator, config.bias) {
        Ok(e) => e,
        Err(e) => {
            defmt::error!("estimator config rejected: {}", e);
            return;
        }
    };
    defmt::info!("fast loop @ {} Hz, bias {}", config.loop_hz, estimator.bias());

    let mut latest_mag: Option<(MagData, Instant)> = None;
    let mut imu_errors: u32 = 0;

    // ── Timing ────────────────────────────────────────────────────────────────
    let mut ticker = Ticker::every(Duration::from_hz(config.loop_hz));
    let mut dt_timer = DeltaTimer::new();

    loop {
        ticker.next().await;

        // None on the first tick: the estimator uses the nominal period.
        let now = Instant::now();
        let measured_dt = dt_timer.elapsed(now.as_micros());

        // ── A. Read IMU ──────────────────────────────────────────────────────
        let reading = match imu.read().await {
            Ok(v) => {
                imu_errors = 0;
                v
            }
            Err(_) => {
                imu_errors = imu_errors.wrapping_add(1);
                if imu_errors % IMU_ERROR_LOG_EVERY == 1 {
                    defmt::warn!("IMU read failed ({} in a row)", imu_errors);
                }
                continue;
            }
        };

        // ── B. Latest magnetometer, if fresh ─────────────────────────────────
        if let Ok(m) = mag_rx.try_receive() {
            latest_mag = Some((m, now));
        }
        let mag = latest_mag
            .filter(|(_, at)| now - *at <= MAG_STALE)
            .map(|(m, _)| m.field_ut);

        // ── C. Estimator step (bias, gate, dt clamp, filter, trim) ──────────
        let sample = Sample::imu(reading.gyro_dps, reading.accel_g).with_mag(mag);
        let report = estimator.step(&sample, measured_dt);

        match report.outcome {
            StepOutcome::Dropped(reason) => {
                defmt::debug!("sample dropped: {}", reason);
            }
            StepOutcome::Updated(status) if status.is_reset() => {
                defmt::warn!("attitude filter reset to level (total {})", estimator.reset_count());
            }
            StepOutcome::Updated(_) => {}
        }

        // ── D. Publish attitude state for telemetry task ──────────────────────
        let euler = estimator.euler();
        let state = AttitudeState {
            roll_rad: euler.roll,
            pitch_rad: euler.pitch,
            yaw_rad: euler.yaw,
            accel_trusted: report.accel_trusted,
            mag_used: report.mag_used,
            stationary: report.stationary,
            resets: estimator.reset_count(),
            dropped: estimator.dropped_count(),
        };
        // Non-blocking send; telemetry task may miss a frame if it's busy
        let _ = attitude_tx.try_send(state);
    }
}
