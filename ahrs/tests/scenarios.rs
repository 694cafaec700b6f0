//! End-to-end behaviour of the filter and the estimator pipeline.

use core::f32::consts::FRAC_PI_2;

use approx::assert_abs_diff_eq;
use attitude_ahrs::{
    AttitudeEstimator, BiasCalibrator, BiasEstimate, Euler, EstimatorConfig, Madgwick, Quaternion, Sample,
    SkipReason, StepOutcome, UpdateStatus,
};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

const RATE_HZ: f32 = 100.0;
const BETA: f32 = 0.1;
const LEVEL: [f32; 3] = [0.0, 0.0, 1.0];
const NORM_TOLERANCE: f32 = 1e-5;

fn roll_accel(deg: f32) -> [f32; 3] {
    let r = deg.to_radians();
    [0.0, r.sin(), r.cos()]
}

fn assert_unit(q: Quaternion) {
    assert!(q.is_finite(), "non-finite quaternion {:?}", q);
    assert!((q.norm() - 1.0).abs() < NORM_TOLERANCE, "norm drifted: {}", q.norm());
}

#[test]
fn zero_input_holds_identity() {
    let mut imu = Madgwick::new(RATE_HZ, BETA);
    let mut marg = Madgwick::new(RATE_HZ, BETA);

    for _ in 0..10_000 {
        imu.update_imu([0.0; 3], LEVEL);
        marg.update_marg([0.0; 3], LEVEL, [0.0; 3]);
        assert_unit(imu.quaternion());
    }

    assert_eq!(imu.quaternion(), Quaternion::IDENTITY);
    assert_eq!(marg.quaternion(), Quaternion::IDENTITY);
}

#[test]
fn zero_input_levels_a_tilted_start() {
    let mut f = Madgwick::new(RATE_HZ, BETA);
    f.set_quaternion(Quaternion::from_euler(Euler::from_degrees(12.0, -8.0, 0.0)));

    for _ in 0..2000 {
        f.update_imu([0.0; 3], LEVEL);
        assert_unit(f.quaternion());
    }

    let e = f.euler();
    assert_abs_diff_eq!(e.roll_deg(), 0.0, epsilon = 0.5);
    assert_abs_diff_eq!(e.pitch_deg(), 0.0, epsilon = 0.5);
}

#[test]
fn norm_invariant_over_random_sequences() {
    for seed in [1_u64, 7, 42, 0xdead_beef] {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let mut f = Madgwick::new(RATE_HZ, BETA);

        for _ in 0..5000 {
            let gyro: [f32; 3] = [
                rng.random_range(-500.0..500.0),
                rng.random_range(-500.0..500.0),
                rng.random_range(-500.0..500.0),
            ];
            let mut accel: [f32; 3] = [
                rng.random_range(-2.0..2.0),
                rng.random_range(-2.0..2.0),
                rng.random_range(-2.0..2.0),
            ];
            if rng.random_bool(0.05) {
                accel = [0.0; 3];
            }
            if rng.random_bool(0.02) {
                accel[1] = f32::NAN;
            }
            let mag: [f32; 3] = if rng.random_bool(0.2) {
                [0.0; 3]
            } else {
                [
                    rng.random_range(-50.0..50.0),
                    rng.random_range(-50.0..50.0),
                    rng.random_range(-50.0..50.0),
                ]
            };

            f.set_sample_period(rng.random_range(0.001..0.05));
            if rng.random_bool(0.5) {
                f.update_imu(gyro, accel);
            } else {
                f.update_marg(gyro, accel, mag);
            }
            assert_unit(f.quaternion());
        }
    }
}

#[test]
fn gimbal_lock_pitch_is_exact() {
    let mut f = Madgwick::new(RATE_HZ, BETA);
    // 2 * (q0 * q2 - q3 * q1) == 1.0 exactly
    assert!(f.set_quaternion(Quaternion::new(0.5, 0.5, 0.5, -0.5)));

    let e = f.euler();
    assert_eq!(e.pitch, FRAC_PI_2);
    assert_abs_diff_eq!(e.pitch_deg(), 90.0, epsilon = 1e-4);
    assert!(e.roll.is_finite());
    assert!(e.yaw.is_finite());

    // Gravity along -X agrees with the pose, so the gradient vanishes.
    let status = f.update_imu([0.0; 3], [-1.0, 0.0, 0.0]);
    assert_eq!(status, UpdateStatus::GyroOnly(SkipReason::DegenerateGradient));
    assert!(f.euler().is_finite());
    assert_eq!(f.euler().pitch, FRAC_PI_2);
}

#[test]
fn gimbal_lock_under_rotation_stays_finite() {
    let mut f = Madgwick::new(RATE_HZ, 0.0);
    // Pitch up through the pole and beyond.
    for _ in 0..200 {
        f.update_imu([0.0, 90.0, 0.0], [0.0; 3]);
        assert!(f.euler().is_finite());
        assert_unit(f.quaternion());
    }
}

#[test]
fn marg_with_zero_mag_equals_imu() {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
    let mut imu = Madgwick::new(RATE_HZ, BETA);
    let mut marg = Madgwick::new(RATE_HZ, BETA);

    for _ in 0..1000 {
        let gyro: [f32; 3] = [
            rng.random_range(-100.0..100.0),
            rng.random_range(-100.0..100.0),
            rng.random_range(-100.0..100.0),
        ];
        let accel: [f32; 3] = [
            rng.random_range(-0.3..0.3),
            rng.random_range(-0.3..0.3),
            rng.random_range(0.8..1.1),
        ];

        assert_eq!(imu.update_imu(gyro, accel), marg.update_marg(gyro, accel, [0.0; 3]));
        assert_eq!(imu.quaternion(), marg.quaternion());
    }
}

#[test]
fn converges_to_thirty_degree_roll() {
    let mut f = Madgwick::new(RATE_HZ, BETA);
    let accel = roll_accel(30.0);

    for _ in 0..500 {
        f.update_imu([0.0; 3], accel);
    }

    let e = f.euler();
    assert_abs_diff_eq!(e.roll_deg(), 30.0, epsilon = 1.0);
    assert_abs_diff_eq!(e.pitch_deg(), 0.0, epsilon = 1.0);
    assert_abs_diff_eq!(e.yaw_deg(), 0.0, epsilon = 1.0);
}

#[test]
fn nan_accel_never_poisons_state() {
    let mut f = Madgwick::new(RATE_HZ, BETA);
    for _ in 0..500 {
        f.update_imu([0.0; 3], roll_accel(30.0));
    }
    let before = f.quaternion();

    for _ in 0..3 {
        let status = f.update_imu([0.0; 3], [f32::NAN, f32::NAN, f32::NAN]);
        assert_eq!(status, UpdateStatus::GyroOnly(SkipReason::AccelRejected));
        assert_unit(f.quaternion());
    }
    let after = f.quaternion();
    assert_abs_diff_eq!(after.w, before.w, epsilon = 1e-6);
    assert_abs_diff_eq!(after.x, before.x, epsilon = 1e-6);
    assert_abs_diff_eq!(after.y, before.y, epsilon = 1e-6);
    assert_abs_diff_eq!(after.z, before.z, epsilon = 1e-6);
    assert_eq!(f.reset_count(), 0);

    let mut recovered_after = None;
    for tick in 0..500 {
        f.update_imu([0.0; 3], LEVEL);
        assert_unit(f.quaternion());
        if recovered_after.is_none() && f.euler().roll_deg().abs() < 1.0 {
            recovered_after = Some(tick);
        }
    }
    assert!(recovered_after.is_some(), "roll never returned to level");
    assert_abs_diff_eq!(f.euler().roll_deg(), 0.0, epsilon = 1.0);
}

#[test]
fn collapsed_state_resets_and_recovers() {
    let mut f = Madgwick::new(RATE_HZ, BETA);
    assert_eq!(f.update_imu([f32::INFINITY, 0.0, 0.0], LEVEL), UpdateStatus::Reset);
    assert_eq!(f.quaternion(), Quaternion::IDENTITY);

    for _ in 0..500 {
        f.update_imu([0.0; 3], roll_accel(-20.0));
    }
    assert_abs_diff_eq!(f.euler().roll_deg(), -20.0, epsilon = 1.0);
    assert_eq!(f.reset_count(), 1);
}

#[test]
fn bias_round_trip() {
    const WINDOW: u32 = 150;
    let injected = [0.8_f32, -1.3, 0.25];
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(11);

    let stream: Vec<[f32; 3]> = (0..WINDOW)
        .map(|_| {
            [
                injected[0] + rng.random_range(-0.05_f32..0.05),
                injected[1] + rng.random_range(-0.05_f32..0.05),
                injected[2] + rng.random_range(-0.05_f32..0.05),
            ]
        })
        .collect();

    let mut cal = BiasCalibrator::new(WINDOW, true).unwrap();
    for gyro in &stream {
        cal.add(&Sample::imu(*gyro, LEVEL)).unwrap();
    }
    assert!(cal.is_ready());

    let bias = cal.finish().unwrap();
    for axis in 0..3 {
        assert_abs_diff_eq!(bias.gyro_dps[axis], injected[axis], epsilon = 0.01);
        assert_abs_diff_eq!(bias.accel_g[axis], 0.0, epsilon = 1e-6);
    }

    let mut corrected_sum = [0.0_f64; 3];
    for gyro in &stream {
        let c = bias.correct_gyro(*gyro);
        for axis in 0..3 {
            corrected_sum[axis] += f64::from(c[axis]);
        }
    }
    for sum in corrected_sum {
        assert_abs_diff_eq!(sum / f64::from(WINDOW), 0.0, epsilon = 1e-5);
    }
}

#[test]
fn estimator_with_calibrated_bias_holds_heading() {
    let gyro_bias = [0.4, -0.6, 1.0];

    let mut cal = BiasCalibrator::new(150, false).unwrap();
    while !cal.add(&Sample::imu(gyro_bias, LEVEL)).unwrap() {}
    let bias = cal.finish().unwrap();

    let mut est = AttitudeEstimator::new(EstimatorConfig::default(), bias).unwrap();
    let mut dt = None;
    for _ in 0..3000 {
        let report = est.step(&Sample::imu(gyro_bias, LEVEL), dt);
        assert!(matches!(report.outcome, StepOutcome::Updated(_)));
        assert!(report.stationary);
        dt = Some(0.01);
    }

    assert_abs_diff_eq!(est.euler().yaw_deg(), 0.0, epsilon = 0.01);
    assert_eq!(est.reset_count(), 0);
}

#[test]
fn estimator_trim_absorbs_uncalibrated_drift() {
    let drift = [0.0, 0.0, 0.9];
    let mut est = AttitudeEstimator::new(EstimatorConfig::default(), BiasEstimate::ZERO).unwrap();

    for _ in 0..6000 {
        est.step(&Sample::imu(drift, LEVEL), Some(0.01));
    }
    assert_abs_diff_eq!(est.bias().gyro_dps[2], 0.9, epsilon = 0.01);

    let yaw_before = est.euler().yaw_deg();
    for _ in 0..1000 {
        est.step(&Sample::imu(drift, LEVEL), Some(0.01));
    }
    assert_abs_diff_eq!(est.euler().yaw_deg(), yaw_before, epsilon = 0.05);
}

#[test]
fn estimator_drops_and_recovers_from_glitches() {
    let mut est = AttitudeEstimator::new(EstimatorConfig::default(), BiasEstimate::ZERO).unwrap();
    for _ in 0..500 {
        est.step(&Sample::imu([0.0; 3], roll_accel(15.0)), Some(0.01));
    }

    let held = est.quaternion();
    for bad in [[f32::NAN, 0.0, 0.0], [0.0, 9000.0, 0.0], [0.0, 0.0, f32::NEG_INFINITY]] {
        let report = est.step(&Sample::imu(bad, roll_accel(15.0)), Some(0.01));
        assert!(report.is_dropped());
        assert_eq!(est.quaternion(), held);
    }
    assert_eq!(est.dropped_count(), 3);

    est.step(&Sample::imu([0.0; 3], roll_accel(15.0)), Some(0.01));
    assert_abs_diff_eq!(est.euler().roll_deg(), 15.0, epsilon = 1.0);
}
