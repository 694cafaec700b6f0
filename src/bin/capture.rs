#![no_std]
#![no_main]

//! # Raw sample capture
//!
//! Streams bias-corrected IMU and magnetometer samples over USB CDC-ACM as CSV
//! so the gate and trim thresholds can be tuned offline against real data.
//! Each line also carries the running gyro bias and what the sample gate
//! would have done with the sample.
//!
//! ## Usage
//! ```sh
//! cargo flash --release --bin capture --chip STM32F405RG
//! cat /dev/ttyACM0 > capture.csv
//! ```
//!
//! ## CSV format
//! `ts_ms,gx_dps,gy_dps,gz_dps,ax_g,ay_g,az_g,mx_ut,my_ut,mz_ut,accel_norm_g,verdict,stationary,bgx,bgy,bgz`
//!
//! `verdict` is one of `ok`, `accel_untrusted`, `gyro_non_finite`, `gyro_out_of_range`.

#[path = "../board.rs"]
mod board;
#[path = "../usb.rs"]
mod usb;
#[path = "../drivers/mod.rs"]
mod drivers;

use core::fmt::Write;
use core::sync::atomic::{AtomicU32, Ordering};

use attitude_ahrs::{
    BiasCalibrator, BiasEstimate, BiasTrimmer, GateConfig, RejectReason, Sample, SampleGate, TrimConfig,
};
use embassy_executor::Spawner;
use embassy_futures::select::{select, Either};
use embassy_stm32::dma::NoDma;
use embassy_stm32::gpio::{Level, Output, Pin, Speed};
use embassy_stm32::i2c::I2c;
use embassy_stm32::spi::{Config as SpiConfig, Spi};
use embassy_stm32::time::Hertz as TimeHertz;
use embassy_stm32::{bind_interrupts, peripherals};
use embassy_time::{Duration, Instant, Ticker, Timer};
use {defmt_rtt as _, panic_probe as _};

use crate::board::Board;
use crate::drivers::hmc5883::{Hmc5883, MagGain};
use crate::drivers::icm42688::{AccelRange, GyroRange, Icm42688};

// ── Parameters ────────────────────────────────────────────────────────────────

/// 10 minutes
const CAPTURE_DURATION_MS: u64 = 600_000;
/// Same rate as the fusion loop so the data matches what the filter sees
const IMU_RATE_HZ: u64 = 100;
const MAG_RATE_HZ: u64 = 50;
/// Startup bias window (1.5 s at the IMU rate)
const CALIB_SAMPLES: u32 = 150;
/// Give up waiting for a terminal after this long and stream anyway
const USB_WAIT: Duration = Duration::from_secs(30);

const GYRO_RANGE: GyroRange = GyroRange::Dps2000;

// ── Shared magnetometer reading (f32 bits, written by mag_task) ───────────────
static MAG_X: AtomicU32 = AtomicU32::new(0);
static MAG_Y: AtomicU32 = AtomicU32::new(0);
static MAG_Z: AtomicU32 = AtomicU32::new(0);

// ── Interrupts ────────────────────────────────────────────────────────────────
bind_interrupts!(struct Irqs {
    I2C1_EV => embassy_stm32::i2c::EventInterruptHandler<peripherals::I2C1>;
    I2C1_ER => embassy_stm32::i2c::ErrorInterruptHandler<peripherals::I2C1>;
});

// ── Magnetometer task (I2C) ───────────────────────────────────────────────────
#[embassy_executor::task]
async fn mag_task(mut i2c: I2c<'static, peripherals::I2C1, peripherals::DMA1_CH7, peripherals::DMA1_CH0>) {
    let mut mag = Hmc5883::new(MagGain::Ga1_3);
    if let Err(e) = mag.init(&mut i2c).await {
        defmt::warn!("HMC5883 init failed: {}", e);
        return;
    }

    let mut ticker = Ticker::every(Duration::from_hz(MAG_RATE_HZ));
    loop {
        ticker.next().await;
        if let Ok(m) = mag.read_ut(&mut i2c).await {
            MAG_X.store(m[0].to_bits(), Ordering::Relaxed);
            MAG_Y.store(m[1].to_bits(), Ordering::Relaxed);
            MAG_Z.store(m[2].to_bits(), Ordering::Relaxed);
        }
    }
}

fn latest_mag() -> [f32; 3] {
    [
        f32::from_bits(MAG_X.load(Ordering::Relaxed)),
        f32::from_bits(MAG_Y.load(Ordering::Relaxed)),
        f32::from_bits(MAG_Z.load(Ordering::Relaxed)),
    ]
}

fn gate_verdict(gate: &SampleGate, sample: &Sample) -> (&'static str, f32) {
    match gate.check(sample) {
        Ok(g) if g.accel_trusted => ("ok", g.accel_norm),
        Ok(g) => ("accel_untrusted", g.accel_norm),
        Err(RejectReason::GyroNonFinite) => ("gyro_non_finite", f32::NAN),
        Err(RejectReason::GyroOutOfRange) => ("gyro_out_of_range", f32::NAN),
    }
}

// ── Main ──────────────────────────────────────────────────────────────────────
#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let board = Board::init();
    let p = board.p;

    // USB CDC
    let (usb_dev, mut usb_serial) = usb::init(p.USB_OTG_FS, p.PA12, p.PA11);
    spawner.spawn(usb::usb_task(usb_dev)).unwrap();

    // LED (PC13)
    let mut led = Output::new(p.PC13, Level::High, Speed::Low);

    // I2C1 @ 400 kHz → HMC5883
    let i2c = I2c::new(
        p.I2C1, p.PB8, p.PB9, Irqs,
        p.DMA1_CH7, p.DMA1_CH0,
        TimeHertz(400_000), Default::default(),
    );

    // SPI1 @ 10 MHz → ICM-42688
    let mut spi_cfg = SpiConfig::default();
    spi_cfg.frequency = TimeHertz(10_000_000);
    let spi = Spi::new(p.SPI1, p.PA5, p.PA7, p.PA6, NoDma, NoDma, spi_cfg);
    let cs = Output::new(p.PB12.degrade(), Level::High, Speed::VeryHigh);
    let mut imu = Icm42688::new(spi, cs, GYRO_RANGE, AccelRange::G4);

    Timer::after(Duration::from_millis(200)).await;
    if imu.init().await.is_err() {
        defmt::error!("IMU init failed");
    }

    spawner.spawn(mag_task(i2c)).unwrap();

    // ── Wait for a terminal ───────────────────────────────────────────────────
    led.set_low();
    match select(usb_serial.wait_connection(), Timer::after(USB_WAIT)).await {
        Either::First(_) => defmt::info!("USB host connected"),
        Either::Second(_) => defmt::warn!("no USB host, capturing anyway"),
    }
    led.set_high();

    let gate = SampleGate::new(GateConfig {
        gyro_max_dps: GYRO_RANGE.full_scale_dps(),
        ..GateConfig::default()
    });
    let trimmer = BiasTrimmer::new(TrimConfig::default());

    let hdr = b"# IMU: ICM-42688 @100Hz | Mag: HMC5883 @50Hz | bias-corrected physical units\r\n\
                # ts_ms,gx_dps,gy_dps,gz_dps,ax_g,ay_g,az_g,mx_ut,my_ut,mz_ut,\
                accel_norm_g,verdict,stationary,bgx,bgy,bgz\r\n";
    usb::write_chunked(&mut usb_serial, hdr).await;

    // ── Acquisition loop ──────────────────────────────────────────────────────
    let start = Instant::now();
    let mut ticker = Ticker::every(Duration::from_hz(IMU_RATE_HZ));
    let dt = 1.0 / IMU_RATE_HZ as f32;
    let mut calibrator = BiasCalibrator::new(CALIB_SAMPLES, false).ok();
    let mut bias = BiasEstimate::ZERO;
    let mut n: u64 = 0;
    let mut errs: u32 = 0;

    loop {
        ticker.next().await;

        let elapsed_ms = start.elapsed().as_millis();
        if elapsed_ms >= CAPTURE_DURATION_MS {
            break;
        }

        let reading = match imu.read().await {
            Ok(v) => v,
            Err(_) => {
                errs += 1;
                continue;
            }
        };
        let raw = Sample::marg(reading.gyro_dps, reading.accel_g, latest_mag());

        // Startup bias first, then trim while at rest.
        if let Some(cal) = calibrator.as_mut() {
            if let Ok(true) = cal.add(&raw) {
                bias = cal.finish().unwrap_or(BiasEstimate::ZERO);
                defmt::info!("startup bias {} dps", bias.gyro_dps);
                calibrator = None;
            }
        }

        let corrected = Sample {
            gyro_dps: bias.correct_gyro(raw.gyro_dps),
            ..raw
        };
        let (verdict, accel_norm) = gate_verdict(&gate, &corrected);
        let stationary = calibrator.is_none() && trimmer.trim(&mut bias, raw.gyro_dps, accel_norm, dt);

        let g = corrected.gyro_dps;
        let a = reading.accel_g;
        let m = raw.mag.unwrap_or([0.0; 3]);
        let mut line = heapless::String::<192>::new();
        let _ = write!(line,
            "{},{:.3},{:.3},{:.3},{:.4},{:.4},{:.4},{:.2},{:.2},{:.2},{:.4},{},{},{:.4},{:.4},{:.4}\r\n",
            elapsed_ms,
            g[0], g[1], g[2],
            a[0], a[1], a[2],
            m[0], m[1], m[2],
            accel_norm, verdict, stationary as u8,
            bias.gyro_dps[0], bias.gyro_dps[1], bias.gyro_dps[2],
        );

        if usb_serial.dtr() {
            usb::write_chunked(&mut usb_serial, line.as_bytes()).await;
        }

        n += 1;
        if n % IMU_RATE_HZ == 0 {
            led.toggle();
        }
    }

    // ── Done ──────────────────────────────────────────────────────────────────
    let mut footer = heapless::String::<96>::new();
    let _ = write!(footer,
        "# done: {}s | {} samples | {} IMU errors\r\n",
        start.elapsed().as_millis() / 1000, n, errs
    );
    if usb_serial.dtr() {
        usb::write_chunked(&mut usb_serial, footer.as_bytes()).await;
    }

    // Fast blink → session finished
    loop {
        led.toggle();
        Timer::after(Duration::from_millis(50)).await;
    }
}
