#![no_std]
#![no_main]

mod board;
mod drivers;
mod state;
mod tasks;
mod usb;

use attitude_ahrs::{
    AxisRemap, BiasCalibrator, BiasEstimate, DtClamp, EstimatorConfig, GateConfig, MadgwickConfig, Sample,
    TrimConfig,
};
use embassy_executor::Spawner;
use embassy_stm32::dma::NoDma;
use embassy_stm32::gpio::{Level, Output, Pin, Speed};
use embassy_stm32::i2c::I2c;
use embassy_stm32::spi::{Config as SpiConfig, Spi};
use embassy_stm32::time::Hertz as TimeHertz;
use embassy_stm32::{bind_interrupts, peripherals};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, Timer};
use {defmt_rtt as _, panic_probe as _};

use crate::board::Board;
use crate::drivers::icm42688::{AccelRange, GyroRange, Icm42688, WHO_AM_I_VALUE};
use crate::state::{AttitudeState, MagData};
use crate::tasks::fast_loop::{fast_loop_task, FastLoopConfig};

// ── Tuning ────────────────────────────────────────────────────────────────────

/// Fusion rate (Hz)
const LOOP_HZ: u64 = 100;
/// Filter gain with the magnetometer in the loop
const MARG_BETA: f32 = 0.15;
/// Fuse the magnetometer; false runs the 6-axis filter only
const USE_MAG: bool = true;
/// HMC5883 is mounted with X and Y swapped relative to the IMU die
const MAG_REMAP: AxisRemap = AxisRemap::SWAP_XY;

const GYRO_RANGE: GyroRange = GyroRange::Dps2000;
const ACCEL_RANGE: AccelRange = AccelRange::G4;

/// Static calibration: 150 samples × 10 ms = 1.5 s
const CALIB_SAMPLES: u32 = 150;
const CALIB_INTERVAL_MS: u64 = 10;
/// Keep the board level during calibration to also trim accel offsets
const CALIB_ACCEL: bool = false;

// ── Inter-task channels ───────────────────────────────────────────────────────
//  Cap=1: consumers always want the LATEST sample; older values are dropped.
static MAG_CHAN: Channel<CriticalSectionRawMutex, MagData, 1> = Channel::new();
static ATT_TEL_CHAN: Channel<CriticalSectionRawMutex, AttitudeState, 1> = Channel::new();

// ── Interrupt bindings ────────────────────────────────────────────────────────
bind_interrupts!(struct Irqs {
    I2C1_EV  => embassy_stm32::i2c::EventInterruptHandler<peripherals::I2C1>;
    I2C1_ER  => embassy_stm32::i2c::ErrorInterruptHandler<peripherals::I2C1>;
});

// ── Main ──────────────────────────────────────────────────────────────────────
#[embassy_executor::main]
async fn main(spawner: Spawner) {
    // 1. Board init (168 MHz PLL)
    let board = Board::init();
    let p = board.p;
    defmt::info!("board up");

    // 2. USB (CDC-ACM attitude stream)
    let (usb_dev, usb_serial) = usb::init(p.USB_OTG_FS, p.PA12, p.PA11);
    spawner.spawn(usb::usb_task(usb_dev)).unwrap();

    // 3. I2C1 @ 400 kHz: HMC5883 magnetometer (SCL=PB8, SDA=PB9)
    let i2c = I2c::new(
        p.I2C1,
        p.PB8, p.PB9,
        Irqs,
        p.DMA1_CH7,
        p.DMA1_CH0,
        TimeHertz(400_000),
        Default::default(),
    );

    // 4. SPI1 @ 10 MHz: ICM-42688 IMU (SCK=PA5, MOSI=PA7, MISO=PA6, CS=PB12)
    let mut spi_config = SpiConfig::default();
    spi_config.frequency = TimeHertz(10_000_000);
    let spi = Spi::new(p.SPI1, p.PA5, p.PA7, p.PA6, NoDma, NoDma, spi_config);
    let cs_gyro = Output::new(p.PB12.degrade(), Level::High, Speed::VeryHigh);
    let mut imu = Icm42688::new(spi, cs_gyro, GYRO_RANGE, ACCEL_RANGE);

    // 5. Heartbeat LED (PC13)
    let mut led = Output::new(p.PC13, Level::High, Speed::Low);

    // 6. IMU hardware init
    Timer::after(Duration::from_millis(100)).await;
    match imu.init().await {
        Ok(WHO_AM_I_VALUE) => defmt::info!("ICM-42688 up"),
        Ok(id) => defmt::warn!("unexpected IMU WHO_AM_I {=u8:#x}", id),
        Err(_) => defmt::error!("IMU init failed"),
    }

    // 7. Static gyro (and optionally accel) calibration, board still
    let bias = calibrate(&mut imu, &mut led).await;
    led.set_high();

    // 8. Spawn tasks
    let estimator = EstimatorConfig {
        filter: MadgwickConfig {
            sample_freq: LOOP_HZ as f32,
            beta: MARG_BETA,
            ..MadgwickConfig::default()
        },
        gate: GateConfig {
            gyro_max_dps: GYRO_RANGE.full_scale_dps(),
            ..GateConfig::default()
        },
        dt: DtClamp::default(),
        trim: Some(TrimConfig::default()),
        mag_remap: MAG_REMAP,
        use_mag: USE_MAG,
    };

    spawner.spawn(fast_loop_task(
        imu,
        FastLoopConfig { loop_hz: LOOP_HZ, estimator, bias },
        MAG_CHAN.receiver(),
        ATT_TEL_CHAN.sender(),
    )).unwrap();

    if USE_MAG {
        spawner.spawn(tasks::mag_task::mag_task(i2c, MAG_CHAN.sender())).unwrap();
    }

    spawner.spawn(tasks::telemetry_task::telemetry_task(
        usb_serial,
        ATT_TEL_CHAN.receiver(),
    )).unwrap();

    // 9. Main task: LED heartbeat @ 1 Hz
    loop {
        led.toggle();
        Timer::after(Duration::from_millis(500)).await;
    }
}

/// Average a stationary window. Falls back to zero bias if nothing usable came in.
async fn calibrate(imu: &mut Icm42688<'static, peripherals::SPI1>, led: &mut Output<'static, peripherals::PC13>) -> BiasEstimate {
    let mut cal = match BiasCalibrator::new(CALIB_SAMPLES, CALIB_ACCEL) {
        Ok(c) => c,
        Err(e) => {
            defmt::error!("calibration window: {}", e);
            return BiasEstimate::ZERO;
        }
    };

    // Read errors don't count toward the window; give up after twice the budget.
    for i in 0..CALIB_SAMPLES * 2 {
        if let Ok(r) = imu.read().await {
            match cal.add(&Sample::imu(r.gyro_dps, r.accel_g)) {
                Ok(true) => break,
                Ok(false) => {}
                Err(e) => defmt::warn!("calibration sample skipped: {}", e),
            }
        }
        if i % 10 == 0 {
            led.toggle();
        }
        Timer::after(Duration::from_millis(CALIB_INTERVAL_MS)).await;
    }

    match cal.finish() {
        Ok(bias) => {
            defmt::info!(
                "calibrated over {} samples: gyro bias {} dps, accel bias {} g",
                cal.sample_count(),
                bias.gyro_dps,
                bias.accel_g
            );
            bias
        }
        Err(e) => {
            defmt::warn!("calibration failed: {}, using zero bias", e);
            BiasEstimate::ZERO
        }
    }
}
