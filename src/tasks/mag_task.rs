use embassy_executor::task;
use embassy_stm32::i2c::I2c;
use embassy_stm32::peripherals::{DMA1_CH0, DMA1_CH7, I2C1};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Sender;
use embassy_time::{Duration, Ticker};
use micromath::F32Ext;

use crate::drivers::hmc5883::{Hmc5883, MagError, MagGain};
use crate::state::MagData;

const MAG_HZ: u64 = 50;
/// Earth's field is 25..65 uT; anything far outside is local interference.
const FIELD_MIN_UT: f32 = 10.0;
const FIELD_MAX_UT: f32 = 200.0;

/// Magnetometer task, 50 Hz. Publishes the latest plausible reading.
#[task]
pub async fn mag_task(
    mut i2c: I2c<'static, I2C1, DMA1_CH7, DMA1_CH0>,
    mag_tx: Sender<'static, CriticalSectionRawMutex, MagData, 1>,
) {
    let mut mag = Hmc5883::new(MagGain::Ga1_3);
    if let Err(e) = mag.init(&mut i2c).await {
        defmt::warn!("HMC5883 init failed: {}, running IMU-only", e);
        return;
    }
    defmt::info!("HMC5883 up @ {} Hz", MAG_HZ);

    let mut ticker = Ticker::every(Duration::from_hz(MAG_HZ));
    let mut rejected: u32 = 0;

    loop {
        ticker.next().await;

        let field_ut = match mag.read_ut(&mut i2c).await {
            Ok(v) => v,
            Err(MagError::Overflow) => {
                rejected = rejected.wrapping_add(1);
                continue;
            }
            Err(MagError::Bus) => continue,
        };

        let strength = (field_ut[0] * field_ut[0] + field_ut[1] * field_ut[1] + field_ut[2] * field_ut[2]).sqrt();
        if !(FIELD_MIN_UT..=FIELD_MAX_UT).contains(&strength) {
            rejected = rejected.wrapping_add(1);
            if rejected % 50 == 1 {
                defmt::debug!("mag field {} uT implausible, skipped", strength);
            }
            continue;
        }

        // Cap=1 and the fast loop drains at twice our rate; a full channel just skips this one.
        let _ = mag_tx.try_send(MagData { field_ut });
    }
}
