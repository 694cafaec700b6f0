use embassy_stm32::i2c::{I2c, Instance, RxDma, TxDma};
use embassy_time::Timer;

pub const HMC5883L_ADDR: u8 = 0x1E;

const REG_CONFIG_A: u8 = 0x00;
const REG_CONFIG_B: u8 = 0x01;
const REG_MODE: u8 = 0x02;
const REG_DATA_X_MSB: u8 = 0x03;

/// 8-sample average, 75 Hz output, normal measurement
const CONFIG_A_8AVG_75HZ: u8 = 0x78;
const MODE_CONTINUOUS: u8 = 0x00;

/// Value the data registers hold when the ADC over/underflows.
const OVERFLOW: i16 = -4096;

#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum MagGain {
    Ga0_88,
    Ga1_3,
    Ga1_9,
    Ga2_5,
    Ga4_0,
}

impl MagGain {
    fn config_b(self) -> u8 {
        match self {
            MagGain::Ga0_88 => 0x00,
            MagGain::Ga1_3 => 0x20,
            MagGain::Ga1_9 => 0x40,
            MagGain::Ga2_5 => 0x60,
            MagGain::Ga4_0 => 0x80,
        }
    }

    /// LSB per gauss
    fn sensitivity(self) -> f32 {
        match self {
            MagGain::Ga0_88 => 1370.0,
            MagGain::Ga1_3 => 1090.0,
            MagGain::Ga1_9 => 820.0,
            MagGain::Ga2_5 => 660.0,
            MagGain::Ga4_0 => 440.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum MagError {
    Bus,
    /// At least one axis saturated; the reading is unusable at this gain.
    Overflow,
}

pub struct Hmc5883 {
    gain: MagGain,
}

impl Hmc5883 {
    pub fn new(gain: MagGain) -> Self {
        Self { gain }
    }

    pub async fn init<T: Instance, Tx: TxDma<T>, Rx: RxDma<T>>(
        &mut self,
        i2c: &mut I2c<'_, T, Tx, Rx>,
    ) -> Result<(), MagError> {
        i2c.blocking_write(HMC5883L_ADDR, &[REG_CONFIG_A, CONFIG_A_8AVG_75HZ])
            .map_err(|_| MagError::Bus)?;
        i2c.blocking_write(HMC5883L_ADDR, &[REG_CONFIG_B, self.gain.config_b()])
            .map_err(|_| MagError::Bus)?;
        i2c.blocking_write(HMC5883L_ADDR, &[REG_MODE, MODE_CONTINUOUS])
            .map_err(|_| MagError::Bus)?;

        // First conversion after a mode change is ~6 ms away.
        Timer::after_millis(10).await;
        Ok(())
    }

    pub async fn read_raw<T: Instance, Tx: TxDma<T>, Rx: RxDma<T>>(
        &mut self,
        i2c: &mut I2c<'_, T, Tx, Rx>,
    ) -> Result<[i16; 3], MagError> {
        let mut data = [0u8; 6];
        i2c.blocking_write_read(HMC5883L_ADDR, &[REG_DATA_X_MSB], &mut data)
            .map_err(|_| MagError::Bus)?;

        // Register order is X, Z, Y
        let x = i16::from_be_bytes([data[0], data[1]]);
        let z = i16::from_be_bytes([data[2], data[3]]);
        let y = i16::from_be_bytes([data[4], data[5]]);

        if x == OVERFLOW || y == OVERFLOW || z == OVERFLOW {
            return Err(MagError::Overflow);
        }
        Ok([x, y, z])
    }

    /// Field in microtesla, sensor axes.
    pub async fn read_ut<T: Instance, Tx: TxDma<T>, Rx: RxDma<T>>(
        &mut self,
        i2c: &mut I2c<'_, T, Tx, Rx>,
    ) -> Result<[f32; 3], MagError> {
        let raw = self.read_raw(i2c).await?;
        // 1 G = 100 uT
        let scale = 100.0 / self.gain.sensitivity();
        Ok(raw.map(|v| v as f32 * scale))
    }
}
