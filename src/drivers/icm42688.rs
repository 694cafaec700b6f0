use embassy_stm32::dma::NoDma;
use embassy_stm32::gpio::{AnyPin, Output};
use embassy_stm32::spi::{Error, Instance, Spi};
use embassy_time::{Duration, Timer};

// ── Bank 0 registers ──────────────────────────────────────────────────────────
const REG_DEVICE_CONFIG: u8 = 0x11;
const REG_ACCEL_DATA_X1: u8 = 0x1F;
const REG_PWR_MGMT0: u8 = 0x4E;
const REG_GYRO_CONFIG0: u8 = 0x4F;
const REG_ACCEL_CONFIG0: u8 = 0x50;
const REG_WHO_AM_I: u8 = 0x75;

pub const WHO_AM_I_VALUE: u8 = 0x47;

/// ODR field shared by GYRO_CONFIG0 / ACCEL_CONFIG0: 1 kHz
const ODR_1KHZ: u8 = 0x06;

#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum GyroRange {
    Dps2000,
    Dps1000,
    Dps500,
    Dps250,
}

impl GyroRange {
    fn fs_sel(self) -> u8 {
        match self {
            GyroRange::Dps2000 => 0b000,
            GyroRange::Dps1000 => 0b001,
            GyroRange::Dps500 => 0b010,
            GyroRange::Dps250 => 0b011,
        }
    }

    /// LSB per deg/s
    pub fn sensitivity(self) -> f32 {
        match self {
            GyroRange::Dps2000 => 16.4,
            GyroRange::Dps1000 => 32.8,
            GyroRange::Dps500 => 65.5,
            GyroRange::Dps250 => 131.0,
        }
    }

    pub fn full_scale_dps(self) -> f32 {
        match self {
            GyroRange::Dps2000 => 2000.0,
            GyroRange::Dps1000 => 1000.0,
            GyroRange::Dps500 => 500.0,
            GyroRange::Dps250 => 250.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum AccelRange {
    G16,
    G8,
    G4,
    G2,
}

impl AccelRange {
    fn fs_sel(self) -> u8 {
        match self {
            AccelRange::G16 => 0b000,
            AccelRange::G8 => 0b001,
            AccelRange::G4 => 0b010,
            AccelRange::G2 => 0b011,
        }
    }

    /// LSB per g
    pub fn sensitivity(self) -> f32 {
        match self {
            AccelRange::G16 => 2048.0,
            AccelRange::G8 => 4096.0,
            AccelRange::G4 => 8192.0,
            AccelRange::G2 => 16384.0,
        }
    }
}

/// One IMU reading in physical units.
#[derive(Clone, Copy, Debug, Default, defmt::Format)]
pub struct ImuReading {
    pub accel_g: [f32; 3],
    pub gyro_dps: [f32; 3],
}

pub struct Icm42688<'d, T: Instance> {
    spi: Spi<'d, T, NoDma, NoDma>,
    cs: Output<'d, AnyPin>,
    gyro_range: GyroRange,
    accel_range: AccelRange,
}

impl<'d, T: Instance> Icm42688<'d, T> {
    pub fn new(
        spi: Spi<'d, T, NoDma, NoDma>,
        cs: Output<'d, AnyPin>,
        gyro_range: GyroRange,
        accel_range: AccelRange,
    ) -> Self {
        Self {
            spi,
            cs,
            gyro_range,
            accel_range,
        }
    }

    pub fn gyro_range(&self) -> GyroRange {
        self.gyro_range
    }

    async fn write_reg(&mut self, reg: u8, value: u8) -> Result<(), Error> {
        let buf = [reg & 0x7F, value];
        self.cs.set_low();
        let res = self.spi.blocking_write(&buf);
        self.cs.set_high();
        res
    }

    async fn read_reg(&mut self, reg: u8) -> Result<u8, Error> {
        let tx = [reg | 0x80, 0x00];
        let mut rx = [0u8; 2];

        self.cs.set_low();
        let res = self.spi.blocking_transfer(&mut rx, &tx);
        self.cs.set_high();

        res?;
        Ok(rx[1])
    }

    /// Soft reset, range/ODR setup, then both sensors in low-noise mode.
    /// Returns the WHO_AM_I byte so the caller can log a mismatch.
    pub async fn init(&mut self) -> Result<u8, Error> {
        self.write_reg(REG_DEVICE_CONFIG, 0x01).await?;
        Timer::after(Duration::from_millis(10)).await;

        let id = self.read_reg(REG_WHO_AM_I).await?;

        self.write_reg(REG_GYRO_CONFIG0, (self.gyro_range.fs_sel() << 5) | ODR_1KHZ).await?;
        self.write_reg(REG_ACCEL_CONFIG0, (self.accel_range.fs_sel() << 5) | ODR_1KHZ).await?;

        self.write_reg(REG_PWR_MGMT0, 0x0F).await?;
        // Gyro needs ~45 ms after leaving off mode
        Timer::after(Duration::from_millis(50)).await;

        Ok(id)
    }

    /// Raw accel and gyro counts.
    pub async fn read_raw(&mut self) -> Result<([i16; 3], [i16; 3]), Error> {
        let mut tx = [0u8; 13];
        tx[0] = REG_ACCEL_DATA_X1 | 0x80;
        let mut rx = [0u8; 13];

        self.cs.set_low();
        let res = self.spi.blocking_transfer(&mut rx, &tx);
        self.cs.set_high();
        res?;

        let word = |i: usize| i16::from_be_bytes([rx[i], rx[i + 1]]);
        Ok(([word(1), word(3), word(5)], [word(7), word(9), word(11)]))
    }

    pub async fn read(&mut self) -> Result<ImuReading, Error> {
        let (accel, gyro) = self.read_raw().await?;
        let a = self.accel_range.sensitivity();
        let g = self.gyro_range.sensitivity();

        Ok(ImuReading {
            accel_g: accel.map(|v| v as f32 / a),
            gyro_dps: gyro.map(|v| v as f32 / g),
        })
    }
}
