//! STM32F405 clock tree.
//!
//! Pin map used by the binaries:
//! - SPI1 ICM-42688: SCK=PA5, MISO=PA6, MOSI=PA7, CS=PB12
//! - I2C1 HMC5883: SCL=PB8, SDA=PB9
//! - USB OTG FS: DM=PA11, DP=PA12
//! - status LED: PC13

use embassy_stm32::rcc::*;
use embassy_stm32::time::Hertz as TimeHertz;
use embassy_stm32::Config;

/// External crystal
const HSE_HZ: u32 = 8_000_000;

pub struct Board {
    pub p: embassy_stm32::Peripherals,
}

impl Board {
    /// 8 MHz HSE → PLL: 168 MHz SYSCLK, 48 MHz for USB.
    pub fn init() -> Self {
        let mut config = Config::default();
        config.rcc.hse = Some(Hse {
            freq: TimeHertz(HSE_HZ),
            mode: HseMode::Oscillator,
        });
        config.rcc.pll_src = PllSource::HSE;
        config.rcc.pll = Some(Pll {
            prediv: PllPreDiv::DIV4,
            mul: PllMul::MUL168,
            divp: Some(PllPDiv::DIV2),
            divq: Some(PllQDiv::DIV7),
            divr: None,
        });
        config.rcc.sys = Sysclk::PLL1_P;
        config.rcc.ahb_pre = AHBPrescaler::DIV1;
        // APB1 ≤ 42 MHz, APB2 ≤ 84 MHz
        config.rcc.apb1_pre = APBPrescaler::DIV4;
        config.rcc.apb2_pre = APBPrescaler::DIV2;

        Self {
            p: embassy_stm32::init(config),
        }
    }
}
