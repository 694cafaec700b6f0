use core::fmt::Write;

use attitude_ahrs::{AttitudeDisplay, DisplayAttitude, DisplayConfig, Euler};
use embassy_executor::task;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Receiver;
use embassy_time::{Duration, Ticker};

use crate::state::AttitudeState;
use crate::usb::{self, UsbSerial};

const DISPLAY_HZ: u64 = 50;
/// defmt attitude line every N frames (2 Hz)
const DEBUG_EVERY: u32 = 25;

const FLAG_BANK_WARNING: u8 = 1 << 0;
const FLAG_ACCEL_TRUSTED: u8 = 1 << 1;
const FLAG_MAG_USED: u8 = 1 << 2;
const FLAG_STATIONARY: u8 = 1 << 3;

/// Telemetry task, 50 Hz.
/// Shapes the latest attitude for the indicator and streams it over USB CDC as
/// `$ATT,<roll>,<pitch>,<heading>,<flags>*<xor>` lines.
#[task]
pub async fn telemetry_task(
    mut usb_serial: UsbSerial<'static>,
    attitude_rx: Receiver<'static, CriticalSectionRawMutex, AttitudeState, 1>,
) {
    let mut tick: u32 = 0;
    let mut attitude = AttitudeState::default();
    let mut display = match AttitudeDisplay::new(DisplayConfig::default()) {
        Ok(d) => d,
        Err(e) => {
            defmt::warn!("display config rejected ({}), using defaults", e);
            AttitudeDisplay::default()
        }
    };
    let mut last_resets = 0u32;

    let mut ticker = Ticker::every(Duration::from_hz(DISPLAY_HZ));

    loop {
        ticker.next().await;
        tick = tick.wrapping_add(1);

        if let Ok(a) = attitude_rx.try_receive() {
            attitude = a;
        }

        // Snap instead of easing back from wherever the old estimate was.
        if attitude.resets != last_resets {
            display.reset();
            last_resets = attitude.resets;
        }

        let frame = display.update(Euler::new(attitude.roll_rad, attitude.pitch_rad, attitude.yaw_rad));

        if usb_serial.dtr() {
            let line = att_sentence(&frame, flags(&frame, &attitude));
            usb::write_chunked(&mut usb_serial, line.as_bytes()).await;
        }

        if tick % DEBUG_EVERY == 0 {
            defmt::debug!(
                "[ATT] r={} p={} hdg={} warn={} resets={} dropped={}",
                frame.roll_deg,
                frame.pitch_deg,
                frame.heading_deg,
                frame.bank_warning,
                attitude.resets,
                attitude.dropped
            );
        }
    }
}

fn flags(frame: &DisplayAttitude, state: &AttitudeState) -> u8 {
    let mut f = 0;
    if frame.bank_warning {
        f |= FLAG_BANK_WARNING;
    }
    if state.accel_trusted {
        f |= FLAG_ACCEL_TRUSTED;
    }
    if state.mag_used {
        f |= FLAG_MAG_USED;
    }
    if state.stationary {
        f |= FLAG_STATIONARY;
    }
    f
}

/// NMEA-style sentence; the checksum is the XOR of every byte between `$` and `*`.
fn att_sentence(frame: &DisplayAttitude, flags: u8) -> heapless::String<64> {
    let mut body = heapless::String::<48>::new();
    let _ = write!(
        body,
        "ATT,{:.1},{:.1},{:.1},{}",
        frame.roll_deg, frame.pitch_deg, frame.heading_deg, flags
    );
    let checksum = body.bytes().fold(0u8, |acc, b| acc ^ b);

    let mut line = heapless::String::<64>::new();
    let _ = write!(line, "${}*{:02X}\r\n", body, checksum);
    line
}
