//! DS3231 absolute-time alarm driver.
//!
//! Alarm 1 is armed for the top of a future minute. Sleeps under an hour
//! match minutes and seconds only; longer sleeps also match hours. The
//! day/date field is always masked, which bounds the alarm at 24 hours.

use embedded_hal::i2c::I2c;

use super::{
    RtcError, WakePolarity, WakeSource, bcd_to_dec, dec_to_bcd, read_register, write_register,
};

pub const ADDRESS: u8 = 0x68;

const REG_SECONDS: u8 = 0x00;
const REG_ALARM1: u8 = 0x07;
const REG_CONTROL: u8 = 0x0E;
const REG_STATUS: u8 = 0x0F;

/// INTCN | A1IE: interrupt output on, square wave off, alarm 1 enabled.
const CONTROL_ALARM1_INT: u8 = 0x05;
const STATUS_A1F: u8 = 0x01;
const STATUS_A2F: u8 = 0x02;
/// Alarm mask bit (A1Mx) in each alarm register.
const ALARM_MASK: u8 = 0x80;

const MAX_ALARM_MINUTES: u32 = 24 * 60;

pub struct Ds3231<I2C> {
    bus: I2C,
    latched_wake: bool,
}

/// Returns `true` when the chip acknowledges a status read.
pub(crate) fn present<I2C: I2c>(bus: &mut I2C) -> bool {
    read_register(bus, ADDRESS, REG_STATUS).is_ok()
}

/// Wake time computed from the current clock.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct AlarmTime {
    minute: u8,
    hour: u8,
    day: u8,
}

impl<I2C: I2c> Ds3231<I2C> {
    pub const fn new(bus: I2C) -> Self {
        Self {
            bus,
            latched_wake: false,
        }
    }

    pub fn release(self) -> I2C {
        self.bus
    }

    /// Enables the alarm 1 interrupt and clears both alarm flags.
    ///
    /// An alarm 1 flag found here is remembered so the following
    /// [`check_wakeup`](WakeSource::check_wakeup) still reports the wake.
    pub fn begin(&mut self) -> Result<(), RtcError<I2C::Error>> {
        write_register(&mut self.bus, ADDRESS, REG_CONTROL, CONTROL_ALARM1_INT)?;
        let status = read_register(&mut self.bus, ADDRESS, REG_STATUS)?;
        if status & STATUS_A1F != 0 {
            self.latched_wake = true;
        }
        write_register(
            &mut self.bus,
            ADDRESS,
            REG_STATUS,
            status & !(STATUS_A1F | STATUS_A2F),
        )?;
        Ok(())
    }

    fn read_clock(&mut self) -> Result<(u8, u8, u8), RtcError<I2C::Error>> {
        let mut raw = [0u8; 4];
        self.bus.write_read(ADDRESS, &[REG_SECONDS], &mut raw)?;

        let minute = bcd_to_dec(raw[1] & 0x7F).ok_or(RtcError::InvalidTime)?;
        let hour = bcd_to_dec(raw[2] & 0x3F).ok_or(RtcError::InvalidTime)?;
        let day = bcd_to_dec(raw[3] & 0x07).ok_or(RtcError::InvalidTime)?;
        if minute > 59 || hour > 23 {
            return Err(RtcError::InvalidTime);
        }
        Ok((minute, hour, day))
    }
}

fn alarm_minutes(seconds: u32) -> u32 {
    seconds.div_ceil(60).clamp(1, MAX_ALARM_MINUTES)
}

fn wake_time(minute: u8, hour: u8, day: u8, minutes: u32) -> AlarmTime {
    let mut wake_minute = u32::from(minute) + minutes;
    let mut wake_hour = u32::from(hour);
    let mut wake_day = u32::from(day);

    if wake_minute >= 60 {
        wake_hour += wake_minute / 60;
        wake_minute %= 60;
    }
    if wake_hour >= 24 {
        wake_day += wake_hour / 24;
        wake_hour %= 24;
    }
    if wake_day > 7 {
        wake_day = ((wake_day - 1) % 7) + 1;
    }

    // All three are reduced below their modulus above.
    AlarmTime {
        minute: u8::try_from(wake_minute).unwrap_or(0),
        hour: u8::try_from(wake_hour).unwrap_or(0),
        day: u8::try_from(wake_day).unwrap_or(1),
    }
}

impl<I2C: I2c> WakeSource for Ds3231<I2C> {
    type Error = I2C::Error;

    fn check_wakeup(&mut self) -> Result<bool, RtcError<Self::Error>> {
        if core::mem::take(&mut self.latched_wake) {
            return Ok(true);
        }

        let status = read_register(&mut self.bus, ADDRESS, REG_STATUS)?;
        if status & STATUS_A1F == 0 {
            return Ok(false);
        }
        write_register(&mut self.bus, ADDRESS, REG_STATUS, status & !STATUS_A1F)?;
        Ok(true)
    }

    fn set_alarm(&mut self, seconds: u32) -> Result<u32, RtcError<Self::Error>> {
        let minutes = alarm_minutes(seconds);
        let (minute, hour, day) = self.read_clock()?;
        let wake = wake_time(minute, hour, day, minutes);

        let hour_field = if minutes >= 60 {
            dec_to_bcd(wake.hour)
        } else {
            ALARM_MASK
        };
        self.bus.write(
            ADDRESS,
            &[REG_ALARM1, 0x00, dec_to_bcd(wake.minute), hour_field, ALARM_MASK],
        )?;

        let status = read_register(&mut self.bus, ADDRESS, REG_STATUS)?;
        write_register(
            &mut self.bus,
            ADDRESS,
            REG_STATUS,
            status & !(STATUS_A1F | STATUS_A2F),
        )?;
        write_register(&mut self.bus, ADDRESS, REG_CONTROL, CONTROL_ALARM1_INT)?;

        Ok(minutes * 60)
    }

    fn polarity(&self) -> WakePolarity {
        WakePolarity::ActiveLow
    }

    fn max_alarm_seconds(&self) -> u32 {
        MAX_ALARM_MINUTES * 60
    }
}
