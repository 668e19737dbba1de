//! External RTC chips used as the Standby wake source.
//!
//! Both supported parts sit on I2C and pull an open-drain interrupt line low
//! when their alarm fires. The DS3231 is programmed with an absolute alarm
//! time; the RV-3028 with a countdown. [`WakeSource`] hides the difference
//! from the lifecycle and the sleep sequencer.

use core::fmt;

use embedded_hal::i2c::I2c;

pub mod ds3231;
pub mod rv3028;

pub use ds3231::Ds3231;
pub use rv3028::Rv3028;

/// Electrical sense of the RTC interrupt line.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WakePolarity {
    /// Idles high through a pull-up; the chip drives it low on an event.
    ActiveLow,
    /// Idles low through a pull-down; the chip drives it high on an event.
    ActiveHigh,
}

/// Failures raised by RTC drivers.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RtcError<E> {
    /// The I2C transfer failed.
    Bus(E),
    /// A time register held a value that is not valid BCD.
    InvalidTime,
}

impl<E> From<E> for RtcError<E> {
    fn from(error: E) -> Self {
        RtcError::Bus(error)
    }
}

impl<E: fmt::Debug> fmt::Display for RtcError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RtcError::Bus(error) => write!(f, "rtc bus error: {error:?}"),
            RtcError::InvalidTime => f.write_str("rtc returned an invalid time"),
        }
    }
}

/// Timed wake source consumed by the lifecycle and the sleep sequencer.
pub trait WakeSource {
    type Error;

    /// Reports whether the current wake was caused by this source.
    ///
    /// Clears the hardware flag when it was set. When no event is pending the
    /// call performs no bus writes.
    fn check_wakeup(&mut self) -> Result<bool, RtcError<Self::Error>>;

    /// Schedules the next wake and returns the seconds actually programmed.
    fn set_alarm(&mut self, seconds: u32) -> Result<u32, RtcError<Self::Error>>;

    /// Sense of the interrupt line the MCU must watch.
    fn polarity(&self) -> WakePolarity;

    /// Longest interval the chip can be programmed for.
    fn max_alarm_seconds(&self) -> u32;
}

/// Whichever supported chip answered on the bus.
pub enum RtcWakeSource<I2C> {
    Ds3231(Ds3231<I2C>),
    Rv3028(Rv3028<I2C>),
}

/// Chip identifier reported by [`RtcWakeSource::kind`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RtcKind {
    Ds3231,
    Rv3028,
}

impl fmt::Display for RtcKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RtcKind::Ds3231 => f.write_str("DS3231"),
            RtcKind::Rv3028 => f.write_str("RV-3028"),
        }
    }
}

impl<I2C: I2c> RtcWakeSource<I2C> {
    /// Detects the fitted chip, trying the RV-3028 first.
    ///
    /// Hands the bus back when neither chip acknowledges.
    pub fn probe(mut bus: I2C) -> Result<Self, I2C> {
        if rv3028::present(&mut bus) {
            return Ok(RtcWakeSource::Rv3028(Rv3028::new(bus)));
        }
        if ds3231::present(&mut bus) {
            return Ok(RtcWakeSource::Ds3231(Ds3231::new(bus)));
        }
        Err(bus)
    }

    #[must_use]
    pub const fn kind(&self) -> RtcKind {
        match self {
            RtcWakeSource::Ds3231(_) => RtcKind::Ds3231,
            RtcWakeSource::Rv3028(_) => RtcKind::Rv3028,
        }
    }

    /// Clears stale flags and configures interrupt output.
    pub fn begin(&mut self) -> Result<(), RtcError<I2C::Error>> {
        match self {
            RtcWakeSource::Ds3231(rtc) => rtc.begin(),
            RtcWakeSource::Rv3028(rtc) => rtc.begin(),
        }
    }

    pub fn release(self) -> I2C {
        match self {
            RtcWakeSource::Ds3231(rtc) => rtc.release(),
            RtcWakeSource::Rv3028(rtc) => rtc.release(),
        }
    }
}

impl<I2C: I2c> WakeSource for RtcWakeSource<I2C> {
    type Error = I2C::Error;

    fn check_wakeup(&mut self) -> Result<bool, RtcError<Self::Error>> {
        match self {
            RtcWakeSource::Ds3231(rtc) => rtc.check_wakeup(),
            RtcWakeSource::Rv3028(rtc) => rtc.check_wakeup(),
        }
    }

    fn set_alarm(&mut self, seconds: u32) -> Result<u32, RtcError<Self::Error>> {
        match self {
            RtcWakeSource::Ds3231(rtc) => rtc.set_alarm(seconds),
            RtcWakeSource::Rv3028(rtc) => rtc.set_alarm(seconds),
        }
    }

    fn polarity(&self) -> WakePolarity {
        match self {
            RtcWakeSource::Ds3231(rtc) => rtc.polarity(),
            RtcWakeSource::Rv3028(rtc) => rtc.polarity(),
        }
    }

    fn max_alarm_seconds(&self) -> u32 {
        match self {
            RtcWakeSource::Ds3231(rtc) => rtc.max_alarm_seconds(),
            RtcWakeSource::Rv3028(rtc) => rtc.max_alarm_seconds(),
        }
    }
}

/// Decodes a packed BCD byte.
pub(crate) fn bcd_to_dec(value: u8) -> Option<u8> {
    let tens = value >> 4;
    let units = value & 0x0F;
    if tens > 9 || units > 9 {
        None
    } else {
        Some(tens * 10 + units)
    }
}

/// Encodes a value below 100 as packed BCD.
pub(crate) const fn dec_to_bcd(value: u8) -> u8 {
    ((value / 10) << 4) | (value % 10)
}

pub(crate) fn read_register<I2C: I2c>(
    bus: &mut I2C,
    address: u8,
    register: u8,
) -> Result<u8, I2C::Error> {
    let mut buf = [0u8; 1];
    bus.write_read(address, &[register], &mut buf)?;
    Ok(buf[0])
}

pub(crate) fn write_register<I2C: I2c>(
    bus: &mut I2C,
    address: u8,
    register: u8,
    value: u8,
) -> Result<(), I2C::Error> {
    bus.write(address, &[register, value])
}


#[cfg(test)]
mod tests {
    use super::fake_bus::RegisterFile;
    use super::*;

    #[test]
    fn bcd_helpers_round_trip_clock_values() {
        for value in 0..60 {
            assert_eq!(bcd_to_dec(dec_to_bcd(value)), Some(value));
        }
        assert_eq!(bcd_to_dec(0x5A), None);
        assert_eq!(dec_to_bcd(23), 0x23);
    }

    #[test]
    fn probe_prefers_rv3028() {
        let bus = RegisterFile::new(rv3028::ADDRESS);
        let rtc = RtcWakeSource::probe(bus).ok().expect("rv3028 present");
        assert_eq!(rtc.kind(), RtcKind::Rv3028);
    }

    #[test]
    fn probe_falls_back_to_ds3231() {
        let bus = RegisterFile::new(ds3231::ADDRESS);
        let rtc = RtcWakeSource::probe(bus).ok().expect("ds3231 present");
        assert_eq!(rtc.kind(), RtcKind::Ds3231);
        assert_eq!(rtc.max_alarm_seconds(), 86_400);
    }

    #[test]
    fn probe_returns_bus_when_nothing_answers() {
        let mut bus = RegisterFile::new(0x10);
        bus.fail = true;
        let Err(bus) = RtcWakeSource::probe(bus) else {
            panic!("no chip should be detected");
        };
        assert!(bus.writes.is_empty());
    }
}
