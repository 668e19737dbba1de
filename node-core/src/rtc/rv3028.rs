//! RV-3028-C7 countdown timer driver.
//!
//! The periodic countdown timer is loaded with a 12-bit value and run in
//! single-shot mode. Intervals up to 4095 s tick at 1 Hz; longer ones switch to
//! the 1/60 Hz clock and round up to whole minutes.

use embedded_hal::i2c::I2c;

use super::{RtcError, WakePolarity, WakeSource, read_register, write_register};

pub const ADDRESS: u8 = 0x52;

const REG_TIMER_VALUE_0: u8 = 0x0A;
const REG_STATUS: u8 = 0x0E;
const REG_CONTROL1: u8 = 0x0F;
const REG_CONTROL2: u8 = 0x10;

const STATUS_TF: u8 = 1 << 3;
const STATUS_AF: u8 = 1 << 2;

const CONTROL1_TRPT: u8 = 1 << 7;
const CONTROL1_TE: u8 = 1 << 2;
const CONTROL1_TD_MASK: u8 = 0b11;
const TD_1HZ: u8 = 0b10;
const TD_1_60HZ: u8 = 0b11;

const CONTROL2_UIE: u8 = 1 << 5;
const CONTROL2_TIE: u8 = 1 << 4;
const CONTROL2_AIE: u8 = 1 << 3;

const MAX_TICKS: u32 = 0x0FFF;

pub struct Rv3028<I2C> {
    bus: I2C,
    latched_wake: bool,
}

pub(crate) fn present<I2C: I2c>(bus: &mut I2C) -> bool {
    read_register(bus, ADDRESS, REG_STATUS).is_ok()
}

/// Countdown value and clock selection for a requested interval.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct Countdown {
    ticks: u16,
    clock: u8,
}

impl Countdown {
    fn for_seconds(seconds: u32) -> Self {
        let seconds = seconds.max(1);
        if seconds <= MAX_TICKS {
            Self {
                ticks: u16::try_from(seconds).unwrap_or(0x0FFF),
                clock: TD_1HZ,
            }
        } else {
            let minutes = seconds.div_ceil(60).min(MAX_TICKS);
            Self {
                ticks: u16::try_from(minutes).unwrap_or(0x0FFF),
                clock: TD_1_60HZ,
            }
        }
    }

    fn effective_seconds(self) -> u32 {
        match self.clock {
            TD_1_60HZ => u32::from(self.ticks) * 60,
            _ => u32::from(self.ticks),
        }
    }
}

impl<I2C: I2c> Rv3028<I2C> {
    pub const fn new(bus: I2C) -> Self {
        Self {
            bus,
            latched_wake: false,
        }
    }

    pub fn release(self) -> I2C {
        self.bus
    }

    /// Clears stale timer and alarm flags, remembering a pending timer event.
    pub fn begin(&mut self) -> Result<(), RtcError<I2C::Error>> {
        let status = read_register(&mut self.bus, ADDRESS, REG_STATUS)?;
        if status & (STATUS_TF | STATUS_AF) == 0 {
            return Ok(());
        }
        if status & STATUS_TF != 0 {
            self.latched_wake = true;
        }
        write_register(
            &mut self.bus,
            ADDRESS,
            REG_STATUS,
            status & !(STATUS_TF | STATUS_AF),
        )?;
        Ok(())
    }

    fn update(
        &mut self,
        register: u8,
        f: impl FnOnce(u8) -> u8,
    ) -> Result<(), RtcError<I2C::Error>> {
        let value = read_register(&mut self.bus, ADDRESS, register)?;
        write_register(&mut self.bus, ADDRESS, register, f(value))?;
        Ok(())
    }
}

impl<I2C: I2c> WakeSource for Rv3028<I2C> {
    type Error = I2C::Error;

    fn check_wakeup(&mut self) -> Result<bool, RtcError<Self::Error>> {
        if core::mem::take(&mut self.latched_wake) {
            return Ok(true);
        }

        let status = read_register(&mut self.bus, ADDRESS, REG_STATUS)?;
        if status & STATUS_TF == 0 {
            return Ok(false);
        }
        write_register(&mut self.bus, ADDRESS, REG_STATUS, status & !STATUS_TF)?;
        Ok(true)
    }

    fn set_alarm(&mut self, seconds: u32) -> Result<u32, RtcError<Self::Error>> {
        let countdown = Countdown::for_seconds(seconds);

        // The timer value may only be loaded while TE is clear.
        self.update(REG_CONTROL1, |c| c & !CONTROL1_TE)?;
        self.update(REG_CONTROL2, |c| {
            c & !(CONTROL2_TIE | CONTROL2_UIE | CONTROL2_AIE)
        })?;
        self.update(REG_STATUS, |s| s & !(STATUS_TF | STATUS_AF))?;

        let [lsb, msb] = countdown.ticks.to_le_bytes();
        self.bus
            .write(ADDRESS, &[REG_TIMER_VALUE_0, lsb, msb & 0x0F])?;

        self.update(REG_CONTROL1, |c| {
            (c & !(CONTROL1_TD_MASK | CONTROL1_TRPT)) | countdown.clock
        })?;
        self.update(REG_CONTROL2, |c| c | CONTROL2_TIE)?;
        self.update(REG_CONTROL1, |c| c | CONTROL1_TE)?;

        Ok(countdown.effective_seconds())
    }

    fn polarity(&self) -> WakePolarity {
        WakePolarity::ActiveLow
    }

    fn max_alarm_seconds(&self) -> u32 {
        MAX_TICKS * 60
    }
}

#[cfg(test)]
mod tests {
    use super::super::fake_bus::RegisterFile;
    use super::*;

    #[test]
    fn short_interval_uses_one_hertz_clock() {
        let bus = RegisterFile::new(ADDRESS)
            .with(REG_CONTROL1, CONTROL1_TE | CONTROL1_TRPT | 0b01)
            .with(REG_CONTROL2, CONTROL2_UIE | CONTROL2_AIE)
            .with(REG_STATUS, STATUS_TF | STATUS_AF);
        let mut rtc = Rv3028::new(bus);

        assert_eq!(rtc.set_alarm(300), Ok(300));

        let bus = rtc.release();
        assert_eq!(bus.reg(0x0A), 0x2C);
        assert_eq!(bus.reg(0x0B), 0x01);
        assert_eq!(bus.reg(REG_CONTROL1), CONTROL1_TE | TD_1HZ);
        assert_eq!(bus.reg(REG_CONTROL2), CONTROL2_TIE);
        assert_eq!(bus.reg(REG_STATUS), 0x00);
    }

    #[test]
    fn timer_is_disabled_before_loading_and_enabled_last() {
        let bus = RegisterFile::new(ADDRESS).with(REG_CONTROL1, CONTROL1_TE);
        let mut rtc = Rv3028::new(bus);
        rtc.set_alarm(10).expect("arm");

        let bus = rtc.release();
        let writes = bus.writes.as_slice();
        let load = writes
            .iter()
            .position(|&(reg, _)| reg == REG_TIMER_VALUE_0)
            .expect("timer loaded");
        assert_eq!(writes[0], (REG_CONTROL1, 0x00));
        assert!(writes[..load].iter().all(|&(reg, v)| reg != REG_CONTROL1 || v & CONTROL1_TE == 0));
        assert_eq!(writes.last(), Some(&(REG_CONTROL1, CONTROL1_TE | TD_1HZ)));
    }

    #[test]
    fn long_interval_switches_to_minute_clock() {
        let mut rtc = Rv3028::new(RegisterFile::new(ADDRESS));

        assert_eq!(rtc.set_alarm(4_095), Ok(4_095));
        assert_eq!(rtc.set_alarm(4_096), Ok(4_140));

        let bus = rtc.release();
        assert_eq!(bus.reg(0x0A), 69);
        assert_eq!(bus.reg(0x0B), 0x00);
        assert_eq!(bus.reg(REG_CONTROL1), CONTROL1_TE | TD_1_60HZ);
    }

    #[test]
    fn interval_is_capped_at_4095_minutes() {
        let mut rtc = Rv3028::new(RegisterFile::new(ADDRESS));
        assert_eq!(rtc.set_alarm(u32::MAX), Ok(245_700));
        let bus = rtc.release();
        assert_eq!(bus.reg(0x0A), 0xFF);
        assert_eq!(bus.reg(0x0B), 0x0F);
    }

    #[test]
    fn check_wakeup_clears_timer_flag() {
        let bus = RegisterFile::new(ADDRESS).with(REG_STATUS, STATUS_TF | STATUS_AF);
        let mut rtc = Rv3028::new(bus);

        assert_eq!(rtc.check_wakeup(), Ok(true));
        assert_eq!(rtc.release().reg(REG_STATUS), STATUS_AF);
    }

    #[test]
    fn check_wakeup_without_event_does_not_write() {
        let mut rtc = Rv3028::new(RegisterFile::new(ADDRESS));
        assert_eq!(rtc.check_wakeup(), Ok(false));
        assert!(rtc.release().writes.is_empty());
    }

    #[test]
    fn begin_latches_pending_timer_event() {
        let bus = RegisterFile::new(ADDRESS).with(REG_STATUS, STATUS_TF);
        let mut rtc = Rv3028::new(bus);
        rtc.begin().expect("begin");

        assert_eq!(rtc.check_wakeup(), Ok(true));
        assert_eq!(rtc.check_wakeup(), Ok(false));
        assert_eq!(rtc.release().reg(REG_STATUS), 0x00);
    }
}
