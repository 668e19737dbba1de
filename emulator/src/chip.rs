//! Register-level RTC simulation on a fake I2C bus.
//!
//! The real `node-core` drivers talk to a [`SimBus`] exactly as they would to
//! hardware. The session keeps a second handle to the same chip so it can
//! move the chip clock forward, decode what the driver armed, and raise the
//! interrupt flag when the simulated sleep ends.

use std::cell::RefCell;
use std::rc::Rc;

use embedded_hal::i2c::{ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation};
use node_core::rtc::{RtcKind, ds3231, rv3028};

const REGISTER_COUNT: usize = 64;

const DS_SECONDS: usize = 0x00;
const DS_ALARM1_MINUTES: usize = 0x08;
const DS_ALARM1_HOURS: usize = 0x09;
const DS_CONTROL: usize = 0x0E;
const DS_STATUS: usize = 0x0F;
const DS_ALARM1_ENABLED: u8 = 0x05;
const DS_A1F: u8 = 0x01;
const DS_ALARM_MASK: u8 = 0x80;

const RV_TIMER_VALUE_0: usize = 0x0A;
const RV_TIMER_VALUE_1: usize = 0x0B;
const RV_STATUS: usize = 0x0E;
const RV_CONTROL1: usize = 0x0F;
const RV_CONTROL2: usize = 0x10;
const RV_TF: u8 = 1 << 3;
const RV_TE: u8 = 1 << 2;
const RV_TRPT: u8 = 1 << 7;
const RV_TIE: u8 = 1 << 4;

const SECS_PER_DAY: u64 = 86_400;

/// One simulated RTC part.
pub struct SimChip {
    kind: RtcKind,
    regs: [u8; REGISTER_COUNT],
    pointer: usize,
    clock_secs: u64,
    transactions: usize,
}

impl SimChip {
    pub fn new(kind: RtcKind) -> Self {
        let mut chip = Self {
            kind,
            regs: [0; REGISTER_COUNT],
            pointer: 0,
            clock_secs: 0,
            transactions: 0,
        };
        chip.set_clock(0);
        chip
    }

    pub fn kind(&self) -> RtcKind {
        self.kind
    }

    pub fn address(&self) -> u8 {
        match self.kind {
            RtcKind::Ds3231 => ds3231::ADDRESS,
            RtcKind::Rv3028 => rv3028::ADDRESS,
        }
    }

    /// Number of I2C transactions the chip has acknowledged.
    pub fn transactions(&self) -> usize {
        self.transactions
    }

    /// Moves the chip clock to `secs` since simulation start.
    pub fn set_clock(&mut self, secs: u64) {
        self.clock_secs = secs;
        if self.kind == RtcKind::Ds3231 {
            let of_day = secs % SECS_PER_DAY;
            let day = (secs / SECS_PER_DAY) % 7 + 1;
            self.regs[DS_SECONDS] = bcd(of_day % 60);
            self.regs[DS_SECONDS + 1] = bcd((of_day / 60) % 60);
            self.regs[DS_SECONDS + 2] = bcd(of_day / 3_600);
            self.regs[DS_SECONDS + 3] = bcd(day);
        }
    }

    /// Seconds from the current clock until the armed event, if one is armed.
    pub fn seconds_until_event(&self) -> Option<u64> {
        match self.kind {
            RtcKind::Ds3231 => self.ds3231_countdown(),
            RtcKind::Rv3028 => self.rv3028_countdown(),
        }
    }

    /// Raises the interrupt flag as the chip would when its event fires.
    pub fn fire(&mut self) {
        match self.kind {
            RtcKind::Ds3231 => self.regs[DS_STATUS] |= DS_A1F,
            RtcKind::Rv3028 => {
                self.regs[RV_STATUS] |= RV_TF;
                if self.regs[RV_CONTROL1] & RV_TRPT == 0 {
                    self.regs[RV_CONTROL1] &= !RV_TE;
                }
            }
        }
    }

    fn ds3231_countdown(&self) -> Option<u64> {
        if self.regs[DS_CONTROL] & DS_ALARM1_ENABLED != DS_ALARM1_ENABLED {
            return None;
        }

        let of_day = self.clock_secs % SECS_PER_DAY;
        let now_minutes = of_day / 60;
        let alarm_minute = unbcd(self.regs[DS_ALARM1_MINUTES] & 0x7F);
        let hour_field = self.regs[DS_ALARM1_HOURS];

        let delta_minutes = if hour_field & DS_ALARM_MASK != 0 {
            let delta = (alarm_minute + 60 - now_minutes % 60) % 60;
            if delta == 0 { 60 } else { delta }
        } else {
            let target = unbcd(hour_field & 0x3F) * 60 + alarm_minute;
            let delta = (target + 1_440 - now_minutes) % 1_440;
            if delta == 0 { 1_440 } else { delta }
        };
        Some(delta_minutes * 60 - of_day % 60)
    }

    fn rv3028_countdown(&self) -> Option<u64> {
        let control1 = self.regs[RV_CONTROL1];
        if control1 & RV_TE == 0 || self.regs[RV_CONTROL2] & RV_TIE == 0 {
            return None;
        }

        let ticks = u64::from(self.regs[RV_TIMER_VALUE_0])
            | (u64::from(self.regs[RV_TIMER_VALUE_1] & 0x0F) << 8);
        let seconds = match control1 & 0b11 {
            0b00 => ticks.div_ceil(4_096),
            0b01 => ticks.div_ceil(64),
            0b10 => ticks,
            _ => ticks * 60,
        };
        Some(seconds)
    }

    fn transaction(&mut self, operations: &mut [Operation<'_>]) {
        self.transactions += 1;
        for operation in operations {
            match operation {
                Operation::Write(bytes) => {
                    let Some((&register, data)) = bytes.split_first() else {
                        continue;
                    };
                    self.pointer = usize::from(register) % REGISTER_COUNT;
                    for &byte in data {
                        self.regs[self.pointer] = byte;
                        self.pointer = (self.pointer + 1) % REGISTER_COUNT;
                    }
                }
                Operation::Read(buffer) => {
                    for byte in buffer.iter_mut() {
                        *byte = self.regs[self.pointer];
                        self.pointer = (self.pointer + 1) % REGISTER_COUNT;
                    }
                }
            }
        }
    }
}

/// Shared handle to a [`SimChip`] usable as an `embedded-hal` I2C bus.
#[derive(Clone)]
pub struct SimBus {
    chip: Rc<RefCell<SimChip>>,
}

impl SimBus {
    pub fn new(kind: RtcKind) -> Self {
        Self {
            chip: Rc::new(RefCell::new(SimChip::new(kind))),
        }
    }

    pub fn with_chip<R>(&self, f: impl FnOnce(&mut SimChip) -> R) -> R {
        f(&mut self.chip.borrow_mut())
    }
}

impl ErrorType for SimBus {
    type Error = ErrorKind;
}

impl I2c for SimBus {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let mut chip = self.chip.borrow_mut();
        if address != chip.address() {
            return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
        }
        chip.transaction(operations);
        Ok(())
    }
}

fn bcd(value: u64) -> u8 {
    let value = u8::try_from(value % 100).unwrap_or(0);
    ((value / 10) << 4) | (value % 10)
}

fn unbcd(value: u8) -> u64 {
    u64::from(value >> 4) * 10 + u64::from(value & 0x0F)
}

#[cfg(test)]
mod tests {
    use node_core::rtc::{RtcWakeSource, WakeSource};

    use super::*;

    fn probe(kind: RtcKind) -> (SimBus, RtcWakeSource<SimBus>) {
        let bus = SimBus::new(kind);
        let rtc = RtcWakeSource::probe(bus.clone()).unwrap_or_else(|_| panic!("{kind} missing"));
        (bus, rtc)
    }

    #[test]
    fn probe_finds_each_simulated_part() {
        assert_eq!(probe(RtcKind::Ds3231).1.kind(), RtcKind::Ds3231);
        assert_eq!(probe(RtcKind::Rv3028).1.kind(), RtcKind::Rv3028);
    }

    #[test]
    fn ds3231_alarm_counts_whole_minutes_from_clock() {
        let (bus, mut rtc) = probe(RtcKind::Ds3231);
        bus.with_chip(|chip| chip.set_clock(3_600 + 20));

        assert_eq!(rtc.set_alarm(300), Ok(300));
        assert_eq!(bus.with_chip(|chip| chip.seconds_until_event()), Some(280));
    }

    #[test]
    fn ds3231_hour_match_spans_midnight() {
        let (bus, mut rtc) = probe(RtcKind::Ds3231);
        bus.with_chip(|chip| chip.set_clock(23 * 3_600));

        assert_eq!(rtc.set_alarm(7_200), Ok(7_200));
        assert_eq!(bus.with_chip(|chip| chip.seconds_until_event()), Some(7_200));
    }

    #[test]
    fn rv3028_switches_to_minute_ticks_for_long_intervals() {
        let (bus, mut rtc) = probe(RtcKind::Rv3028);

        assert_eq!(rtc.set_alarm(300), Ok(300));
        assert_eq!(bus.with_chip(|chip| chip.seconds_until_event()), Some(300));

        assert_eq!(rtc.set_alarm(5_000), Ok(5_040));
        assert_eq!(bus.with_chip(|chip| chip.seconds_until_event()), Some(5_040));
    }

    #[test]
    fn fired_event_is_seen_once_by_the_driver() {
        let (bus, mut rtc) = probe(RtcKind::Rv3028);
        rtc.set_alarm(60).expect("arm");
        bus.with_chip(SimChip::fire);

        assert_eq!(rtc.check_wakeup(), Ok(true));
        assert_eq!(rtc.check_wakeup(), Ok(false));
        assert_eq!(bus.with_chip(|chip| chip.seconds_until_event()), None);
    }
}
