//! Board glue for the STM32G0 sensor node.
//!
//! Pin map:
//! - PA0: WKUP1, RTC interrupt (open drain, idles high)
//! - PA1: battery divider
//! - PA2/PA3: console USART2 TX/RX
//! - PA5: status LED
//! - PB5: sensor rail enable
//! - PB6/PB7: RTC I2C1 SCL/SDA

pub mod power;

use core::convert::Infallible;

use embassy_stm32::gpio::Output;
use embassy_stm32::pac;
use embassy_time::{Duration, block_for};
use node_core::retained::RetainedRegister;
use node_core::rtc::WakePolarity;
use node_core::sleep::SleepHardware;

const RCC_APBENR1_RTCAPBEN: u32 = 1 << 10;

const PWR_CR1_LPMS_MASK: u32 = 0b111;
const PWR_CR1_LPMS_STANDBY: u32 = 0b011;
const PWR_CR1_DBP: u32 = 1 << 8;
const PWR_CR3_EWUP1: u32 = 1 << 0;
const PWR_CR3_APC: u32 = 1 << 10;
const PWR_CR4_WP1: u32 = 1 << 0;
const PWR_SCR_CWUF_ALL: u32 = 0x3F;
const PWR_PORT_A: usize = 0;
const PWR_PIN_PA0: u32 = 1 << 0;

const SCB_SCR_SLEEPDEEP: u32 = 1 << 2;

const RETAINED_INDEX: usize = 0;
const PREFERENCE_INDEX: usize = 1;

/// Time the UART shift register needs to clear its last byte at 115200 baud.
const TX_SETTLE: Duration = Duration::from_millis(2);

/// TAMP backup registers, kept alive through Standby by the backup domain.
pub struct BackupRegisters {
    _private: (),
}

impl BackupRegisters {
    /// Enables the register clock and lifts backup-domain write protection.
    pub fn enable() -> Self {
        pac::RCC.apbenr1().modify(|w| w.0 |= RCC_APBENR1_RTCAPBEN);
        pac::PWR.cr1().modify(|w| w.0 |= PWR_CR1_DBP);
        Self { _private: () }
    }

    fn read_word(index: usize) -> u32 {
        pac::TAMP.bkpr(index).read().0
    }

    fn write_word(index: usize, value: u32) {
        pac::TAMP.bkpr(index).write(|w| w.0 = value);
    }

    /// Raw operator-preference words (all zero after a backup-domain reset).
    pub fn preference_words(&self) -> [u32; 2] {
        [
            Self::read_word(PREFERENCE_INDEX),
            Self::read_word(PREFERENCE_INDEX + 1),
        ]
    }

    pub fn store_preference_words(&mut self, words: [u32; 2]) {
        Self::write_word(PREFERENCE_INDEX, words[0]);
        Self::write_word(PREFERENCE_INDEX + 1, words[1]);
    }
}

impl RetainedRegister for BackupRegisters {
    fn read(&mut self) -> u8 {
        Self::read_word(RETAINED_INDEX).to_le_bytes()[0]
    }

    fn write(&mut self, value: u8) {
        Self::write_word(RETAINED_INDEX, u32::from(value));
    }
}

/// Outputs touched on the way into Standby.
pub struct NodeHardware<'d> {
    sensor_rail: Output<'d>,
    led: Output<'d>,
}

impl<'d> NodeHardware<'d> {
    pub fn new(sensor_rail: Output<'d>, led: Output<'d>) -> Self {
        Self { sensor_rail, led }
    }

    fn blink(&mut self, on: Duration, off: Duration) {
        self.led.set_high();
        block_for(on);
        self.led.set_low();
        block_for(off);
    }
}

impl SleepHardware for NodeHardware<'_> {
    type Resume = Infallible;

    fn configure_wake_input(&mut self, polarity: WakePolarity) {
        pac::PWR.scr().write(|w| w.0 = PWR_SCR_CWUF_ALL);
        pac::PWR.cr3().modify(|w| w.0 |= PWR_CR3_EWUP1 | PWR_CR3_APC);
        match polarity {
            WakePolarity::ActiveLow => {
                pac::PWR.cr4().modify(|w| w.0 |= PWR_CR4_WP1);
                pac::PWR.pucr(PWR_PORT_A).modify(|w| w.0 |= PWR_PIN_PA0);
                pac::PWR.pdcr(PWR_PORT_A).modify(|w| w.0 &= !PWR_PIN_PA0);
            }
            WakePolarity::ActiveHigh => {
                pac::PWR.cr4().modify(|w| w.0 &= !PWR_CR4_WP1);
                pac::PWR.pdcr(PWR_PORT_A).modify(|w| w.0 |= PWR_PIN_PA0);
                pac::PWR.pucr(PWR_PORT_A).modify(|w| w.0 &= !PWR_PIN_PA0);
            }
        }
    }

    fn power_down_peripherals(&mut self) {
        self.sensor_rail.set_low();
        self.led.set_low();
    }

    fn flush_output(&mut self) {
        block_for(TX_SETTLE);
    }

    fn enter_standby(&mut self) -> Infallible {
        pac::PWR
            .cr1()
            .modify(|w| w.0 = (w.0 & !PWR_CR1_LPMS_MASK) | PWR_CR1_LPMS_STANDBY);
        // SAFETY: single-threaded at this point; only SLEEPDEEP is touched.
        unsafe {
            let scb = &*cortex_m::peripheral::SCB::PTR;
            scb.scr.modify(|value| value | SCB_SCR_SLEEPDEEP);
        }
        cortex_m::asm::dsb();
        loop {
            cortex_m::asm::wfi();
        }
    }

    fn signal_fatal(&mut self) -> Infallible {
        defmt::error!("sleep: fatal, staying awake");
        loop {
            for _ in 0..3 {
                self.blink(Duration::from_millis(100), Duration::from_millis(100));
            }
            self.blink(Duration::from_millis(600), Duration::from_millis(1_000));
        }
    }
}
