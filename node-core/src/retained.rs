//! One-byte low-power state that survives the Standby power-domain reset.
//!
//! Layout (LSB first):
//!
//! | bits | field |
//! |------|-------|
//! | 0-5  | wakeup counter (saturates at 63) |
//! | 6    | hibernating |
//! | 7    | hibernate notification sent |
//!
//! A zero byte is what the backup domain holds after a cold boot, so it must
//! decode to the power-on default: counter 0, awake, nothing notified.

/// Largest value the six-bit wakeup counter can hold.
pub const MAX_WAKEUP_COUNTER: u8 = 0x3F;

const COUNTER_MASK: u8 = 0x3F;
const HIBERNATING_BIT: u8 = 1 << 6;
const NOTIFIED_BIT: u8 = 1 << 7;

/// Decoded view of the retained register.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RetainedState {
    wakeup_counter: u8,
    pub hibernating: bool,
    pub hibernate_notified: bool,
}

impl RetainedState {
    /// Builds a state, saturating the counter to its six-bit range.
    #[must_use]
    pub const fn new(wakeup_counter: u8, hibernating: bool, hibernate_notified: bool) -> Self {
        Self {
            wakeup_counter: if wakeup_counter > MAX_WAKEUP_COUNTER {
                MAX_WAKEUP_COUNTER
            } else {
                wakeup_counter
            },
            hibernating,
            hibernate_notified,
        }
    }

    #[must_use]
    pub const fn decode(raw: u8) -> Self {
        Self {
            wakeup_counter: raw & COUNTER_MASK,
            hibernating: raw & HIBERNATING_BIT != 0,
            hibernate_notified: raw & NOTIFIED_BIT != 0,
        }
    }

    #[must_use]
    pub const fn encode(self) -> u8 {
        let mut raw = self.wakeup_counter & COUNTER_MASK;
        if self.hibernating {
            raw |= HIBERNATING_BIT;
        }
        if self.hibernate_notified {
            raw |= NOTIFIED_BIT;
        }
        raw
    }

    #[must_use]
    pub const fn wakeup_counter(&self) -> u8 {
        self.wakeup_counter
    }

    /// Counts one more wake, holding at 63.
    pub fn increment_wakeups(&mut self) {
        if self.wakeup_counter < MAX_WAKEUP_COUNTER {
            self.wakeup_counter += 1;
        }
    }

    /// Takes back one counted wake.
    pub fn uncount_wakeup(&mut self) {
        self.wakeup_counter = self.wakeup_counter.saturating_sub(1);
    }

    pub fn reset_wakeups(&mut self) {
        self.wakeup_counter = 0;
    }
}

/// Storage that keeps the encoded state across Standby.
///
/// Firmware backs this with a TAMP backup register; tests and the emulator use
/// a plain byte.
pub trait RetainedRegister {
    fn read(&mut self) -> u8;
    fn write(&mut self, value: u8);

    /// Reads and decodes in one step.
    fn load(&mut self) -> RetainedState {
        RetainedState::decode(self.read())
    }

    /// Encodes and writes in one step.
    fn store(&mut self, state: RetainedState) {
        self.write(state.encode());
    }
}

impl RetainedRegister for u8 {
    fn read(&mut self) -> u8 {
        *self
    }

    fn write(&mut self, value: u8) {
        *self = value;
    }
}
