//! Shared status surface for the console.
//!
//! [`StatusReport`] snapshots the lifecycle so the firmware and emulator
//! render the `status` command identically.

use core::fmt;
use core::time::Duration;

use crate::lifecycle::{LifecycleMachine, WakeCycleState};
use crate::telemetry::MonotonicInstant;

/// Point-in-time view of a wake cycle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StatusReport {
    pub state: WakeCycleState,
    pub battery_volts: Option<f32>,
    pub hibernating: bool,
    pub hibernate_notified: bool,
    pub wakeup_counter: u8,
    /// Threshold the wakeup counter is compared against.
    pub wakeups_per_advert: u8,
    pub sleep_interval_secs: u32,
    pub awake_for: Duration,
    pub rtc_wake: bool,
}

impl StatusReport {
    #[must_use]
    pub fn capture<I: MonotonicInstant>(machine: &LifecycleMachine<I>, now: I) -> Self {
        let retained = machine.retained();
        Self {
            state: machine.state(),
            battery_volts: machine.last_average(),
            hibernating: retained.hibernating,
            hibernate_notified: retained.hibernate_notified,
            wakeup_counter: retained.wakeup_counter(),
            wakeups_per_advert: machine.config().effective_wakeups_per_advert(),
            sleep_interval_secs: machine.sleep_interval(),
            awake_for: machine.awake_for(now),
            rtc_wake: machine.rtc_wake(),
        }
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "state={}", self.state)?;
        match self.battery_volts {
            Some(volts) => write!(f, " battery={volts:.2}V")?,
            None => f.write_str(" battery=pending")?,
        }
        write!(
            f,
            " hibernating={} notified={} wakeups={}/{} sleep={}s awake={}s wake={}",
            yes_no(self.hibernating),
            yes_no(self.hibernate_notified),
            self.wakeup_counter,
            self.wakeups_per_advert,
            self.sleep_interval_secs,
            self.awake_for.as_secs(),
            if self.rtc_wake { "rtc" } else { "reset" },
        )
    }
}

const fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
