//! Battery hibernation policy and the adaptive sleep interval.
//!
//! The policy is a two-threshold hysteresis: a node enters hibernation below
//! the enter threshold and only leaves it above the (strictly higher) exit
//! threshold. Readings in the band between them never change state.

use crate::config::{ConfigError, NodeConfig, check_hysteresis};

/// Outcome of evaluating one averaged battery reading.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HibernationDecision {
    /// Not hibernating and the battery is healthy.
    Normal,
    /// Battery dropped below the enter threshold.
    Enter,
    /// Still hibernating; keep backing off.
    Remain,
    /// Battery recovered above the exit threshold.
    Exit,
}

/// Decision plus whether the mesh should hear about it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Evaluation {
    pub decision: HibernationDecision,
    pub notify: bool,
}

/// Hysteresis thresholds, in volts.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct HibernationPolicy {
    enter_volts: f32,
    exit_volts: f32,
}

impl HibernationPolicy {
    /// Builds a policy from millivolt thresholds, rejecting bands under 100 mV.
    pub fn new(enter_mv: u16, exit_mv: u16) -> Result<Self, ConfigError> {
        check_hysteresis(enter_mv, exit_mv)?;
        Ok(Self {
            enter_volts: f32::from(enter_mv) / 1_000.0,
            exit_volts: f32::from(exit_mv) / 1_000.0,
        })
    }

    pub fn from_config(config: &NodeConfig) -> Result<Self, ConfigError> {
        Self::new(config.hibernate_enter_mv, config.hibernate_exit_mv)
    }

    /// Applies the rules in order; the first match wins.
    ///
    /// `notified` is accepted for callers that track it but does not gate a
    /// transition: entry and exit each notify exactly once because they are
    /// edges of the `hibernating` flag.
    #[must_use]
    pub fn evaluate(&self, volts: f32, hibernating: bool, _notified: bool) -> Evaluation {
        if !hibernating && volts < self.enter_volts {
            Evaluation {
                decision: HibernationDecision::Enter,
                notify: true,
            }
        } else if hibernating && volts > self.exit_volts {
            Evaluation {
                decision: HibernationDecision::Exit,
                notify: true,
            }
        } else if hibernating {
            Evaluation {
                decision: HibernationDecision::Remain,
                notify: false,
            }
        } else {
            Evaluation {
                decision: HibernationDecision::Normal,
                notify: false,
            }
        }
    }
}

/// Volatile sleep interval state, rebuilt every wake.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SleepIntervalTracker {
    base_secs: u32,
    current_secs: u32,
    max_secs: u32,
}

impl SleepIntervalTracker {
    #[must_use]
    pub fn new(base_secs: u32, max_secs: u32) -> Self {
        let max_secs = max_secs.max(base_secs);
        Self {
            base_secs,
            current_secs: base_secs,
            max_secs,
        }
    }

    #[must_use]
    pub fn from_config(config: &NodeConfig) -> Self {
        Self::new(config.sleep_interval_secs, config.max_hibernate_sleep_secs)
    }

    /// Re-derives the interval of the previous hibernating wake.
    ///
    /// `hibernating_wakes` counts consecutive wakes spent hibernating,
    /// including the current one. With `k` such wakes the previous interval
    /// was `base * 2^(k-1)`, capped; the next [`apply`](Self::apply) of
    /// `Remain` doubles it again.
    pub fn restore(&mut self, hibernating_wakes: u8) {
        let mut interval = self.base_secs;
        for _ in 1..hibernating_wakes {
            interval = double_capped(interval, self.max_secs);
            if interval == self.max_secs {
                break;
            }
        }
        self.current_secs = interval;
    }

    /// Updates the interval for a decision and returns it.
    pub fn apply(&mut self, decision: HibernationDecision) -> u32 {
        match decision {
            HibernationDecision::Exit | HibernationDecision::Normal => {
                self.current_secs = self.base_secs;
            }
            HibernationDecision::Remain => {
                self.current_secs = double_capped(self.current_secs, self.max_secs);
            }
            HibernationDecision::Enter => {}
        }
        self.current_secs
    }

    #[must_use]
    pub const fn current_secs(&self) -> u32 {
        self.current_secs
    }

    #[must_use]
    pub const fn base_secs(&self) -> u32 {
        self.base_secs
    }

    #[must_use]
    pub const fn max_secs(&self) -> u32 {
        self.max_secs
    }
}

fn double_capped(interval: u32, max: u32) -> u32 {
    interval.saturating_mul(2).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> HibernationPolicy {
        HibernationPolicy::new(3_000, 3_100).expect("valid thresholds")
    }

    #[test]
    fn rules_apply_in_order() {
        let policy = policy();

        let enter = policy.evaluate(2.95, false, false);
        assert_eq!(enter.decision, HibernationDecision::Enter);
        assert!(enter.notify);

        let exit = policy.evaluate(3.15, true, true);
        assert_eq!(exit.decision, HibernationDecision::Exit);
        assert!(exit.notify);

        let remain = policy.evaluate(2.90, true, true);
        assert_eq!(remain.decision, HibernationDecision::Remain);
        assert!(!remain.notify);

        let normal = policy.evaluate(3.75, false, false);
        assert_eq!(normal.decision, HibernationDecision::Normal);
        assert!(!normal.notify);
    }

    #[test]
    fn readings_inside_the_band_never_change_state() {
        let policy = policy();
        for volts in [3.0, 3.02, 3.05, 3.08, 3.1] {
            assert_eq!(
                policy.evaluate(volts, false, false).decision,
                HibernationDecision::Normal
            );
            assert_eq!(
                policy.evaluate(volts, true, true).decision,
                HibernationDecision::Remain
            );
        }
    }

    #[test]
    fn narrow_band_is_rejected() {
        assert!(HibernationPolicy::new(3_000, 3_099).is_err());
        assert!(HibernationPolicy::new(3_100, 3_000).is_err());
    }

    #[test]
    fn remain_doubles_until_the_cap() {
        let mut tracker = SleepIntervalTracker::new(300, 21_600);
        assert_eq!(tracker.apply(HibernationDecision::Enter), 300);

        let mut seen = heapless::Vec::<u32, 16>::new();
        for _ in 0..10 {
            seen.push(tracker.apply(HibernationDecision::Remain)).expect("capacity");
        }
        assert_eq!(
            seen.as_slice(),
            &[600, 1_200, 2_400, 4_800, 9_600, 19_200, 21_600, 21_600, 21_600, 21_600]
        );

        assert_eq!(tracker.apply(HibernationDecision::Exit), 300);
        assert_eq!(tracker.apply(HibernationDecision::Normal), 300);
    }

    #[test]
    fn restore_rebuilds_previous_interval() {
        let mut tracker = SleepIntervalTracker::new(300, 21_600);

        tracker.restore(1);
        assert_eq!(tracker.current_secs(), 300);
        assert_eq!(tracker.apply(HibernationDecision::Remain), 600);

        tracker.restore(2);
        assert_eq!(tracker.current_secs(), 600);
        assert_eq!(tracker.apply(HibernationDecision::Remain), 1_200);

        tracker.restore(63);
        assert_eq!(tracker.current_secs(), 21_600);
        assert_eq!(tracker.apply(HibernationDecision::Remain), 21_600);
    }

    #[test]
    fn cap_never_drops_below_base() {
        let tracker = SleepIntervalTracker::new(7_200, 3_600);
        assert_eq!(tracker.max_secs(), 7_200);
    }
}
