//! Node configuration consumed by the lifecycle controller.
//!
//! Values arrive from the operator surface (serial console) or compiled-in
//! defaults. The lifecycle treats [`NodeConfig`] as read-only for the duration
//! of a wake cycle; the command dispatcher edits it through the validated
//! setters below so an out-of-range value can never reach the state machine.

use core::fmt;
use core::time::Duration;

use crate::retained::MAX_WAKEUP_COUNTER;

/// Upper bound on the number of battery samples averaged per wake.
pub const MAX_SAMPLES: usize = 16;

/// Spacing between consecutive battery samples.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);
/// Number of samples averaged before processing.
pub const DEFAULT_SAMPLE_COUNT: u8 = 10;
/// Hard ceiling on time spent awake outside interactive mode.
pub const DEFAULT_MAX_AWAKE: Duration = Duration::from_secs(5 * 60);
/// Idle period after which interactive mode gives up and sleeps.
pub const DEFAULT_INTERACTIVE_TIMEOUT: Duration = Duration::from_secs(60);
/// Wakes between self-advertisements.
pub const DEFAULT_WAKEUPS_PER_ADVERT: u8 = 12;
/// Battery level below which hibernation starts.
pub const DEFAULT_HIBERNATE_ENTER_MV: u16 = 3_000;
/// Battery level above which hibernation ends.
pub const DEFAULT_HIBERNATE_EXIT_MV: u16 = 3_100;
/// Normal sleep interval between wakes.
pub const DEFAULT_SLEEP_INTERVAL_SECS: u32 = 300;
/// Longest sleep allowed while hibernating.
pub const DEFAULT_MAX_HIBERNATE_SLEEP_SECS: u32 = 21_600;
/// Time budget handed to the mesh layer for a self-advertisement.
pub const DEFAULT_ADVERT_TIMEOUT: Duration = Duration::from_millis(16_000);

/// Minimum gap between the enter and exit thresholds.
pub const MIN_HYSTERESIS_MV: u16 = 100;
/// Bounds accepted for the hibernation sleep cap.
pub const MAX_HIBERNATE_SLEEP_RANGE: core::ops::RangeInclusive<u32> = 3_600..=86_400;
/// Bounds accepted for the advertisement threshold.
pub const WAKEUPS_PER_ADVERT_RANGE: core::ops::RangeInclusive<u8> = 1..=255;

/// Reasons a configuration value was rejected.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Sleep interval must be at least one second.
    SleepIntervalZero,
    /// Advertisement threshold outside 1-255.
    WakeupsPerAdvertOutOfRange,
    /// Hibernation cap outside 3600-86400 seconds.
    MaxHibernateOutOfRange,
    /// Hibernation cap shorter than the base interval.
    MaxHibernateBelowBase,
    /// Enter/exit thresholds are equal, inverted, or closer than 100 mV.
    HysteresisTooNarrow,
    /// Sample count is zero or exceeds [`MAX_SAMPLES`].
    SampleCountOutOfRange,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::SleepIntervalZero => f.write_str("sleep interval must be >= 1s"),
            ConfigError::WakeupsPerAdvertOutOfRange => {
                f.write_str("advert wakeups must be 1-255")
            }
            ConfigError::MaxHibernateOutOfRange => {
                f.write_str("hibernate max must be 3600-86400s")
            }
            ConfigError::MaxHibernateBelowBase => {
                f.write_str("hibernate max must not be below the sleep interval")
            }
            ConfigError::HysteresisTooNarrow => {
                f.write_str("exit threshold must exceed enter threshold by >= 100mV")
            }
            ConfigError::SampleCountOutOfRange => f.write_str("sample count must be 1-16"),
        }
    }
}

/// Configuration values read by the lifecycle controller.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct NodeConfig {
    pub sample_interval: Duration,
    pub sample_count: u8,
    pub max_awake: Duration,
    pub interactive_timeout: Duration,
    pub wakeups_per_advert: u8,
    pub hibernate_enter_mv: u16,
    pub hibernate_exit_mv: u16,
    pub sleep_interval_secs: u32,
    pub max_hibernate_sleep_secs: u32,
    pub advert_timeout: Duration,
}

impl NodeConfig {
    /// Compiled-in defaults.
    pub const fn new() -> Self {
        Self {
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            sample_count: DEFAULT_SAMPLE_COUNT,
            max_awake: DEFAULT_MAX_AWAKE,
            interactive_timeout: DEFAULT_INTERACTIVE_TIMEOUT,
            wakeups_per_advert: DEFAULT_WAKEUPS_PER_ADVERT,
            hibernate_enter_mv: DEFAULT_HIBERNATE_ENTER_MV,
            hibernate_exit_mv: DEFAULT_HIBERNATE_EXIT_MV,
            sleep_interval_secs: DEFAULT_SLEEP_INTERVAL_SECS,
            max_hibernate_sleep_secs: DEFAULT_MAX_HIBERNATE_SLEEP_SECS,
            advert_timeout: DEFAULT_ADVERT_TIMEOUT,
        }
    }

    /// Checks every cross-field invariant.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sleep_interval_secs == 0 {
            return Err(ConfigError::SleepIntervalZero);
        }
        if !WAKEUPS_PER_ADVERT_RANGE.contains(&self.wakeups_per_advert) {
            return Err(ConfigError::WakeupsPerAdvertOutOfRange);
        }
        if !MAX_HIBERNATE_SLEEP_RANGE.contains(&self.max_hibernate_sleep_secs) {
            return Err(ConfigError::MaxHibernateOutOfRange);
        }
        if self.max_hibernate_sleep_secs < self.sleep_interval_secs {
            return Err(ConfigError::MaxHibernateBelowBase);
        }
        if self.sample_count == 0 || usize::from(self.sample_count) > MAX_SAMPLES {
            return Err(ConfigError::SampleCountOutOfRange);
        }
        check_hysteresis(self.hibernate_enter_mv, self.hibernate_exit_mv)
    }

    /// Updates the base sleep interval.
    pub fn set_sleep_interval(&mut self, seconds: u32) -> Result<(), ConfigError> {
        let mut candidate = *self;
        candidate.sleep_interval_secs = seconds;
        candidate.validate()?;
        *self = candidate;
        Ok(())
    }

    /// Updates how many wakes pass between advertisements.
    pub fn set_wakeups_per_advert(&mut self, count: u32) -> Result<(), ConfigError> {
        let count = u8::try_from(count).map_err(|_| ConfigError::WakeupsPerAdvertOutOfRange)?;
        let mut candidate = *self;
        candidate.wakeups_per_advert = count;
        candidate.validate()?;
        *self = candidate;
        Ok(())
    }

    /// Updates the cap applied to the hibernation sleep interval.
    pub fn set_max_hibernate_sleep(&mut self, seconds: u32) -> Result<(), ConfigError> {
        let mut candidate = *self;
        candidate.max_hibernate_sleep_secs = seconds;
        candidate.validate()?;
        *self = candidate;
        Ok(())
    }

    /// Advertisement threshold the retained wakeup counter can reach.
    ///
    /// The counter holds at 63, so larger thresholds advertise every 63 wakes.
    #[must_use]
    pub const fn effective_wakeups_per_advert(&self) -> u8 {
        if self.wakeups_per_advert > MAX_WAKEUP_COUNTER {
            MAX_WAKEUP_COUNTER
        } else {
            self.wakeups_per_advert
        }
    }

    /// Applies operator preferences on top of the current values.
    ///
    /// Invalid preference sets are ignored and the current values kept.
    pub fn with_preferences(self, prefs: StoredPreferences) -> Self {
        let mut candidate = self;
        candidate.sleep_interval_secs = prefs.sleep_interval_secs;
        candidate.wakeups_per_advert = prefs.wakeups_per_advert;
        candidate.max_hibernate_sleep_secs = prefs.max_hibernate_sleep_secs;
        if candidate.validate().is_ok() {
            candidate
        } else {
            self
        }
    }

    /// Operator-editable subset of the configuration.
    pub const fn preferences(&self) -> StoredPreferences {
        StoredPreferences {
            sleep_interval_secs: self.sleep_interval_secs,
            wakeups_per_advert: self.wakeups_per_advert,
            max_hibernate_sleep_secs: self.max_hibernate_sleep_secs,
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Rejects threshold pairs that would let the policy oscillate.
pub const fn check_hysteresis(enter_mv: u16, exit_mv: u16) -> Result<(), ConfigError> {
    if exit_mv <= enter_mv || exit_mv - enter_mv < MIN_HYSTERESIS_MV {
        Err(ConfigError::HysteresisTooNarrow)
    } else {
        Ok(())
    }
}

/// Operator preferences packed into two 32-bit retained words.
///
/// Word 0 holds the sleep interval in seconds. Word 1 holds the advertisement
/// threshold in bits 0-7 and the hibernation cap in bits 8-31. All-zero words
/// (power-on reset) decode to `None` so callers fall back to defaults.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StoredPreferences {
    pub sleep_interval_secs: u32,
    pub wakeups_per_advert: u8,
    pub max_hibernate_sleep_secs: u32,
}

impl StoredPreferences {
    const CAP_SHIFT: u32 = 8;
    const CAP_MASK: u32 = 0x00FF_FFFF;

    /// Packs the preferences into backup-register words.
    pub const fn to_words(self) -> [u32; 2] {
        [
            self.sleep_interval_secs,
            u32::from_le_bytes([self.wakeups_per_advert, 0, 0, 0])
                | ((self.max_hibernate_sleep_secs & Self::CAP_MASK) << Self::CAP_SHIFT),
        ]
    }

    /// Unpacks backup-register words, returning `None` for a cleared domain.
    pub fn from_words(words: [u32; 2]) -> Option<Self> {
        if words == [0, 0] {
            return None;
        }

        let [interval, packed] = words;
        Some(Self {
            sleep_interval_secs: interval,
            wakeups_per_advert: packed.to_le_bytes()[0],
            max_hibernate_sleep_secs: (packed >> Self::CAP_SHIFT) & Self::CAP_MASK,
        })
    }
}
