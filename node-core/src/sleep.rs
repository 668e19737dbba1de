//! Ordered transition from an awake MCU into Standby.
//!
//! The sequence is fixed: arm the RTC, configure the wake input, power down
//! peripherals, flush pending output, halt. Standby ends in a reset, so on
//! real hardware [`SleepHardware::enter_standby`] cannot return and its
//! `Resume` type is uninhabited.

use core::fmt;

use crate::rtc::{RtcError, WakePolarity, WakeSource};

/// Interval armed when the requested one could not be programmed.
pub const FALLBACK_SLEEP_SECS: u32 = 60;

/// Everything the sequencer needs to put the node to sleep.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SleepPlan {
    pub seconds: u32,
}

/// Board operations used while entering Standby.
pub trait SleepHardware {
    /// Value produced if the hardware ever returns from a halt.
    type Resume;

    fn configure_wake_input(&mut self, polarity: WakePolarity);
    fn power_down_peripherals(&mut self);
    fn flush_output(&mut self);
    fn enter_standby(&mut self) -> Self::Resume;

    /// Shows the fatal indicator instead of sleeping.
    fn signal_fatal(&mut self) -> Self::Resume;
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SleepError<E> {
    /// Both the requested and the fallback alarm failed to arm.
    ArmFailed(RtcError<E>),
}

impl<E: fmt::Debug> fmt::Display for SleepError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SleepError::ArmFailed(error) => write!(f, "unable to arm wake alarm: {error}"),
        }
    }
}

/// Result of arming, kept for logging by the caller.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ArmedAlarm {
    pub requested_secs: u32,
    pub armed_secs: u32,
    /// The request exceeded [`WakeSource::max_alarm_seconds`] and was cut to it.
    pub clamped: bool,
    pub used_fallback: bool,
}

pub struct SleepSequencer<'a, W, H> {
    rtc: &'a mut W,
    hardware: &'a mut H,
    last_armed: Option<ArmedAlarm>,
}

impl<'a, W, H> SleepSequencer<'a, W, H>
where
    W: WakeSource,
    H: SleepHardware,
{
    pub fn new(rtc: &'a mut W, hardware: &'a mut H) -> Self {
        Self {
            rtc,
            hardware,
            last_armed: None,
        }
    }

    /// Arms the wake source, retrying once with [`FALLBACK_SLEEP_SECS`].
    ///
    /// Requests longer than the source's range are clamped to its maximum.
    pub fn arm(&mut self, seconds: u32) -> Result<ArmedAlarm, SleepError<W::Error>> {
        let limit = self.rtc.max_alarm_seconds();
        let clamped = seconds > limit;
        let armed = match self.rtc.set_alarm(seconds.min(limit)) {
            Ok(armed_secs) => ArmedAlarm {
                requested_secs: seconds,
                armed_secs,
                clamped,
                used_fallback: false,
            },
            Err(_) => match self.rtc.set_alarm(FALLBACK_SLEEP_SECS) {
                Ok(armed_secs) => ArmedAlarm {
                    requested_secs: seconds,
                    armed_secs,
                    clamped,
                    used_fallback: true,
                },
                Err(error) => return Err(SleepError::ArmFailed(error)),
            },
        };
        self.last_armed = Some(armed);
        Ok(armed)
    }

    /// Runs the full sequence. Only returns on mock hardware or on failure.
    pub fn enter_sleep(&mut self, plan: SleepPlan) -> Result<H::Resume, SleepError<W::Error>> {
        self.arm(plan.seconds)?;
        self.hardware.configure_wake_input(self.rtc.polarity());
        self.hardware.power_down_peripherals();
        self.hardware.flush_output();
        Ok(self.hardware.enter_standby())
    }

    /// Gives up on sleeping and shows the fatal indicator.
    pub fn fail(&mut self) -> H::Resume {
        self.hardware.signal_fatal()
    }

    #[must_use]
    pub const fn last_armed(&self) -> Option<ArmedAlarm> {
        self.last_armed
    }
}

#[cfg(test)]
mod tests {
    use heapless::Vec;

    use super::*;

    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    enum Step {
        Arm(u32),
        WakeInput(WakePolarity),
        PowerDown,
        Flush,
        Standby,
        Fatal,
    }

    #[derive(Default)]
    struct Log(Vec<Step, 16>);

    impl Log {
        fn push(&mut self, step: Step) {
            self.0.push(step).expect("log capacity");
        }
    }

    struct MockRtc<'a> {
        log: &'a core::cell::RefCell<Log>,
        failures: u8,
    }

    impl WakeSource for MockRtc<'_> {
        type Error = ();

        fn check_wakeup(&mut self) -> Result<bool, RtcError<()>> {
            Ok(false)
        }

        fn set_alarm(&mut self, seconds: u32) -> Result<u32, RtcError<()>> {
            self.log.borrow_mut().push(Step::Arm(seconds));
            if self.failures > 0 {
                self.failures -= 1;
                return Err(RtcError::Bus(()));
            }
            Ok(seconds)
        }

        fn polarity(&self) -> WakePolarity {
            WakePolarity::ActiveLow
        }

        fn max_alarm_seconds(&self) -> u32 {
            86_400
        }
    }

    struct MockHardware<'a> {
        log: &'a core::cell::RefCell<Log>,
    }

    impl SleepHardware for MockHardware<'_> {
        type Resume = ();

        fn configure_wake_input(&mut self, polarity: WakePolarity) {
            self.log.borrow_mut().push(Step::WakeInput(polarity));
        }

        fn power_down_peripherals(&mut self) {
            self.log.borrow_mut().push(Step::PowerDown);
        }

        fn flush_output(&mut self) {
            self.log.borrow_mut().push(Step::Flush);
        }

        fn enter_standby(&mut self) {
            self.log.borrow_mut().push(Step::Standby);
        }

        fn signal_fatal(&mut self) {
            self.log.borrow_mut().push(Step::Fatal);
        }
    }

    fn run(failures: u8) -> (Result<(), SleepError<()>>, Option<ArmedAlarm>, Log) {
        run_plan(failures, 600)
    }

    fn run_plan(
        failures: u8,
        seconds: u32,
    ) -> (Result<(), SleepError<()>>, Option<ArmedAlarm>, Log) {
        let log = core::cell::RefCell::new(Log::default());
        let mut rtc = MockRtc {
            log: &log,
            failures,
        };
        let mut hardware = MockHardware { log: &log };
        let mut sequencer = SleepSequencer::new(&mut rtc, &mut hardware);
        let result = sequencer.enter_sleep(SleepPlan { seconds });
        if result.is_err() {
            sequencer.fail();
        }
        let armed = sequencer.last_armed();
        (result, armed, log.into_inner())
    }

    #[test]
    fn steps_run_in_order() {
        let (result, armed, log) = run(0);
        assert_eq!(result, Ok(()));
        assert_eq!(
            log.0.as_slice(),
            &[
                Step::Arm(600),
                Step::WakeInput(WakePolarity::ActiveLow),
                Step::PowerDown,
                Step::Flush,
                Step::Standby,
            ]
        );
        assert_eq!(
            armed,
            Some(ArmedAlarm {
                requested_secs: 600,
                armed_secs: 600,
                clamped: false,
                used_fallback: false
            })
        );
    }

    #[test]
    fn request_beyond_source_range_is_clamped() {
        let (result, armed, log) = run_plan(0, 100_000);
        assert_eq!(result, Ok(()));
        assert_eq!(log.0[0], Step::Arm(86_400));
        assert_eq!(
            armed,
            Some(ArmedAlarm {
                requested_secs: 100_000,
                armed_secs: 86_400,
                clamped: true,
                used_fallback: false
            })
        );
    }

    #[test]
    fn failed_arm_retries_with_fallback_interval() {
        let (result, armed, log) = run(1);
        assert_eq!(result, Ok(()));
        assert_eq!(log.0[0], Step::Arm(600));
        assert_eq!(log.0[1], Step::Arm(FALLBACK_SLEEP_SECS));
        assert_eq!(log.0.last(), Some(&Step::Standby));
        assert!(armed.is_some_and(|a| a.used_fallback && a.armed_secs == 60));
    }

    #[test]
    fn double_failure_never_sleeps() {
        let (result, armed, log) = run(2);
        assert_eq!(result, Err(SleepError::ArmFailed(RtcError::Bus(()))));
        assert!(armed.is_none());
        assert_eq!(
            log.0.as_slice(),
            &[Step::Arm(600), Step::Arm(FALLBACK_SLEEP_SECS), Step::Fatal]
        );
    }
}
