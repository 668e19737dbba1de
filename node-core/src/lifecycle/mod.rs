//! Per-wake state machine.
//!
//! Every wake starts in [`WakeCycleState::Sampling`] and ends in
//! [`WakeCycleState::ReadyToSleep`], at which point [`LifecycleMachine::poll`]
//! yields a [`CycleStep::Sleep`] and the outer loop hands the plan to the
//! sleep sequencer. The machine never blocks and never touches hardware
//! directly; battery and mesh access are passed in on each poll.
//!
//! ```text
//! Sampling ─► Processing ─┬─► HibernateEnter ──────────────┐
//!                         ├─► Hibernate ───────────────────┤
//!                         ├─► Advertising ─────────────────┼─► ReadyToSleep
//!                         └────────────────────────────────┘
//! any (but Interactive) ──safety timeout──────────────────────► ReadyToSleep
//! any (but ReadyToSleep) ──command──► Interactive ──timeout/exit──► ReadyToSleep
//! ```

mod samples;

use core::fmt;
use core::time::Duration;

pub use samples::SampleBuffer;

use crate::config::{ConfigError, NodeConfig};
use crate::hibernation::{HibernationDecision, HibernationPolicy, SleepIntervalTracker};
use crate::retained::RetainedState;
use crate::sleep::SleepPlan;
use crate::telemetry::{
    EventPayload, LifecycleEventKind, MonotonicInstant, TelemetryReading, TelemetryRecorder,
};

/// Stage of the current wake.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WakeCycleState {
    Sampling,
    Processing,
    Advertising,
    HibernateEnter,
    Hibernate,
    ReadyToSleep,
    Interactive,
}

impl fmt::Display for WakeCycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WakeCycleState::Sampling => "sampling",
            WakeCycleState::Processing => "processing",
            WakeCycleState::Advertising => "advertising",
            WakeCycleState::HibernateEnter => "hibernate-enter",
            WakeCycleState::Hibernate => "hibernate",
            WakeCycleState::ReadyToSleep => "ready-to-sleep",
            WakeCycleState::Interactive => "interactive",
        })
    }
}

/// Battery voltage source.
pub trait BatteryMonitor {
    fn battery_volts(&mut self) -> f32;
}

/// Mesh collaborator. Failures are recorded and the transmission skipped.
pub trait MeshLink {
    type Error;

    fn send_telemetry(&mut self, reading: &TelemetryReading) -> Result<(), Self::Error>;
    fn send_self_advertisement(&mut self, timeout: Duration) -> Result<(), Self::Error>;
}

/// What the outer loop should do after a poll.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CycleStep {
    /// Keep polling.
    Continue,
    /// Persist `retained`, then run the sleep sequencer with `plan`.
    Sleep {
        plan: SleepPlan,
        retained: RetainedState,
    },
}

/// Returned when `exit` arrives outside interactive mode.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ExitRejected;

impl fmt::Display for ExitRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Not in interactive mode")
    }
}

/// Owns everything a single wake needs.
pub struct LifecycleMachine<I>
where
    I: MonotonicInstant,
{
    config: NodeConfig,
    policy: HibernationPolicy,
    tracker: SleepIntervalTracker,
    retained: RetainedState,
    state: WakeCycleState,
    samples: SampleBuffer<I>,
    woke_at: I,
    last_activity: I,
    rtc_wake: bool,
    /// Hibernating wake whose `Remain` doubling has not run yet.
    remain_pending: bool,
    last_average: Option<f32>,
    telemetry: TelemetryRecorder<I>,
}

impl<I> LifecycleMachine<I>
where
    I: MonotonicInstant,
{
    /// Starts a wake cycle from the persisted state.
    ///
    /// Counts the wake and, when hibernating, restores the interval the
    /// previous hibernating wake slept for. A hibernating wake that ends
    /// before doubling its interval is uncounted again on the way to sleep.
    pub fn wake(
        config: NodeConfig,
        retained: RetainedState,
        woke_at: I,
        rtc_wake: bool,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let policy = HibernationPolicy::from_config(&config)?;

        let mut retained = retained;
        retained.increment_wakeups();

        let mut tracker = SleepIntervalTracker::from_config(&config);
        if retained.hibernating {
            tracker.restore(retained.wakeup_counter());
        }

        let mut machine = Self {
            config,
            policy,
            tracker,
            retained,
            state: WakeCycleState::Sampling,
            samples: SampleBuffer::new(config.sample_count),
            woke_at,
            last_activity: woke_at,
            rtc_wake,
            remain_pending: retained.hibernating,
            last_average: None,
            telemetry: TelemetryRecorder::new(),
        };

        machine.telemetry.record(
            LifecycleEventKind::WakeStarted,
            EventPayload::Wake {
                rtc_wake,
                wakeup_counter: retained.wakeup_counter(),
                hibernating: retained.hibernating,
            },
            woke_at,
        );
        machine.enter(WakeCycleState::Sampling, woke_at);
        Ok(machine)
    }

    /// Advances the machine by at most one state.
    pub fn poll<B, M>(&mut self, now: I, battery: &mut B, mesh: &mut M) -> CycleStep
    where
        B: BatteryMonitor,
        M: MeshLink,
    {
        if !matches!(
            self.state,
            WakeCycleState::Interactive | WakeCycleState::ReadyToSleep
        ) && now.saturating_duration_since(self.woke_at) > self.config.max_awake
        {
            self.telemetry
                .record_elapsed(LifecycleEventKind::SafetyTimeout, self.woke_at, now);
            self.enter(WakeCycleState::ReadyToSleep, now);
        }

        match self.state {
            WakeCycleState::Sampling => {
                if self.samples.is_due(now, self.config.sample_interval)
                    && self.samples.push(battery.battery_volts(), now)
                {
                    self.enter(WakeCycleState::Processing, now);
                }
            }
            WakeCycleState::Processing => self.process(now, mesh),
            WakeCycleState::HibernateEnter => {
                let volts = self.last_average.unwrap_or_default();
                let reading = TelemetryReading::battery(volts).with_hibernate_flag(true);
                if self.send_reading(&reading, now, mesh) {
                    self.retained.hibernate_notified = true;
                }
                self.enter(WakeCycleState::ReadyToSleep, now);
            }
            WakeCycleState::Hibernate => {
                self.tracker.apply(HibernationDecision::Remain);
                self.remain_pending = false;
                self.enter(WakeCycleState::ReadyToSleep, now);
            }
            WakeCycleState::Advertising => {
                match mesh.send_self_advertisement(self.config.advert_timeout) {
                    Ok(()) => self.telemetry.record_event(LifecycleEventKind::AdvertSent, now),
                    Err(_) => self
                        .telemetry
                        .record_event(LifecycleEventKind::AdvertFailed, now),
                };
                self.retained.reset_wakeups();
                self.enter(WakeCycleState::ReadyToSleep, now);
            }
            WakeCycleState::Interactive => {
                if now.saturating_duration_since(self.last_activity)
                    >= self.config.interactive_timeout
                {
                    self.telemetry.record_elapsed(
                        LifecycleEventKind::InteractiveTimeout,
                        self.last_activity,
                        now,
                    );
                    self.enter(WakeCycleState::ReadyToSleep, now);
                }
            }
            WakeCycleState::ReadyToSleep => {}
        }

        if self.state == WakeCycleState::ReadyToSleep {
            CycleStep::Sleep {
                plan: self.sleep_plan(),
                retained: self.retained,
            }
        } else {
            CycleStep::Continue
        }
    }

    /// Notes an operator command.
    ///
    /// The first command of a wake switches to interactive mode unless the
    /// node is already committed to sleeping; later ones refresh the
    /// inactivity timer.
    pub fn note_command(&mut self, now: I) {
        match self.state {
            WakeCycleState::ReadyToSleep => {}
            WakeCycleState::Interactive => self.last_activity = now,
            _ => {
                self.last_activity = now;
                self.telemetry
                    .record_event(LifecycleEventKind::InteractiveEntered, now);
                self.enter(WakeCycleState::Interactive, now);
            }
        }
    }

    /// Leaves interactive mode for sleep.
    pub fn exit_interactive(&mut self, now: I) -> Result<(), ExitRejected> {
        if self.state != WakeCycleState::Interactive {
            return Err(ExitRejected);
        }
        self.telemetry
            .record_event(LifecycleEventKind::InteractiveExited, now);
        self.enter(WakeCycleState::ReadyToSleep, now);
        Ok(())
    }

    /// Edits the configuration through a validated setter.
    ///
    /// The hibernation policy and interval tracker are rebuilt from the new
    /// values; on error nothing changes.
    pub fn update_config<F>(&mut self, edit: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut NodeConfig) -> Result<(), ConfigError>,
    {
        let mut candidate = self.config;
        edit(&mut candidate)?;
        candidate.validate()?;
        let policy = HibernationPolicy::from_config(&candidate)?;

        let mut tracker = SleepIntervalTracker::from_config(&candidate);
        if self.retained.hibernating {
            tracker.restore(self.retained.wakeup_counter());
        }

        self.config = candidate;
        self.policy = policy;
        self.tracker = tracker;
        Ok(())
    }

    #[must_use]
    pub const fn state(&self) -> WakeCycleState {
        self.state
    }

    #[must_use]
    pub const fn retained(&self) -> RetainedState {
        self.retained
    }

    /// Interval the node will sleep for if it slept now.
    #[must_use]
    pub const fn sleep_interval(&self) -> u32 {
        self.tracker.current_secs()
    }

    #[must_use]
    pub const fn config(&self) -> &NodeConfig {
        &self.config
    }

    #[must_use]
    pub const fn telemetry(&self) -> &TelemetryRecorder<I> {
        &self.telemetry
    }

    #[must_use]
    pub const fn rtc_wake(&self) -> bool {
        self.rtc_wake
    }

    /// Averaged battery reading of this wake, once processed.
    #[must_use]
    pub const fn last_average(&self) -> Option<f32> {
        self.last_average
    }

    #[must_use]
    pub fn awake_for(&self, now: I) -> Duration {
        now.saturating_duration_since(self.woke_at)
    }

    fn process<M: MeshLink>(&mut self, now: I, mesh: &mut M) {
        let Some(volts) = self.samples.average() else {
            self.enter(WakeCycleState::Sampling, now);
            return;
        };
        self.last_average = Some(volts);
        self.telemetry.record_battery(volts, now);

        let evaluation = self.policy.evaluate(
            volts,
            self.retained.hibernating,
            self.retained.hibernate_notified,
        );
        self.telemetry.record_event(
            LifecycleEventKind::HibernationEvaluated(evaluation.decision),
            now,
        );

        match evaluation.decision {
            HibernationDecision::Enter => {
                self.retained.hibernating = true;
                self.retained.hibernate_notified = false;
                self.retained.reset_wakeups();
                self.tracker.apply(HibernationDecision::Enter);
                self.enter(WakeCycleState::HibernateEnter, now);
            }
            HibernationDecision::Remain => self.enter(WakeCycleState::Hibernate, now),
            HibernationDecision::Exit => {
                self.retained.hibernating = false;
                self.retained.hibernate_notified = false;
                self.tracker.apply(HibernationDecision::Exit);
                let reading = TelemetryReading::battery(volts).with_hibernate_flag(false);
                self.send_reading(&reading, now, mesh);
                self.after_transmission(now);
            }
            HibernationDecision::Normal => {
                self.tracker.apply(HibernationDecision::Normal);
                self.send_reading(&TelemetryReading::battery(volts), now, mesh);
                self.after_transmission(now);
            }
        }
    }

    fn after_transmission(&mut self, now: I) {
        if self.retained.wakeup_counter() >= self.config.effective_wakeups_per_advert() {
            self.enter(WakeCycleState::Advertising, now);
        } else {
            self.enter(WakeCycleState::ReadyToSleep, now);
        }
    }

    fn send_reading<M: MeshLink>(
        &mut self,
        reading: &TelemetryReading,
        now: I,
        mesh: &mut M,
    ) -> bool {
        match mesh.send_telemetry(reading) {
            Ok(()) => {
                self.telemetry
                    .record_event(LifecycleEventKind::TelemetrySent, now);
                true
            }
            Err(_) => {
                self.telemetry
                    .record_event(LifecycleEventKind::TelemetryFailed, now);
                false
            }
        }
    }

    fn sleep_plan(&self) -> SleepPlan {
        SleepPlan {
            seconds: self.tracker.current_secs(),
        }
    }

    fn enter(&mut self, state: WakeCycleState, now: I) {
        self.state = state;
        self.telemetry
            .record_event(LifecycleEventKind::StateEntered(state), now);
        match state {
            WakeCycleState::Sampling => self.samples.reset(),
            WakeCycleState::ReadyToSleep => {
                if self.remain_pending && self.retained.hibernating {
                    self.retained.uncount_wakeup();
                    self.remain_pending = false;
                }
                self.telemetry.record(
                    LifecycleEventKind::SleepPlanned,
                    EventPayload::Sleep {
                        seconds: self.tracker.current_secs(),
                    },
                    now,
                );
            }
            _ => {}
        }
    }
}
