//! Lifecycle event log and the readings handed to the mesh.
//!
//! The controller never prints. Every notable transition is recorded into a
//! fixed-size ring with a monotonically increasing [`EventId`]; the firmware
//! drains new records through `defmt` and the emulator prints them to stdout.

use core::{fmt, time::Duration};

use heapless::{HistoryBuf, OldestOrdered, Vec};

use crate::hibernation::HibernationDecision;
use crate::lifecycle::WakeCycleState;

/// CayenneLPP channel carrying the averaged battery voltage.
pub const CHANNEL_BATTERY: u8 = 1;
/// CayenneLPP channel carrying the hibernation flag (0 or 1).
pub const CHANNEL_HIBERNATE: u8 = 2;

/// Maximum channels carried by one [`TelemetryReading`].
pub const MAX_READING_CHANNELS: usize = 4;

/// Total number of lifecycle records retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 64;

/// Sequential identifier assigned to every record.
pub type EventId = u32;

/// Monotonic clock reading used to timestamp records and measure wake time.
pub trait MonotonicInstant: Copy {
    /// Returns the saturating duration from `earlier` to `self`.
    fn saturating_duration_since(&self, earlier: Self) -> Duration;
}

/// One value on one telemetry channel.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ChannelValue {
    Voltage(f32),
    Digital(u8),
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ChannelReading {
    pub channel: u8,
    pub value: ChannelValue,
}

/// Payload handed to [`MeshLink::send_telemetry`](crate::lifecycle::MeshLink::send_telemetry).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TelemetryReading {
    channels: Vec<ChannelReading, MAX_READING_CHANNELS>,
}

impl TelemetryReading {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            channels: Vec::new(),
        }
    }

    /// Battery voltage on channel 1.
    #[must_use]
    pub fn battery(volts: f32) -> Self {
        let mut reading = Self::new();
        reading.push(CHANNEL_BATTERY, ChannelValue::Voltage(volts));
        reading
    }

    /// Adds the hibernation flag on channel 2.
    #[must_use]
    pub fn with_hibernate_flag(mut self, hibernating: bool) -> Self {
        self.push(CHANNEL_HIBERNATE, ChannelValue::Digital(u8::from(hibernating)));
        self
    }

    fn push(&mut self, channel: u8, value: ChannelValue) {
        // Readings are built from at most two fixed channels.
        let _ = self.channels.push(ChannelReading { channel, value });
    }

    #[must_use]
    pub fn channels(&self) -> &[ChannelReading] {
        &self.channels
    }

    #[must_use]
    pub fn channel(&self, channel: u8) -> Option<ChannelValue> {
        self.channels
            .iter()
            .find(|entry| entry.channel == channel)
            .map(|entry| entry.value)
    }
}

/// Discriminated lifecycle events.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LifecycleEventKind {
    WakeStarted,
    StateEntered(WakeCycleState),
    BatteryAveraged,
    HibernationEvaluated(HibernationDecision),
    TelemetrySent,
    TelemetryFailed,
    AdvertSent,
    AdvertFailed,
    SafetyTimeout,
    InteractiveEntered,
    InteractiveTimeout,
    InteractiveExited,
    SleepPlanned,
}

impl fmt::Display for LifecycleEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleEventKind::WakeStarted => f.write_str("wake-started"),
            LifecycleEventKind::StateEntered(state) => write!(f, "state {state}"),
            LifecycleEventKind::BatteryAveraged => f.write_str("battery-averaged"),
            LifecycleEventKind::HibernationEvaluated(decision) => {
                write!(f, "hibernation {}", decision_label(*decision))
            }
            LifecycleEventKind::TelemetrySent => f.write_str("telemetry-sent"),
            LifecycleEventKind::TelemetryFailed => f.write_str("telemetry-failed"),
            LifecycleEventKind::AdvertSent => f.write_str("advert-sent"),
            LifecycleEventKind::AdvertFailed => f.write_str("advert-failed"),
            LifecycleEventKind::SafetyTimeout => f.write_str("safety-timeout"),
            LifecycleEventKind::InteractiveEntered => f.write_str("interactive-entered"),
            LifecycleEventKind::InteractiveTimeout => f.write_str("interactive-timeout"),
            LifecycleEventKind::InteractiveExited => f.write_str("interactive-exited"),
            LifecycleEventKind::SleepPlanned => f.write_str("sleep-planned"),
        }
    }
}

/// Payloads carried alongside lifecycle events.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EventPayload {
    None,
    /// Retained state observed at wake.
    Wake {
        rtc_wake: bool,
        wakeup_counter: u8,
        hibernating: bool,
    },
    /// Averaged battery level.
    Battery { millivolts: u16 },
    /// Interval chosen for the coming sleep.
    Sleep { seconds: u32 },
    /// Milliseconds since the reference instant.
    Elapsed { millis: u64 },
}

/// Record stored in the ring buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LifecycleRecord<TInstant>
where
    TInstant: Copy,
{
    pub id: EventId,
    pub timestamp: TInstant,
    pub event: LifecycleEventKind,
    pub details: EventPayload,
}

/// Lifecycle ring buffer type alias.
pub type TelemetryRing<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY> =
    HistoryBuf<LifecycleRecord<TInstant>, CAPACITY>;

/// Records lifecycle events into a fixed-size ring buffer.
pub struct TelemetryRecorder<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY>
where
    TInstant: Copy,
{
    ring: TelemetryRing<TInstant, CAPACITY>,
    next_event_id: EventId,
}

impl<TInstant, const CAPACITY: usize> TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: MonotonicInstant,
{
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_event_id: 0,
        }
    }

    /// Returns an iterator over the recorded events in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, LifecycleRecord<TInstant>> {
        self.ring.oldest_ordered()
    }

    /// Returns records with an id at or after `from`, oldest first.
    ///
    /// Callers keep the id following the last record they printed and pass it
    /// back on the next drain.
    pub fn since(&self, from: EventId) -> impl Iterator<Item = &LifecycleRecord<TInstant>> {
        self.ring
            .oldest_ordered()
            .filter(move |record| record.id >= from)
    }

    pub fn latest(&self) -> Option<&LifecycleRecord<TInstant>> {
        self.ring.recent()
    }

    /// Id that the next recorded event will receive.
    pub const fn next_id(&self) -> EventId {
        self.next_event_id
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Records an event with no payload.
    pub fn record_event(&mut self, event: LifecycleEventKind, timestamp: TInstant) -> EventId {
        self.record(event, EventPayload::None, timestamp)
    }

    /// Records the averaged battery level in millivolts.
    pub fn record_battery(&mut self, volts: f32, timestamp: TInstant) -> EventId {
        let payload = EventPayload::Battery {
            millivolts: volts_to_millivolts(volts),
        };
        self.record(LifecycleEventKind::BatteryAveraged, payload, timestamp)
    }

    /// Records an event with the time elapsed since `since`.
    pub fn record_elapsed(
        &mut self,
        event: LifecycleEventKind,
        since: TInstant,
        timestamp: TInstant,
    ) -> EventId {
        let elapsed = timestamp.saturating_duration_since(since);
        let millis = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.record(event, EventPayload::Elapsed { millis }, timestamp)
    }

    /// Records an arbitrary event with the supplied payload.
    pub fn record(
        &mut self,
        event: LifecycleEventKind,
        payload: EventPayload,
        timestamp: TInstant,
    ) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        self.ring.write(LifecycleRecord {
            id,
            timestamp,
            event,
            details: payload,
        });

        id
    }
}

impl<TInstant, const CAPACITY: usize> Default for TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: MonotonicInstant,
{
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn volts_to_millivolts(volts: f32) -> u16 {
    let millivolts = volts * 1_000.0;
    if millivolts.is_nan() || millivolts <= 0.0 {
        0
    } else if millivolts >= f32::from(u16::MAX) {
        u16::MAX
    } else {
        (millivolts + 0.5) as u16
    }
}

const fn decision_label(decision: HibernationDecision) -> &'static str {
    match decision {
        HibernationDecision::Normal => "normal",
        HibernationDecision::Enter => "enter",
        HibernationDecision::Remain => "remain",
        HibernationDecision::Exit => "exit",
    }
}
