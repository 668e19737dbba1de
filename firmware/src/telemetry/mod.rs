#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Logging bridge for the lifecycle telemetry ring.
//!
//! `node-core` only records events; this module owns the firmware clock type
//! used for timestamps and mirrors newly recorded events to defmt (target) or
//! stdout (host builds) once per control-loop iteration.

use core::time::Duration;

use embassy_time::Instant;
use node_core::telemetry::{EventId, LifecycleRecord, MonotonicInstant, TelemetryRecorder};

/// Embassy timestamp wrapped so it can drive the shared lifecycle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct FirmwareInstant(Instant);

impl FirmwareInstant {
    #[cfg(target_os = "none")]
    #[must_use]
    pub fn now() -> Self {
        Self(Instant::now())
    }

    #[must_use]
    pub fn as_millis(self) -> u64 {
        self.0.as_millis()
    }
}

impl From<Instant> for FirmwareInstant {
    fn from(instant: Instant) -> Self {
        Self(instant)
    }
}

impl MonotonicInstant for FirmwareInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_micros(self.0.saturating_duration_since(earlier.0).as_micros())
    }
}

/// Tracks which records have already been logged.
#[derive(Default)]
pub struct TelemetryDrain {
    next_id: EventId,
}

impl TelemetryDrain {
    #[must_use]
    pub const fn new() -> Self {
        Self { next_id: 0 }
    }

    /// Logs every record newer than the previous call and returns how many
    /// were emitted.
    pub fn drain<const CAPACITY: usize>(
        &mut self,
        recorder: &TelemetryRecorder<FirmwareInstant, CAPACITY>,
    ) -> usize {
        let mut emitted = 0;
        for record in recorder.since(self.next_id) {
            log_record(record);
            emitted += 1;
        }
        self.next_id = recorder.next_id();
        emitted
    }
}

#[cfg(target_os = "none")]
fn log_record(record: &LifecycleRecord<FirmwareInstant>) {
    defmt::info!(
        "telemetry #{} t={}ms {} {}",
        record.id,
        record.timestamp.as_millis(),
        record.event,
        record.details
    );
}

#[cfg(not(target_os = "none"))]
fn log_record(record: &LifecycleRecord<FirmwareInstant>) {
    println!(
        "telemetry #{} t={}ms {} {:?}",
        record.id,
        record.timestamp.as_millis(),
        record.event,
        record.details
    );
}
