//! Drives full wake cycles end to end: retained register in, lifecycle,
//! sleep sequencer, retained register out.

use core::time::Duration;

use node_core::config::NodeConfig;
use node_core::hibernation::HibernationDecision;
use node_core::lifecycle::{BatteryMonitor, CycleStep, LifecycleMachine, MeshLink};
use node_core::retained::RetainedRegister;
use node_core::rtc::{RtcError, WakePolarity, WakeSource};
use node_core::sleep::{SleepHardware, SleepSequencer};
use node_core::telemetry::{
    CHANNEL_BATTERY, CHANNEL_HIBERNATE, ChannelValue, LifecycleEventKind, MonotonicInstant,
    TelemetryReading,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct Millis(u64);

impl MonotonicInstant for Millis {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

struct FixedBattery(f32);

impl BatteryMonitor for FixedBattery {
    fn battery_volts(&mut self) -> f32 {
        self.0
    }
}

#[derive(Default)]
struct RecordingMesh {
    readings: Vec<TelemetryReading>,
}

impl MeshLink for RecordingMesh {
    type Error = ();

    fn send_telemetry(&mut self, reading: &TelemetryReading) -> Result<(), ()> {
        self.readings.push(reading.clone());
        Ok(())
    }

    fn send_self_advertisement(&mut self, _timeout: Duration) -> Result<(), ()> {
        Ok(())
    }
}

#[derive(Default)]
struct ScheduledRtc {
    alarms: Vec<u32>,
}

impl WakeSource for ScheduledRtc {
    type Error = ();

    fn check_wakeup(&mut self) -> Result<bool, RtcError<()>> {
        Ok(!self.alarms.is_empty())
    }

    fn set_alarm(&mut self, seconds: u32) -> Result<u32, RtcError<()>> {
        self.alarms.push(seconds);
        Ok(seconds)
    }

    fn polarity(&self) -> WakePolarity {
        WakePolarity::ActiveLow
    }

    fn max_alarm_seconds(&self) -> u32 {
        86_400
    }
}

#[derive(Default)]
struct CountingHardware {
    standby_entries: u32,
}

impl SleepHardware for CountingHardware {
    type Resume = ();

    fn configure_wake_input(&mut self, _polarity: WakePolarity) {}

    fn power_down_peripherals(&mut self) {}

    fn flush_output(&mut self) {}

    fn enter_standby(&mut self) {
        self.standby_entries += 1;
    }

    fn signal_fatal(&mut self) {
        panic!("arming never fails in this scenario");
    }
}

struct Node {
    config: NodeConfig,
    register: u8,
    rtc: ScheduledRtc,
    hardware: CountingHardware,
}

struct WakeReport {
    decision: Option<HibernationDecision>,
    readings: Vec<TelemetryReading>,
}

impl Node {
    fn new() -> Self {
        Self {
            config: NodeConfig::default(),
            register: 0,
            rtc: ScheduledRtc::default(),
            hardware: CountingHardware::default(),
        }
    }

    fn wake(&mut self, volts: f32) -> WakeReport {
        let rtc_wake = self.rtc.check_wakeup().expect("mock rtc");
        let mut machine =
            LifecycleMachine::wake(self.config, self.register.load(), Millis(0), rtc_wake)
                .expect("valid config");
        let mut battery = FixedBattery(volts);
        let mut mesh = RecordingMesh::default();

        let mut tick = 0;
        let plan = loop {
            match machine.poll(Millis(tick * 1_000), &mut battery, &mut mesh) {
                CycleStep::Continue => tick += 1,
                CycleStep::Sleep { plan, retained } => {
                    self.register.store(retained);
                    break plan;
                }
            }
        };

        let mut sequencer = SleepSequencer::new(&mut self.rtc, &mut self.hardware);
        sequencer.enter_sleep(plan).expect("arming succeeds");

        let decision = machine
            .telemetry()
            .oldest_first()
            .find_map(|record| match record.event {
                LifecycleEventKind::HibernationEvaluated(decision) => Some(decision),
                _ => None,
            });

        WakeReport {
            decision,
            readings: mesh.readings,
        }
    }
}

fn voltage(reading: &TelemetryReading) -> f32 {
    match reading.channel(CHANNEL_BATTERY) {
        Some(ChannelValue::Voltage(volts)) => volts,
        other => panic!("missing battery channel: {other:?}"),
    }
}

#[test]
fn six_wake_battery_scenario() {
    let mut node = Node::new();
    let battery = [3.75, 2.95, 2.92, 2.90, 3.15, 3.20];
    let reports: Vec<WakeReport> = battery.iter().map(|&volts| node.wake(volts)).collect();

    let decisions: Vec<_> = reports.iter().map(|report| report.decision).collect();
    assert_eq!(
        decisions,
        vec![
            Some(HibernationDecision::Normal),
            Some(HibernationDecision::Enter),
            Some(HibernationDecision::Remain),
            Some(HibernationDecision::Remain),
            Some(HibernationDecision::Exit),
            Some(HibernationDecision::Normal),
        ]
    );

    assert_eq!(node.rtc.alarms, vec![300, 300, 600, 1_200, 300, 300]);
    assert_eq!(node.hardware.standby_entries, 6);

    // Wake 1: plain telemetry.
    assert_eq!(reports[0].readings.len(), 1);
    assert!((voltage(&reports[0].readings[0]) - 3.75).abs() < 1e-3);
    assert_eq!(reports[0].readings[0].channel(CHANNEL_HIBERNATE), None);

    // Wake 2: single entry notification.
    assert_eq!(reports[1].readings.len(), 1);
    assert_eq!(
        reports[1].readings[0].channel(CHANNEL_HIBERNATE),
        Some(ChannelValue::Digital(1))
    );

    // Wakes 3-4: silent while hibernating.
    assert!(reports[2].readings.is_empty());
    assert!(reports[3].readings.is_empty());

    // Wake 5: exit notification.
    assert_eq!(reports[4].readings.len(), 1);
    assert_eq!(
        reports[4].readings[0].channel(CHANNEL_HIBERNATE),
        Some(ChannelValue::Digital(0))
    );

    // Wake 6: back to normal telemetry.
    assert_eq!(reports[5].readings.len(), 1);
    assert_eq!(reports[5].readings[0].channel(CHANNEL_HIBERNATE), None);

    let retained = node.register.load();
    assert!(!retained.hibernating);
    assert!(!retained.hibernate_notified);
}

#[test]
fn band_readings_never_toggle_hibernation() {
    let mut node = Node::new();
    let decisions: Vec<_> = [3.05, 3.01, 3.09, 3.08]
        .iter()
        .map(|&volts| node.wake(volts).decision)
        .collect();
    assert!(
        decisions
            .iter()
            .all(|decision| *decision == Some(HibernationDecision::Normal))
    );

    node.wake(2.5);
    assert!(node.register.load().hibernating);

    let decisions: Vec<_> = [3.01, 3.05, 3.09]
        .iter()
        .map(|&volts| node.wake(volts).decision)
        .collect();
    assert!(
        decisions
            .iter()
            .all(|decision| *decision == Some(HibernationDecision::Remain))
    );
}

#[test]
fn hibernation_backoff_reaches_cap_and_resets_on_exit() {
    let mut node = Node::new();
    node.wake(2.8);
    for _ in 0..10 {
        node.wake(2.8);
    }
    assert_eq!(
        &node.rtc.alarms[..],
        &[300, 600, 1_200, 2_400, 4_800, 9_600, 19_200, 21_600, 21_600, 21_600, 21_600]
    );

    node.wake(3.5);
    assert_eq!(node.rtc.alarms.last(), Some(&300));
}
