use core::time::Duration;

use node_core::config::NodeConfig;
use node_core::lifecycle::{
    BatteryMonitor, CycleStep, ExitRejected, LifecycleMachine, MeshLink, WakeCycleState,
};
use node_core::retained::RetainedState;
use node_core::telemetry::{
    CHANNEL_HIBERNATE, ChannelValue, LifecycleEventKind, MonotonicInstant, TelemetryReading,
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
    adverts: Vec<Duration>,
    fail: bool,
}

impl MeshLink for RecordingMesh {
    type Error = ();

    fn send_telemetry(&mut self, reading: &TelemetryReading) -> Result<(), ()> {
        if self.fail {
            return Err(());
        }
        self.readings.push(reading.clone());
        Ok(())
    }

    fn send_self_advertisement(&mut self, timeout: Duration) -> Result<(), ()> {
        if self.fail {
            return Err(());
        }
        self.adverts.push(timeout);
        Ok(())
    }
}

fn wake(config: NodeConfig, retained: RetainedState) -> LifecycleMachine<Millis> {
    LifecycleMachine::wake(config, retained, Millis(0), true).expect("valid config")
}

/// Polls once a second until the machine asks to sleep.
fn run_to_sleep(
    machine: &mut LifecycleMachine<Millis>,
    battery: &mut FixedBattery,
    mesh: &mut RecordingMesh,
) -> (u32, RetainedState, u64) {
    for tick in 0..1_000 {
        let now = Millis(tick * 1_000);
        if let CycleStep::Sleep { plan, retained } = machine.poll(now, battery, mesh) {
            return (plan.seconds, retained, now.0);
        }
    }
    panic!("machine never asked to sleep");
}

#[test]
fn normal_wake_samples_then_transmits_and_sleeps_at_base_interval() {
    let mut machine = wake(NodeConfig::default(), RetainedState::default());
    let mut mesh = RecordingMesh::default();

    let (seconds, retained, slept_at) =
        run_to_sleep(&mut machine, &mut FixedBattery(3.7), &mut mesh);

    assert_eq!(seconds, 300);
    assert_eq!(retained.wakeup_counter(), 1);
    assert!(!retained.hibernating);
    assert_eq!(mesh.readings.len(), 1);
    assert_eq!(mesh.readings[0].channel(CHANNEL_HIBERNATE), None);
    assert!(mesh.adverts.is_empty());
    // Ten samples one second apart, then processing.
    assert_eq!(slept_at, 10_000);
}

#[test]
fn sampling_waits_for_the_full_buffer() {
    let mut machine = wake(NodeConfig::default(), RetainedState::default());
    let mut mesh = RecordingMesh::default();
    let mut battery = FixedBattery(3.7);

    for tick in 0..9 {
        machine.poll(Millis(tick * 1_000), &mut battery, &mut mesh);
        assert_eq!(machine.state(), WakeCycleState::Sampling);
    }
    machine.poll(Millis(9_000), &mut battery, &mut mesh);
    assert_eq!(machine.state(), WakeCycleState::Processing);
}

#[test]
fn advertisement_fires_at_threshold_and_resets_counter() {
    let mut config = NodeConfig::default();
    config.wakeups_per_advert = 3;
    let mut machine = wake(config, RetainedState::new(2, false, false));
    let mut mesh = RecordingMesh::default();

    let (_, retained, _) = run_to_sleep(&mut machine, &mut FixedBattery(3.7), &mut mesh);

    assert_eq!(mesh.adverts, vec![Duration::from_secs(16)]);
    assert_eq!(retained.wakeup_counter(), 0);
}

#[test]
fn counter_below_threshold_skips_advertisement() {
    let mut machine = wake(NodeConfig::default(), RetainedState::new(10, false, false));
    let mut mesh = RecordingMesh::default();

    let (_, retained, _) = run_to_sleep(&mut machine, &mut FixedBattery(3.7), &mut mesh);

    assert!(mesh.adverts.is_empty());
    assert_eq!(retained.wakeup_counter(), 11);
}

#[test]
fn safety_timeout_forces_sleep() {
    let mut machine = wake(NodeConfig::default(), RetainedState::default());
    let mut mesh = RecordingMesh::default();
    let mut battery = FixedBattery(3.7);

    machine.poll(Millis(0), &mut battery, &mut mesh);
    assert_eq!(
        machine.poll(Millis(300_000), &mut battery, &mut mesh),
        CycleStep::Continue
    );

    let step = machine.poll(Millis(300_001), &mut battery, &mut mesh);
    assert!(matches!(step, CycleStep::Sleep { .. }));
    assert!(mesh.readings.is_empty());
    assert!(
        machine
            .telemetry()
            .oldest_first()
            .any(|record| record.event == LifecycleEventKind::SafetyTimeout)
    );
}

#[test]
fn interactive_mode_suppresses_safety_timeout_until_idle() {
    let mut machine = wake(NodeConfig::default(), RetainedState::default());
    let mut mesh = RecordingMesh::default();
    let mut battery = FixedBattery(3.7);

    machine.note_command(Millis(1_000));
    assert_eq!(machine.state(), WakeCycleState::Interactive);

    for second in (30..=600).step_by(30) {
        let now = Millis(second * 1_000);
        machine.note_command(now);
        assert_eq!(
            machine.poll(now, &mut battery, &mut mesh),
            CycleStep::Continue
        );
    }

    assert_eq!(
        machine.poll(Millis(659_999), &mut battery, &mut mesh),
        CycleStep::Continue
    );
    let step = machine.poll(Millis(660_000), &mut battery, &mut mesh);
    assert!(matches!(step, CycleStep::Sleep { .. }));
}

#[test]
fn exit_only_acts_in_interactive_mode() {
    let mut machine = wake(NodeConfig::default(), RetainedState::default());

    assert_eq!(machine.exit_interactive(Millis(0)), Err(ExitRejected));
    assert_eq!(machine.state(), WakeCycleState::Sampling);

    machine.note_command(Millis(0));
    assert_eq!(machine.exit_interactive(Millis(5)), Ok(()));
    assert_eq!(machine.state(), WakeCycleState::ReadyToSleep);

    machine.note_command(Millis(10));
    assert_eq!(machine.state(), WakeCycleState::ReadyToSleep);
}

#[test]
fn mesh_failure_is_recorded_and_sleep_still_happens() {
    let mut machine = wake(NodeConfig::default(), RetainedState::default());
    let mut mesh = RecordingMesh {
        fail: true,
        ..RecordingMesh::default()
    };

    let (seconds, retained, _) = run_to_sleep(&mut machine, &mut FixedBattery(2.8), &mut mesh);

    assert_eq!(seconds, 300);
    assert!(retained.hibernating);
    assert!(!retained.hibernate_notified);
    assert!(
        machine
            .telemetry()
            .oldest_first()
            .any(|record| record.event == LifecycleEventKind::TelemetryFailed)
    );
}

#[test]
fn hibernate_entry_notification_carries_both_channels() {
    let mut machine = wake(NodeConfig::default(), RetainedState::default());
    let mut mesh = RecordingMesh::default();

    let (_, retained, _) = run_to_sleep(&mut machine, &mut FixedBattery(2.8), &mut mesh);

    assert!(retained.hibernating);
    assert!(retained.hibernate_notified);
    assert_eq!(retained.wakeup_counter(), 0);
    assert_eq!(mesh.readings.len(), 1);
    assert_eq!(
        mesh.readings[0].channel(CHANNEL_HIBERNATE),
        Some(ChannelValue::Digital(1))
    );
}

#[test]
fn invalid_config_is_rejected_at_wake() {
    let mut config = NodeConfig::default();
    config.hibernate_exit_mv = config.hibernate_enter_mv;
    assert!(LifecycleMachine::wake(config, RetainedState::default(), Millis(0), false).is_err());
}

#[test]
fn advert_threshold_beyond_counter_range_still_advertises() {
    let mut config = NodeConfig::default();
    config
        .set_wakeups_per_advert(100)
        .expect("100 is an accepted threshold");
    let mut mesh = RecordingMesh::default();
    let mut battery = FixedBattery(3.7);
    let mut retained = RetainedState::default();

    for _ in 0..130 {
        let mut machine = wake(config, retained);
        retained = run_to_sleep(&mut machine, &mut battery, &mut mesh).1;
    }

    assert_eq!(mesh.adverts.len(), 2);
    assert_eq!(retained.wakeup_counter(), 130 - 2 * 63);
}

#[test]
fn interrupted_hibernating_wake_does_not_skip_a_backoff_stage() {
    let mut mesh = RecordingMesh::default();
    let mut battery = FixedBattery(2.9);
    let mut retained = RetainedState::new(1, true, true);

    let mut machine = wake(NodeConfig::default(), retained);
    let (seconds, next, _) = run_to_sleep(&mut machine, &mut battery, &mut mesh);
    assert_eq!(seconds, 1_200);
    retained = next;

    let mut machine = wake(NodeConfig::default(), retained);
    machine.note_command(Millis(0));
    assert_eq!(machine.exit_interactive(Millis(500)), Ok(()));
    let (seconds, next, _) = run_to_sleep(&mut machine, &mut battery, &mut mesh);
    assert_eq!(seconds, 1_200);
    assert_eq!(next.wakeup_counter(), retained.wakeup_counter());
    retained = next;

    let mut machine = wake(NodeConfig::default(), retained);
    let (seconds, _, _) = run_to_sleep(&mut machine, &mut battery, &mut mesh);
    assert_eq!(seconds, 2_400);
    assert!(mesh.readings.is_empty());
}
