use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::adc::Adc;
use embassy_stm32::gpio::{Level, Output, Speed};
use embassy_stm32::i2c::{self, I2c};
use embassy_stm32::time::Hertz;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, Timer, with_timeout};
use node_core::config::{NodeConfig, StoredPreferences};
use node_core::lifecycle::{CycleStep, LifecycleMachine};
use node_core::repl::commands::CommandExecutor;
use node_core::retained::RetainedRegister;
use node_core::rtc::{RtcWakeSource, WakeSource};
use node_core::sleep::{SleepHardware, SleepSequencer};

use crate::console::{self, ConsoleFrame, FrameChannel, FrameSender, LineChannel};
use crate::hw::power::BatteryAdc;
use crate::hw::{BackupRegisters, NodeHardware};
use crate::mesh::LoggingMesh;
use crate::telemetry::{FirmwareInstant, TelemetryDrain};

mod console_task;

/// Interval between lifecycle polls while awake.
const POLL_PERIOD: Duration = Duration::from_millis(100);

/// Upper bound on waiting for console replies to drain before sleeping.
const CONSOLE_DRAIN_LIMIT: Duration = Duration::from_millis(250);

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

pub(super) static CONSOLE_LINES: LineChannel = Channel::new();
pub(super) static CONSOLE_FRAMES: FrameChannel = Channel::new();

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let config = hal::Config::default();
    let hal::Peripherals {
        ADC1,
        I2C1,
        USART2,
        PA1,
        PA2,
        PA3,
        PA5,
        PB5,
        PB6,
        PB7,
        ..
    } = hal::init(config);

    let woke_at = FirmwareInstant::now();
    let mut hardware = NodeHardware::new(
        Output::new(PB5, Level::High, Speed::Low),
        Output::new(PA5, Level::Low, Speed::Low),
    );

    let mut backup = BackupRegisters::enable();
    let retained = backup.load();
    let node_config = match StoredPreferences::from_words(backup.preference_words()) {
        Some(preferences) => NodeConfig::default().with_preferences(preferences),
        None => NodeConfig::default(),
    };

    let mut i2c_config = i2c::Config::default();
    i2c_config.frequency = Hertz::khz(100);
    let bus = I2c::new_blocking(I2C1, PB6, PB7, i2c_config);
    let mut rtc = match RtcWakeSource::probe(bus) {
        Ok(rtc) => rtc,
        Err(_) => {
            defmt::error!("rtc: no supported chip on I2C1");
            match hardware.signal_fatal() {}
        }
    };
    defmt::info!("rtc: {} detected", rtc.kind());

    if let Err(error) = rtc.begin() {
        defmt::warn!("rtc: begin failed: {}", defmt::Debug2Format(&error));
    }
    let rtc_wake = rtc.check_wakeup().unwrap_or_else(|error| {
        defmt::warn!("rtc: wake check failed: {}", defmt::Debug2Format(&error));
        false
    });

    let mut machine = match LifecycleMachine::wake(node_config, retained, woke_at, rtc_wake) {
        Ok(machine) => machine,
        Err(error) => {
            defmt::error!("config: {}", error);
            match hardware.signal_fatal() {}
        }
    };

    if let Err(error) = spawner.spawn(console_task::run(
        &CONSOLE_LINES,
        &CONSOLE_FRAMES,
        USART2,
        PA2,
        PA3,
    )) {
        defmt::warn!("console: task not started: {}", defmt::Debug2Format(&error));
    }

    let mut battery = BatteryAdc::new(Adc::new(ADC1), PA1);
    let mut mesh = LoggingMesh::new(true);
    let mut executor = CommandExecutor::new();
    let mut drain = TelemetryDrain::new();
    let lines = CONSOLE_LINES.receiver();
    let frames = CONSOLE_FRAMES.sender();

    let (plan, retained) = loop {
        let now = FirmwareInstant::now();
        while let Ok(line) = lines.try_receive() {
            answer(&mut executor, &mut machine, line.as_str(), now, &frames);
        }

        let step = machine.poll(now, &mut battery, &mut mesh);
        drain.drain(machine.telemetry());
        if let CycleStep::Sleep { plan, retained } = step {
            break (plan, retained);
        }

        Timer::after(POLL_PERIOD).await;
    };

    backup.store(retained);
    backup.store_preference_words(machine.config().preferences().to_words());
    defmt::info!(
        "sleep: {}s retained={=u8:#04x}",
        plan.seconds,
        retained.encode()
    );

    let drained = with_timeout(CONSOLE_DRAIN_LIMIT, async {
        while !console::tx_idle() {
            Timer::after(Duration::from_millis(5)).await;
        }
    })
    .await;
    if drained.is_err() {
        defmt::warn!("console: sleeping with replies still queued");
    }

    let mut sequencer = SleepSequencer::new(&mut rtc, &mut hardware);
    match sequencer.enter_sleep(plan) {
        Ok(never) => match never {},
        Err(error) => {
            defmt::error!("sleep: {}", defmt::Display2Format(&error));
            match sequencer.fail() {}
        }
    }
}

/// Runs one console line and queues the reply.
fn answer(
    executor: &mut CommandExecutor,
    machine: &mut LifecycleMachine<FirmwareInstant>,
    line: &str,
    now: FirmwareInstant,
    frames: &FrameSender<'static>,
) {
    let mut reply = ConsoleFrame::new();
    if executor.handle_line(line, now, machine, &mut reply).is_none() {
        return;
    }
    if reply.push_str("\r\n").is_err() {
        defmt::warn!("console: reply truncated");
    }

    console::mark_tx_busy();
    if frames.try_send(reply).is_err() {
        defmt::warn!("console: dropping reply (queue full)");
    }
}
