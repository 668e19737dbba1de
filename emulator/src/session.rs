use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use node_core::config::{NodeConfig, StoredPreferences};
use node_core::lifecycle::{BatteryMonitor, CycleStep, LifecycleMachine, MeshLink};
use node_core::repl::commands::CommandExecutor;
use node_core::retained::{RetainedRegister, RetainedState};
use node_core::rtc::{RtcKind, RtcWakeSource, WakePolarity, WakeSource};
use node_core::sleep::{SleepHardware, SleepSequencer};
use node_core::telemetry::{ChannelValue, LifecycleRecord, MonotonicInstant, TelemetryReading};

use crate::chip::SimBus;

/// Interval between lifecycle polls, matching the firmware loop.
const POLL_PERIOD_MS: u64 = 100;

/// Polls allowed per wake before the emulator declares the node stuck.
const MAX_POLLS_PER_WAKE: u32 = 100_000;

pub const HELP_TOPICS: &[(&str, &str)] = &[
    (
        "wake",
        "wake <volts>                  - sleep until the RTC fires, then run one wake",
    ),
    (
        "button",
        "button <volts>                - wake early without an RTC event",
    ),
    (
        "scenario",
        "scenario <v1,v2,...>          - run one RTC wake per battery level",
    ),
    (
        "node",
        "node <line>                   - type a console line during the next wake",
    ),
    (
        "status",
        "status                        - show retained state, preferences, and clock",
    ),
    (
        "help",
        "help [topic]                  - show help for a command",
    ),
];

/// Simulated monotonic clock in milliseconds since emulator start.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SimInstant(pub u64);

impl MonotonicInstant for SimInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

pub struct Session {
    bus: SimBus,
    retained: u8,
    preference_words: [u32; 2],
    clock_ms: u64,
    wakes: u32,
    halted: bool,
    console: VecDeque<String>,
    executor: CommandExecutor,
    transcript: Option<TranscriptLogger>,
}

impl Session {
    pub fn new(kind: RtcKind, transcript: Option<&Path>) -> io::Result<Self> {
        let transcript = transcript.map(TranscriptLogger::new).transpose()?;
        Ok(Self {
            bus: SimBus::new(kind),
            retained: 0,
            preference_words: [0; 2],
            clock_ms: 0,
            wakes: 0,
            halted: false,
            console: VecDeque::new(),
            executor: CommandExecutor::new(),
            transcript,
        })
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let at = self.clock_ms;
        self.log(at, TranscriptRole::Host, trimmed)?;

        let (word, rest) = trimmed
            .split_once(char::is_whitespace)
            .map_or((trimmed, ""), |(word, rest)| (word, rest.trim()));

        let lines = match word.to_ascii_lowercase().as_str() {
            "help" => help(rest),
            "status" => self.status(),
            "wake" => match parse_volts(rest) {
                Ok(volts) => self.run_wake(volts, true),
                Err(message) => vec![message],
            },
            "button" => match parse_volts(rest) {
                Ok(volts) => self.run_wake(volts, false),
                Err(message) => vec![message],
            },
            "scenario" => self.scenario(rest),
            "node" if !rest.is_empty() => {
                self.console.push_back(rest.to_string());
                vec![format!(
                    "queued for next wake ({} pending)",
                    self.console.len()
                )]
            }
            "node" => vec!["usage: node <line>".to_string()],
            other => vec![format!(
                "unknown command `{other}`; available: {}",
                help_topic_list()
            )],
        };

        let at = self.clock_ms;
        for line in &lines {
            self.log(at, TranscriptRole::Emulator, line)?;
        }
        Ok(lines)
    }

    fn scenario(&mut self, rest: &str) -> Vec<String> {
        let levels: Result<Vec<f32>, String> = rest
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(parse_volts)
            .collect();

        match levels {
            Ok(levels) if !levels.is_empty() => levels
                .into_iter()
                .flat_map(|volts| self.run_wake(volts, true))
                .collect(),
            Ok(_) => vec!["usage: scenario <v1,v2,...>".to_string()],
            Err(message) => vec![message],
        }
    }

    fn status(&self) -> Vec<String> {
        let retained = RetainedState::decode(self.retained);
        let config = self.config();
        vec![
            format!(
                "clock=+{} rtc={} i2c-transactions={} wakes={} halted={}",
                format_clock(self.clock_ms),
                self.bus.with_chip(|chip| chip.kind()),
                self.bus.with_chip(|chip| chip.transactions()),
                self.wakes,
                yes_no(self.halted)
            ),
            format!(
                "retained=0x{:02x} wakeups={} hibernating={} notified={}",
                self.retained,
                retained.wakeup_counter(),
                yes_no(retained.hibernating),
                yes_no(retained.hibernate_notified)
            ),
            format!(
                "sleep.interval={} advert.wakeups={} hibernate.max={}",
                config.sleep_interval_secs,
                config.wakeups_per_advert,
                config.max_hibernate_sleep_secs
            ),
        ]
    }

    fn config(&self) -> NodeConfig {
        match StoredPreferences::from_words(self.preference_words) {
            Some(preferences) => NodeConfig::default().with_preferences(preferences),
            None => NodeConfig::default(),
        }
    }

    /// Sleeps until the armed event (when `rtc_event`), then runs one wake.
    fn run_wake(&mut self, volts: f32, rtc_event: bool) -> Vec<String> {
        if self.halted {
            return vec!["node halted on a fatal error; restart the emulator".to_string()];
        }

        let mut lines = Vec::new();
        if rtc_event && self.wakes > 0 {
            self.sleep_until_event(&mut lines);
        }
        self.sync_chip_clock();
        self.wakes += 1;

        let mut rtc = match RtcWakeSource::probe(self.bus.clone()) {
            Ok(rtc) => rtc,
            Err(_) => {
                self.halted = true;
                lines.push("rtc: no supported chip answered".to_string());
                return lines;
            }
        };
        if let Err(error) = rtc.begin() {
            lines.push(format!("rtc: begin failed: {error}"));
        }
        let rtc_wake = rtc.check_wakeup().unwrap_or_else(|error| {
            lines.push(format!("rtc: wake check failed: {error}"));
            false
        });

        let woke_at = SimInstant(self.clock_ms);
        let retained = self.retained.load();
        lines.push(format!(
            "== wake {} at +{} battery={volts:.2}V rtc={} retained=0x{:02x}",
            self.wakes,
            format_clock(self.clock_ms),
            yes_no(rtc_wake),
            self.retained
        ));

        let mut machine = match LifecycleMachine::wake(self.config(), retained, woke_at, rtc_wake)
        {
            Ok(machine) => machine,
            Err(error) => {
                self.halted = true;
                lines.push(format!("config: {error}"));
                return lines;
            }
        };

        let mut battery = FixedBattery(volts);
        let mut mesh = LoggingMesh::default();
        let mut step = CycleStep::Continue;
        for _ in 0..MAX_POLLS_PER_WAKE {
            let now = SimInstant(self.clock_ms);
            if let Some(line) = self.console.pop_front() {
                let mut reply = String::new();
                if self
                    .executor
                    .handle_line(&line, now, &mut machine, &mut reply)
                    .is_some()
                {
                    lines.push(format!("console> {line}"));
                    lines.push(format!("console< {reply}"));
                }
            }

            step = machine.poll(now, &mut battery, &mut mesh);
            if matches!(step, CycleStep::Sleep { .. }) {
                break;
            }
            self.clock_ms += POLL_PERIOD_MS;
        }

        lines.extend(
            machine
                .telemetry()
                .oldest_first()
                .map(|record| describe_record(record, woke_at)),
        );
        lines.append(&mut mesh.lines);

        let CycleStep::Sleep { plan, retained } = step else {
            self.halted = true;
            lines.push("node never asked to sleep".to_string());
            return lines;
        };

        self.retained.store(retained);
        self.preference_words = machine.config().preferences().to_words();
        self.sync_chip_clock();

        let mut hardware = SimHardware::default();
        let mut sequencer = SleepSequencer::new(&mut rtc, &mut hardware);
        let outcome = sequencer.enter_sleep(plan);
        let armed = sequencer.last_armed();
        if let Err(error) = outcome {
            lines.push(format!("sleep: {error}"));
            sequencer.fail();
            self.halted = true;
        }
        lines.append(&mut hardware.steps);

        if let Some(armed) = armed {
            lines.push(format!(
                "sleep: requested={}s armed={}s{}{} retained=0x{:02x}",
                armed.requested_secs,
                armed.armed_secs,
                if armed.clamped { " (clamped)" } else { "" },
                if armed.used_fallback { " (fallback)" } else { "" },
                self.retained
            ));
        }
        lines
    }

    fn sleep_until_event(&mut self, lines: &mut Vec<String>) {
        let Some(seconds) = self.bus.with_chip(|chip| chip.seconds_until_event()) else {
            lines.push("rtc: nothing armed, waking immediately".to_string());
            return;
        };
        self.clock_ms += seconds * 1_000;
        self.bus.with_chip(|chip| {
            chip.set_clock(self.clock_ms / 1_000);
            chip.fire();
        });
        lines.push(format!("-- slept {seconds}s"));
    }

    fn sync_chip_clock(&self) {
        let secs = self.clock_ms / 1_000;
        self.bus.with_chip(|chip| chip.set_clock(secs));
    }

    fn log(&mut self, at_ms: u64, role: TranscriptRole, line: &str) -> io::Result<()> {
        match self.transcript.as_mut() {
            Some(transcript) => transcript.append_line(at_ms, role, line),
            None => Ok(()),
        }
    }
}

struct FixedBattery(f32);

impl BatteryMonitor for FixedBattery {
    fn battery_volts(&mut self) -> f32 {
        self.0
    }
}

/// Mesh link that narrates what would have been transmitted.
#[derive(Default)]
struct LoggingMesh {
    lines: Vec<String>,
}

impl MeshLink for LoggingMesh {
    type Error = ();

    fn send_telemetry(&mut self, reading: &TelemetryReading) -> Result<(), ()> {
        let channels: Vec<String> = reading
            .channels()
            .iter()
            .map(|entry| match entry.value {
                ChannelValue::Voltage(volts) => format!("ch{}={volts:.2}V", entry.channel),
                ChannelValue::Digital(level) => format!("ch{}={level}", entry.channel),
            })
            .collect();
        self.lines.push(format!("mesh: telemetry {}", channels.join(" ")));
        Ok(())
    }

    fn send_self_advertisement(&mut self, timeout: Duration) -> Result<(), ()> {
        self.lines.push(format!(
            "mesh: self advertisement timeout={}s",
            timeout.as_secs()
        ));
        Ok(())
    }
}

/// Sleep hardware that records each step instead of halting.
#[derive(Default)]
struct SimHardware {
    steps: Vec<String>,
}

impl SleepHardware for SimHardware {
    type Resume = ();

    fn configure_wake_input(&mut self, polarity: WakePolarity) {
        let sense = match polarity {
            WakePolarity::ActiveLow => "active-low",
            WakePolarity::ActiveHigh => "active-high",
        };
        self.steps.push(format!("hw: wake input {sense}"));
    }

    fn power_down_peripherals(&mut self) {
        self.steps.push("hw: peripherals off".to_string());
    }

    fn flush_output(&mut self) {
        self.steps.push("hw: output flushed".to_string());
    }

    fn enter_standby(&mut self) {
        self.steps.push("hw: standby".to_string());
    }

    fn signal_fatal(&mut self) {
        self.steps.push("hw: FATAL indicator".to_string());
    }
}

struct TranscriptLogger {
    writer: BufWriter<std::fs::File>,
}

impl TranscriptLogger {
    fn new(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };
        writeln!(logger.writer, "# Sensor node emulator transcript")?;
        writeln!(
            logger.writer,
            "# Timestamps are simulated milliseconds since emulator start"
        )?;
        writeln!(logger.writer)?;
        logger.writer.flush()?;
        Ok(logger)
    }

    fn append_line(&mut self, at_ms: u64, role: TranscriptRole, line: &str) -> io::Result<()> {
        writeln!(self.writer, "[+{at_ms:>10} ms] {} {line}", role.prefix())?;
        self.writer.flush()
    }
}

enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(&self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}

fn help(topic: &str) -> Vec<String> {
    if topic.is_empty() {
        return HELP_TOPICS
            .iter()
            .map(|(_, text)| (*text).to_string())
            .collect();
    }

    match HELP_TOPICS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(topic))
    {
        Some((_, text)) => vec![(*text).to_string()],
        None => vec![format!(
            "no help for `{topic}`; topics: {}",
            help_topic_list()
        )],
    }
}

fn help_topic_list() -> String {
    HELP_TOPICS
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}

fn parse_volts(text: &str) -> Result<f32, String> {
    let text = text.trim().trim_end_matches(['v', 'V']);
    match text.parse::<f32>() {
        Ok(volts) if volts.is_finite() && volts >= 0.0 => Ok(volts),
        _ => Err(format!("invalid battery level `{text}`")),
    }
}

fn describe_record(record: &LifecycleRecord<SimInstant>, woke_at: SimInstant) -> String {
    format!(
        "  [{:>6}ms] #{} {} {:?}",
        record.timestamp.saturating_duration_since(woke_at).as_millis(),
        record.id,
        record.event,
        record.details
    )
}

fn format_clock(millis: u64) -> String {
    let secs = millis / 1_000;
    format!(
        "{}h{:02}m{:02}.{:01}s",
        secs / 3_600,
        (secs / 60) % 60,
        secs % 60,
        (millis % 1_000) / 100
    )
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
