//! Console command dispatcher.
//!
//! Parses a line with [`grammar::parse`], applies it to the lifecycle and
//! writes a human-readable reply. Receiving any line also feeds the
//! interactive-mode tracking on the machine, after the command itself ran.

use core::fmt::{self, Write};

use crate::config::ConfigError;
use crate::lifecycle::{ExitRejected, LifecycleMachine};
use crate::telemetry::MonotonicInstant;

use super::grammar::{self, Command, SettingKey, SettingValue};
use super::status::StatusReport;

/// Reply sent when `exit` is accepted.
pub const EXIT_REPLY: &str = "Exiting interactive mode, going to sleep...";

/// What a successfully executed command did.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CommandOutcome {
    Exiting,
    Status(StatusReport),
    Help,
    Value(SettingKey, u32),
    Updated(SettingKey, u32),
}

/// Errors surfaced while executing a command.
#[derive(Debug, PartialEq)]
pub enum CommandError<'a> {
    Parse(grammar::ParseError<'a>),
    Config(ConfigError),
    NotInteractive(ExitRejected),
    /// A duration was given for a count, or the reverse.
    WrongUnit(SettingKey),
    /// The reply sink ran out of space.
    Reply,
}

impl<'a> From<grammar::ParseError<'a>> for CommandError<'a> {
    fn from(error: grammar::ParseError<'a>) -> Self {
        Self::Parse(error)
    }
}

impl From<ConfigError> for CommandError<'_> {
    fn from(error: ConfigError) -> Self {
        Self::Config(error)
    }
}

impl From<ExitRejected> for CommandError<'_> {
    fn from(error: ExitRejected) -> Self {
        Self::NotInteractive(error)
    }
}

impl From<fmt::Error> for CommandError<'_> {
    fn from(_: fmt::Error) -> Self {
        Self::Reply
    }
}

impl fmt::Display for CommandError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Parse(error) => write!(f, "error: {error}"),
            CommandError::Config(error) => write!(f, "error: {error}"),
            CommandError::NotInteractive(error) => error.fmt(f),
            CommandError::WrongUnit(SettingKey::AdvertWakeups) => {
                f.write_str("error: advert.wakeups takes a plain count")
            }
            CommandError::WrongUnit(key) => write!(f, "error: {} takes seconds", key.name()),
            CommandError::Reply => f.write_str("error: reply too long"),
        }
    }
}

/// Executes console lines against a lifecycle machine.
#[derive(Default)]
pub struct CommandExecutor;

impl CommandExecutor {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Runs one line and writes either its reply or its error to `reply`.
    ///
    /// Blank lines are ignored and do not count as operator activity.
    pub fn handle_line<'a, I, W>(
        &mut self,
        line: &'a str,
        now: I,
        machine: &mut LifecycleMachine<I>,
        reply: &mut W,
    ) -> Option<Result<CommandOutcome, CommandError<'a>>>
    where
        I: MonotonicInstant,
        W: Write,
    {
        if line.trim().is_empty() {
            return None;
        }

        let result = self.execute(line, now, machine, reply);
        if let Err(error) = &result {
            let _ = write!(reply, "{error}");
        }
        machine.note_command(now);
        Some(result)
    }

    /// Parses and executes a command, writing the success reply to `reply`.
    pub fn execute<'a, I, W>(
        &mut self,
        line: &'a str,
        now: I,
        machine: &mut LifecycleMachine<I>,
        reply: &mut W,
    ) -> Result<CommandOutcome, CommandError<'a>>
    where
        I: MonotonicInstant,
        W: Write,
    {
        let command = grammar::parse(line)?;
        self.dispatch(command, now, machine, reply)
    }

    fn dispatch<'a, I, W>(
        &mut self,
        command: Command<'a>,
        now: I,
        machine: &mut LifecycleMachine<I>,
        reply: &mut W,
    ) -> Result<CommandOutcome, CommandError<'a>>
    where
        I: MonotonicInstant,
        W: Write,
    {
        match command {
            Command::Exit => {
                machine.exit_interactive(now)?;
                reply.write_str(EXIT_REPLY)?;
                Ok(CommandOutcome::Exiting)
            }
            Command::Status => {
                let report = StatusReport::capture(machine, now);
                write!(reply, "{report}")?;
                Ok(CommandOutcome::Status(report))
            }
            Command::Help { topic } => {
                reply.write_str(help_text(topic))?;
                Ok(CommandOutcome::Help)
            }
            Command::Get(key) => {
                let value = current_value(machine, key);
                write!(reply, "{} = {value}", key.name())?;
                write_clamp_note(reply, machine, key)?;
                Ok(CommandOutcome::Value(key, value))
            }
            Command::Set(key, value) => {
                let value = setting_number(key, value)?;
                machine.update_config(|config| match key {
                    SettingKey::SleepInterval => config.set_sleep_interval(value),
                    SettingKey::AdvertWakeups => config.set_wakeups_per_advert(value),
                    SettingKey::HibernateMax => config.set_max_hibernate_sleep(value),
                })?;
                write!(reply, "{} set to {value}", key.name())?;
                write_clamp_note(reply, machine, key)?;
                Ok(CommandOutcome::Updated(key, value))
            }
        }
    }
}

fn setting_number(key: SettingKey, value: SettingValue) -> Result<u32, CommandError<'static>> {
    match (key, value) {
        (SettingKey::AdvertWakeups, SettingValue::Integer(count)) => Ok(count),
        (SettingKey::AdvertWakeups, SettingValue::Seconds(_)) => Err(CommandError::WrongUnit(key)),
        (_, SettingValue::Integer(seconds) | SettingValue::Seconds(seconds)) => Ok(seconds),
    }
}

fn current_value<I: MonotonicInstant>(machine: &LifecycleMachine<I>, key: SettingKey) -> u32 {
    let config = machine.config();
    match key {
        SettingKey::SleepInterval => config.sleep_interval_secs,
        SettingKey::AdvertWakeups => u32::from(config.wakeups_per_advert),
        SettingKey::HibernateMax => config.max_hibernate_sleep_secs,
    }
}

/// Notes when the advertisement threshold exceeds what the counter reaches.
fn write_clamp_note<I: MonotonicInstant, W: Write>(
    reply: &mut W,
    machine: &LifecycleMachine<I>,
    key: SettingKey,
) -> fmt::Result {
    let config = machine.config();
    let effective = config.effective_wakeups_per_advert();
    if key == SettingKey::AdvertWakeups && effective != config.wakeups_per_advert {
        write!(reply, " (effective {effective})")?;
    }
    Ok(())
}

fn help_text(topic: Option<&str>) -> &'static str {
    const OVERVIEW: &str = "commands: exit, status, help [command], get <setting>, set <setting> <value>; \
settings: sleep.interval, advert.wakeups, hibernate.max";

    let Some(topic) = topic else {
        return OVERVIEW;
    };
    if topic.eq_ignore_ascii_case("exit") {
        "exit: leave interactive mode and sleep"
    } else if topic.eq_ignore_ascii_case("status") {
        "status: show wake state, battery, and hibernation flags"
    } else if topic.eq_ignore_ascii_case("get") {
        "get <setting>: show sleep.interval, advert.wakeups, or hibernate.max"
    } else if topic.eq_ignore_ascii_case("set") {
        "set <setting> <value>: sleep.interval <secs|Nm|Nh>, advert.wakeups <1-255, counts above 63 act as 63>, hibernate.max <3600-86400 secs>"
    } else {
        OVERVIEW
    }
}
