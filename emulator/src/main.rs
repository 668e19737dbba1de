mod chip;
mod session;

use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

use node_core::rtc::RtcKind;
use session::Session;

struct Options {
    rtc: RtcKind,
    transcript: Option<PathBuf>,
}

fn main() -> io::Result<()> {
    let options = parse_options().unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("Usage: node-emulator [--rtc <ds3231|rv3028>] [--transcript <path>]");
        process::exit(2);
    });

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    let mut session = Session::new(options.rtc, options.transcript.as_deref())?;
    let mut line = String::new();

    writeln!(
        writer,
        "Sensor node emulator ready ({} on I2C). Type `help` for commands or `quit` to leave.",
        options.rtc
    )?;

    loop {
        line.clear();
        write!(writer, "> ")?;
        writer.flush()?;

        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            writeln!(writer)?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if should_terminate(trimmed) {
            writeln!(writer, "Session closed.")?;
            break;
        }

        let responses = session.handle_command(trimmed)?;
        for response in responses {
            writeln!(writer, "{response}")?;
        }
    }

    Ok(())
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("quit")
}

fn parse_rtc(tag: &str) -> Result<RtcKind, String> {
    if tag.eq_ignore_ascii_case("ds3231") {
        Ok(RtcKind::Ds3231)
    } else if tag.eq_ignore_ascii_case("rv3028") || tag.eq_ignore_ascii_case("rv-3028") {
        Ok(RtcKind::Rv3028)
    } else {
        Err(format!("Unknown RTC chip `{tag}`"))
    }
}

fn parse_options() -> Result<Options, String> {
    let mut options = Options {
        rtc: RtcKind::Rv3028,
        transcript: None,
    };

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if let Some(value) = arg.strip_prefix("--rtc=") {
            options.rtc = parse_rtc(value)?;
        } else if arg == "--rtc" {
            let value = args.next().ok_or("Expected value after --rtc")?;
            options.rtc = parse_rtc(&value)?;
        } else if let Some(value) = arg.strip_prefix("--transcript=") {
            options.transcript = Some(PathBuf::from(value));
        } else if arg == "--transcript" {
            let value = args.next().ok_or("Expected value after --transcript")?;
            options.transcript = Some(PathBuf::from(value));
        } else {
            return Err(format!("Unexpected argument `{arg}`"));
        }
    }

    Ok(options)
}
