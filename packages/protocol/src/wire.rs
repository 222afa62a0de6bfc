use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Line prefixes the QA agent firmware emits asynchronously. Anything starting
/// with one of these is dropped while waiting for a command response.
pub const NOISE_PREFIXES: &[&str] = &["HEARTBEAT", "[", "CMD:"];

/// Power state the `SLEEP` command can put the MCU into.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
#[serde(rename_all = "UPPERCASE")]
pub enum SleepMode {
    Active,
    Light,
    Deep,
    Shutdown,
}

/// A command line on the QA agent's UART surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Task(u8),
    Sleep(SleepMode),
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Task(number) => write!(f, "TASK {number}"),
            Command::Sleep(mode) => write!(f, "SLEEP {mode}"),
        }
    }
}

/// Classification of one line read back from the DUT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseLine<'a> {
    Ok(&'a str),
    Err(&'a str),
    /// Heartbeat or debug echo, never part of a response.
    Noise,
    /// Anything else, e.g. a partial line. Callers keep polling.
    Other,
}

/// Classify a single trimmed response line per the OK/ERR framing.
pub fn classify_line(line: &str) -> ResponseLine<'_> {
    if NOISE_PREFIXES.iter().any(|p| line.starts_with(p)) {
        return ResponseLine::Noise;
    }
    if line.starts_with("OK") {
        ResponseLine::Ok(line)
    } else if line.starts_with("ERR") {
        ResponseLine::Err(line)
    } else {
        ResponseLine::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_command_formatting() {
        assert_eq!(Command::Task(2).to_string(), "TASK 2");
        assert_eq!(Command::Sleep(SleepMode::Deep).to_string(), "SLEEP DEEP");
        assert_eq!(
            Command::Sleep(SleepMode::Shutdown).to_string(),
            "SLEEP SHUTDOWN"
        );
    }

    #[test]
    fn test_sleep_mode_parses_case_insensitively() {
        assert_eq!(SleepMode::from_str("deep").unwrap(), SleepMode::Deep);
        assert_eq!(SleepMode::from_str("ACTIVE").unwrap(), SleepMode::Active);
        assert!(SleepMode::from_str("HIBERNATE").is_err());
    }

    #[test]
    fn test_classify_line() {
        assert_eq!(classify_line("OK task done"), ResponseLine::Ok("OK task done"));
        assert_eq!(classify_line("ERR bad task"), ResponseLine::Err("ERR bad task"));
        assert_eq!(classify_line("HEARTBEAT 42"), ResponseLine::Noise);
        assert_eq!(classify_line("[debug] tick"), ResponseLine::Noise);
        assert_eq!(classify_line("CMD: TASK 1"), ResponseLine::Noise);
        assert_eq!(classify_line("garbage"), ResponseLine::Other);
    }
}
