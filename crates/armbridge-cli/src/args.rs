//! Command-line arguments.

use std::process::ExitCode;

use clap::{CommandFactory, Parser, error::ErrorKind};

/// Bridge a message bus to a robotic arm controller over serial.
#[derive(Parser, Debug, PartialEq, Eq)]
#[command(name = "armbridge")]
pub struct Args {
    /// Serial device of the arm controller, e.g. /dev/ttyACM0.
    pub serial_port: String,
}

/// Usage line, e.g. `Usage: armbridge <SERIAL_PORT>`.
pub fn usage() -> String {
    Args::command().render_usage().to_string()
}

/// Parse `argv` (program name first).
///
/// On failure returns the text to print on stdout and the exit code:
/// `--help` prints help and succeeds, anything else prints the usage line
/// and fails.
pub fn parse_args(argv: impl IntoIterator<Item = String>) -> Result<Args, (String, ExitCode)> {
    Args::try_parse_from(argv).map_err(|e| match e.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => (e.to_string(), ExitCode::SUCCESS),
        _ => (usage(), ExitCode::FAILURE),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn serial_port_is_taken_from_first_argument() {
        let args = parse_args(argv(&["armbridge", "/dev/ttyACM0"])).unwrap();
        assert_eq!(args.serial_port, "/dev/ttyACM0");
    }

    #[test]
    fn missing_serial_port_prints_usage_and_fails() {
        let (message, code) = parse_args(argv(&["armbridge"])).unwrap_err();
        assert_eq!(message, usage());
        assert!(message.starts_with("Usage: armbridge"), "{message}");
        assert!(message.contains("<SERIAL_PORT>"), "{message}");
        assert_eq!(code, ExitCode::FAILURE);
    }

    #[test]
    fn extra_arguments_are_rejected() {
        let (_, code) = parse_args(argv(&["armbridge", "/dev/ttyACM0", "/dev/ttyACM1"])).unwrap_err();
        assert_eq!(code, ExitCode::FAILURE);
    }

    #[test]
    fn help_succeeds() {
        let (message, code) = parse_args(argv(&["armbridge", "--help"])).unwrap_err();
        assert!(message.contains("SERIAL_PORT"), "{message}");
        assert_eq!(code, ExitCode::SUCCESS);
    }
}
