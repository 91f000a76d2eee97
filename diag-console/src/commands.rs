//! Console command parsing

use diag_mux::TransportMode;
use thiserror::Error;

/// Help text shown by `help`
pub const HELP: &str = "\
commands:
  mode <usb|md>                 switch the active transport
  write <ctx> <periph> <text>   write text for a context/peripheral
  read <ctx>                    queue a read for a context
  inject <ctx> <text>           host sends text to a context (USB)
  close <ctx> <periph>          close one peripheral
  drain <ctx>                   read buffered memory-device entries
  status                        show mode and per-context state
  events                        show multiplexer events since last call
  save                          write current settings to disk
  help                          this text
  quit                          shut down";

/// A parsed console command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Switch the active transport
    Mode(TransportMode),
    /// Dispatch a write
    Write {
        context: usize,
        peripheral: u8,
        text: String,
    },
    /// Dispatch a queue-read
    Read { context: usize },
    /// Host-to-device data on the USB link
    Inject { context: usize, text: String },
    /// Dispatch a close-peripheral
    Close { context: usize, peripheral: u8 },
    /// Drain memory-device entries
    Drain { context: usize },
    /// Show state
    Status,
    /// Show buffered events
    Events,
    /// Persist settings
    Save,
    /// Show help
    Help,
    /// Leave the console
    Quit,
}

/// Errors from parsing a console line
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Nothing but whitespace
    #[error("empty command")]
    Empty,

    /// First word is not a command
    #[error("unknown command '{0}' (try 'help')")]
    Unknown(String),

    /// Required argument missing
    #[error("{command}: missing <{argument}>")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },

    /// Argument is not a number in range
    #[error("{argument}: '{value}' is not a valid number")]
    InvalidNumber {
        argument: &'static str,
        value: String,
    },

    /// Mode name not recognized
    #[error("unknown mode '{0}' (expected usb or md)")]
    InvalidMode(String),
}

/// Parse one console line
pub fn parse_command(line: &str) -> Result<ConsoleCommand, CommandError> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim_start()),
        None => (line, ""),
    };

    match word.to_ascii_lowercase().as_str() {
        "" => Err(CommandError::Empty),
        "mode" | "switch" => {
            let name = required("mode", "usb|md", first(rest))?;
            name.parse()
                .map(ConsoleCommand::Mode)
                .map_err(|_| CommandError::InvalidMode(name.to_string()))
        }
        "write" | "w" => {
            let mut parts = rest.splitn(3, char::is_whitespace);
            let context = number("ctx", required("write", "ctx", parts.next())?)?;
            let peripheral = number("periph", required("write", "periph", parts.next())?)?;
            let text = required("write", "text", parts.next())?.to_string();
            Ok(ConsoleCommand::Write {
                context,
                peripheral,
                text,
            })
        }
        "read" => Ok(ConsoleCommand::Read {
            context: number("ctx", required("read", "ctx", first(rest))?)?,
        }),
        "inject" => {
            let (ctx, text) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            let context = number("ctx", required("inject", "ctx", non_empty(ctx))?)?;
            let text = required("inject", "text", non_empty(text.trim_start()))?.to_string();
            Ok(ConsoleCommand::Inject { context, text })
        }
        "close" => {
            let mut parts = rest.split_whitespace();
            let context = number("ctx", required("close", "ctx", parts.next())?)?;
            let peripheral = number("periph", required("close", "periph", parts.next())?)?;
            Ok(ConsoleCommand::Close {
                context,
                peripheral,
            })
        }
        "drain" => Ok(ConsoleCommand::Drain {
            context: number("ctx", required("drain", "ctx", first(rest))?)?,
        }),
        "status" | "s" => Ok(ConsoleCommand::Status),
        "events" => Ok(ConsoleCommand::Events),
        "save" => Ok(ConsoleCommand::Save),
        "help" | "?" => Ok(ConsoleCommand::Help),
        "quit" | "exit" | "q" => Ok(ConsoleCommand::Quit),
        other => Err(CommandError::Unknown(other.to_string())),
    }
}

fn first(rest: &str) -> Option<&str> {
    rest.split_whitespace().next()
}

fn non_empty(s: &str) -> Option<&str> {
    Some(s).filter(|s| !s.is_empty())
}

fn required<'a>(
    command: &'static str,
    argument: &'static str,
    value: Option<&'a str>,
) -> Result<&'a str, CommandError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or(CommandError::MissingArgument { command, argument })
}

fn number<T: std::str::FromStr>(argument: &'static str, value: &str) -> Result<T, CommandError> {
    value.parse().map_err(|_| CommandError::InvalidNumber {
        argument,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode() {
        assert_eq!(
            parse_command("mode md"),
            Ok(ConsoleCommand::Mode(TransportMode::MemoryDevice))
        );
        assert_eq!(
            parse_command("  SWITCH usb "),
            Ok(ConsoleCommand::Mode(TransportMode::Usb))
        );
        assert_eq!(
            parse_command("mode uart"),
            Err(CommandError::InvalidMode("uart".to_string()))
        );
        assert!(matches!(
            parse_command("mode"),
            Err(CommandError::MissingArgument { command: "mode", .. })
        ));
    }

    #[test]
    fn test_write_keeps_spaces_in_text() {
        assert_eq!(
            parse_command("write 0 4 hello  world"),
            Ok(ConsoleCommand::Write {
                context: 0,
                peripheral: 4,
                text: "hello  world".to_string()
            })
        );
    }

    #[test]
    fn test_write_errors() {
        assert_eq!(
            parse_command("write x 0 hi"),
            Err(CommandError::InvalidNumber {
                argument: "ctx",
                value: "x".to_string()
            })
        );
        assert_eq!(
            parse_command("write 0 300 hi"),
            Err(CommandError::InvalidNumber {
                argument: "periph",
                value: "300".to_string()
            })
        );
        assert!(matches!(
            parse_command("write 0 1"),
            Err(CommandError::MissingArgument { argument: "text", .. })
        ));
    }

    #[test]
    fn test_inject() {
        assert_eq!(
            parse_command("inject 1 ping pong"),
            Ok(ConsoleCommand::Inject {
                context: 1,
                text: "ping pong".to_string()
            })
        );
        assert!(matches!(
            parse_command("inject 1"),
            Err(CommandError::MissingArgument { argument: "text", .. })
        ));
    }

    #[test]
    fn test_simple_commands() {
        assert_eq!(parse_command("read 1"), Ok(ConsoleCommand::Read { context: 1 }));
        assert_eq!(
            parse_command("close 0 2"),
            Ok(ConsoleCommand::Close {
                context: 0,
                peripheral: 2
            })
        );
        assert_eq!(parse_command("drain 0"), Ok(ConsoleCommand::Drain { context: 0 }));
        assert_eq!(parse_command("status"), Ok(ConsoleCommand::Status));
        assert_eq!(parse_command("q"), Ok(ConsoleCommand::Quit));
    }

    #[test]
    fn test_empty_and_unknown() {
        assert_eq!(parse_command("   "), Err(CommandError::Empty));
        assert_eq!(
            parse_command("frobnicate 1"),
            Err(CommandError::Unknown("frobnicate".to_string()))
        );
    }

    mod proptest_tests {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #[test]
            fn parse_never_panics(line in "\\PC{0,40}") {
                let _ = parse_command(&line);
            }

            #[test]
            fn write_text_is_kept(ctx in 0usize..16, periph in any::<u8>(), text in "[a-z][a-z ]{0,20}") {
                let line = format!("write {} {} {}", ctx, periph, text);
                prop_assert_eq!(
                    parse_command(&line),
                    Ok(ConsoleCommand::Write { context: ctx, peripheral: periph, text: text.clone() })
                );
            }
        }
    }
}
