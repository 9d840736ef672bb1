/// A line typed in interactive mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Raise a trigger, optionally with a label
    Trigger(Option<String>),
    Status,
    Stats,
    Help,
    Quit,
    /// Blank line
    Empty,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut parts = line.split_whitespace();
        let Some(word) = parts.next() else {
            return Ok(Command::Empty);
        };

        let command = match word.to_ascii_lowercase().as_str() {
            "trigger" | "t" => {
                let label: Vec<&str> = parts.collect();
                if label.is_empty() {
                    Command::Trigger(None)
                } else {
                    Command::Trigger(Some(label.join("_")))
                }
            }
            "status" | "s" => Command::Status,
            "stats" => Command::Stats,
            "help" | "h" | "?" => Command::Help,
            "quit" | "q" | "exit" => Command::Quit,
            other => {
                return Err(format!(
                    "Unknown command '{}'. Type 'help' for a list of commands.",
                    other
                ))
            }
        };

        Ok(command)
    }
}

pub const HELP: &str = "\
Commands:
  trigger, t [label]  Save a clip around this moment
  status, s           Show capture and clip status
  stats               Show session statistics
  help, h             Show this help
  quit, q             Stop and print the session summary";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("t"), Ok(Command::Trigger(None)));
        assert_eq!(
            Command::parse("trigger person detected"),
            Ok(Command::Trigger(Some("person_detected".to_string())))
        );
        assert_eq!(Command::parse("  S "), Ok(Command::Status));
        assert_eq!(Command::parse("stats"), Ok(Command::Stats));
        assert_eq!(Command::parse("?"), Ok(Command::Help));
        assert_eq!(Command::parse("q"), Ok(Command::Quit));
        assert_eq!(Command::parse(""), Ok(Command::Empty));
    }

    #[test]
    fn test_unknown_command() {
        let err = Command::parse("record").unwrap_err();
        assert!(err.contains("Unknown command 'record'"));
    }
}
