//! Host-side dot-command surface.
//!
//! Commands are parsed before anything reaches the execution context; only
//! `.load` and `.reset` have context-side effects.

/// Help text shown for `.help`.
pub const HELP_TEXT: &str = "\
.help              show this help
.clear             clear the display
.reset             destroy and recreate the execution context
.load <url|name>   load an external module into the context
.history           show prior submissions";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Clear,
    Reset,
    Load(String),
    History,
}

impl Command {
    /// Parse a dot-command line. Returns `None` for anything that is not a
    /// recognized command (including `.load` without an argument); such
    /// lines are code or user error, for the caller to decide.
    pub fn parse(line: &str) -> Option<Command> {
        let line = line.trim();
        if !line.starts_with('.') {
            return None;
        }
        let mut parts = line.splitn(2, char::is_whitespace);
        let head = parts.next().unwrap_or_default();
        let rest = parts.next().unwrap_or("").trim();
        match head {
            ".help" => Some(Command::Help),
            ".clear" => Some(Command::Clear),
            ".reset" => Some(Command::Reset),
            ".history" => Some(Command::History),
            ".load" if !rest.is_empty() => Some(Command::Load(rest.to_string())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_commands() {
        assert_eq!(Command::parse(".help"), Some(Command::Help));
        assert_eq!(Command::parse(" .clear "), Some(Command::Clear));
        assert_eq!(Command::parse(".reset"), Some(Command::Reset));
        assert_eq!(Command::parse(".history"), Some(Command::History));
        assert_eq!(
            Command::parse(".load lodash"),
            Some(Command::Load("lodash".into()))
        );
        assert_eq!(
            Command::parse(".load https://example.com/lib.js"),
            Some(Command::Load("https://example.com/lib.js".into()))
        );
    }

    #[test]
    fn test_rejects_non_commands() {
        assert_eq!(Command::parse("1 + 1"), None);
        assert_eq!(Command::parse(".load"), None);
        assert_eq!(Command::parse(".unknown"), None);
        assert_eq!(Command::parse(""), None);
    }
}
