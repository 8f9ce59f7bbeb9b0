//! Subscriber command table
//!
//! Static descriptors for the commands the subscriber port accepts. The table
//! is read-only; dispatch resolves the first argument against it
//! case-insensitively and checks the arity constraint before invoking the
//! handler.

/// Handler selector for a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandHandler {
    /// Liveness check, replies with a fixed pong status
    Ping,
    /// Register interest in one or more channels
    Subscribe,
    /// Drop interest in the given channels (all of them when none are given)
    Unsubscribe,
}

/// A command descriptor.
///
/// `arity > 0` means exactly that many arguments including the command name;
/// `arity < 0` means at least `|arity|` arguments.
#[derive(Debug)]
pub struct CommandSpec {
    pub name: &'static str,
    pub arity: i32,
    pub handler: CommandHandler,
}

impl CommandSpec {
    /// Check the arity constraint against an actual argument count.
    pub fn arity_matches(&self, argc: usize) -> bool {
        let argc = argc as i32;
        !((self.arity > 0 && self.arity != argc) || argc < -self.arity)
    }
}

/// The command table. Order is irrelevant; lookup is by name.
pub static COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "ping",
        arity: 1,
        handler: CommandHandler::Ping,
    },
    CommandSpec {
        name: "subscribe",
        arity: -2,
        handler: CommandHandler::Subscribe,
    },
    CommandSpec {
        name: "unsubscribe",
        arity: -1,
        handler: CommandHandler::Unsubscribe,
    },
];

/// Look up a command by name, case-insensitively.
pub fn lookup_command(name: &[u8]) -> Option<&'static CommandSpec> {
    COMMANDS
        .iter()
        .find(|spec| spec.name.as_bytes().eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn lookup_is_case_insensitive() {
        assert!(lookup_command(b"ping").is_some());
        assert!(lookup_command(b"PING").is_some());
        assert!(lookup_command(b"SuBsCrIbE").is_some());
        assert!(lookup_command(b"publish").is_none());
        assert!(lookup_command(b"").is_none());
    }

    #[test_case("ping", 1, true; "ping with no args")]
    #[test_case("ping", 2, false; "ping with extra arg")]
    #[test_case("subscribe", 1, false; "subscribe without channels")]
    #[test_case("subscribe", 2, true; "subscribe one channel")]
    #[test_case("subscribe", 5, true; "subscribe many channels")]
    #[test_case("unsubscribe", 1, true; "unsubscribe without channels")]
    #[test_case("unsubscribe", 3, true; "unsubscribe two channels")]
    fn arity_constraints(name: &str, argc: usize, ok: bool) {
        let spec = lookup_command(name.as_bytes()).unwrap();
        assert_eq!(spec.arity_matches(argc), ok);
    }
}
