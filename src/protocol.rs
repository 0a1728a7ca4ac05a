//! Client command interpreter.
//!
//! The wire protocol has exactly one request and no framing:
//!
//! ```text
//! Request:  run | run\n | run\r\n
//! Response: the full payload, then the server shuts down its send side
//! ```
//!
//! Anything else is not a command and is silently ignored. Matching is
//! against a single read's worth of bytes, case-sensitive.

use crate::runtime::StreamState;

/// Parsed client command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Start (or restart) streaming the payload from byte 0.
    Run,
}

/// Recognize a command in the bytes returned by one read.
pub fn parse(input: &[u8]) -> Option<Command> {
    match input {
        b"run" | b"run\n" | b"run\r\n" => Some(Command::Run),
        _ => None,
    }
}

/// Apply the command found in `input`, if any, to a connection's transmit state.
///
/// `Run` rewinds the cursor to 0 and queues `payload_len` bytes, even if a
/// previous stream is still in flight.
pub fn interpret(input: &[u8], state: &mut StreamState, payload_len: usize) -> Option<Command> {
    let command = parse(input)?;
    match command {
        Command::Run => state.arm(payload_len),
    }
    Some(command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Lifecycle;

    #[test]
    fn test_parse_run() {
        assert_eq!(parse(b"run"), Some(Command::Run));
        assert_eq!(parse(b"run\n"), Some(Command::Run));
        assert_eq!(parse(b"run\r\n"), Some(Command::Run));
    }

    #[test]
    fn test_parse_rejects_near_misses() {
        assert_eq!(parse(b"Run"), None);
        assert_eq!(parse(b"RUN\n"), None);
        assert_eq!(parse(b"running"), None);
        assert_eq!(parse(b"ru"), None);
        assert_eq!(parse(b"run\n\n"), None);
        assert_eq!(parse(b"run\r"), None);
        assert_eq!(parse(b" run"), None);
        assert_eq!(parse(b""), None);
    }

    #[test]
    fn test_interpret_arms_stream() {
        let mut state = StreamState::new();

        assert_eq!(interpret(b"run\r\n", &mut state, 1000), Some(Command::Run));
        assert_eq!(state.lifecycle(), Lifecycle::Streaming);
        assert_eq!(state.cursor(), 0);
        assert_eq!(state.remaining(), 1000);
    }

    #[test]
    fn test_interpret_ignores_other_input() {
        let mut state = StreamState::new();

        assert_eq!(interpret(b"hello\n", &mut state, 1000), None);
        assert_eq!(state.lifecycle(), Lifecycle::AwaitingCommand);
        assert_eq!(state.remaining(), 0);
    }

    #[test]
    fn test_interpret_rewinds_in_flight_stream() {
        let mut state = StreamState::new();
        interpret(b"run", &mut state, 1000);
        state.advance(600);

        interpret(b"run\n", &mut state, 1000);
        assert_eq!(state.cursor(), 0);
        assert_eq!(state.remaining(), 1000);
    }
}
