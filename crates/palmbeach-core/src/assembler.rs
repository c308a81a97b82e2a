//! Reassembly of `hcidump --raw` output into whole frames.
//!
//! hcidump prints each HCI packet as a marker line followed by indented
//! continuation lines:
//!
//! ```text
//! > 04 3E 2A 02 01 00 00 11 22 33 44 55 66 1E 02 01 06 1A FF 4C 00
//!   02 15 E2 C5 6D B5 DF FB 48 D2 B0 60 D0 F5 A7 10 96 E0 00 01 00
//!   02 C5 C5
//! < 01 0C 20 02 00 00
//! ```
//!
//! `>` lines are events from the controller (advertising reports), `<` lines
//! are commands sent to it and are never part of a frame.

const EVENT_MARKER: &str = "> ";
const COMMAND_MARKER: &str = "< ";

#[derive(Debug, Default)]
enum State {
    #[default]
    Idle,
    Assembling(String),
}

/// Two-state line assembler: `Idle` or `Assembling` a frame.
#[derive(Debug, Default)]
pub struct PacketAssembler {
    state: State,
}

impl PacketAssembler {
    /// Creates an idle assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one capture line; returns a frame when one is completed.
    ///
    /// A frame completes when the next `>` or `<` line arrives. An empty frame
    /// is never returned.
    pub fn feed(&mut self, line: &str) -> Option<String> {
        if let Some(rest) = line.strip_prefix(EVENT_MARKER) {
            let previous = std::mem::replace(
                &mut self.state,
                State::Assembling(rest.trim().to_string()),
            );
            return Self::flush(previous);
        }

        if line.starts_with(COMMAND_MARKER) {
            return Self::flush(std::mem::take(&mut self.state));
        }

        let content = line.trim();
        if let State::Assembling(buffer) = &mut self.state {
            if !content.is_empty() {
                if !buffer.is_empty() {
                    buffer.push(' ');
                }
                buffer.push_str(content);
            }
        }
        None
    }

    /// Whether a frame is currently being assembled.
    #[must_use]
    pub const fn is_assembling(&self) -> bool {
        matches!(self.state, State::Assembling(_))
    }

    fn flush(state: State) -> Option<String> {
        match state {
            State::Assembling(buffer) if !buffer.is_empty() => Some(buffer),
            State::Assembling(_) | State::Idle => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_ignores_continuation_lines() {
        let mut assembler = PacketAssembler::new();
        assert_eq!(assembler.feed("  02 15 E2"), None);
        assert!(!assembler.is_assembling());
    }

    #[test]
    fn test_event_marker_starts_frame() {
        let mut assembler = PacketAssembler::new();
        assert_eq!(assembler.feed("> 04 3E 2A"), None);
        assert!(assembler.is_assembling());
    }

    #[test]
    fn test_next_event_flushes_previous_frame() {
        let mut assembler = PacketAssembler::new();
        assembler.feed("> 04 3E 2A");
        assembler.feed("  02 01 00");
        assert_eq!(assembler.feed("> 04 3E 1F"), Some("04 3E 2A 02 01 00".into()));
        assert!(assembler.is_assembling());
    }

    #[test]
    fn test_command_marker_flushes_and_returns_to_idle() {
        let mut assembler = PacketAssembler::new();
        assembler.feed("> 04 3E 2A");
        assembler.feed("  02 01");
        assert_eq!(assembler.feed("< 01 0C 20"), Some("04 3E 2A 02 01".into()));
        assert!(!assembler.is_assembling());

        // The command's own continuation lines are dropped.
        assert_eq!(assembler.feed("  00 00"), None);
        assert_eq!(assembler.feed("> 04"), None);
        assert_eq!(assembler.feed("< 01"), Some("04".into()));
    }

    #[test]
    fn test_command_marker_while_idle_is_noop() {
        let mut assembler = PacketAssembler::new();
        assert_eq!(assembler.feed("< 01 0C 20 02 00 00"), None);
        assert!(!assembler.is_assembling());
    }

    #[test]
    fn test_blank_lines_are_not_appended() {
        let mut assembler = PacketAssembler::new();
        assembler.feed("> 04 3E");
        assembler.feed("   ");
        assembler.feed("");
        assembler.feed("  2A\t");
        assert_eq!(assembler.feed("< 01"), Some("04 3E 2A".into()));
    }

    #[test]
    fn test_empty_event_line_is_never_flushed() {
        let mut assembler = PacketAssembler::new();
        assembler.feed("> ");
        assert_eq!(assembler.feed("> 04"), None);
    }

    #[test]
    fn test_unterminated_frame_is_held() {
        let mut assembler = PacketAssembler::new();
        assembler.feed("> 04 3E 2A");
        assembler.feed("  02 01");
        assert!(assembler.is_assembling());
    }
}
