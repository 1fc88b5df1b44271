//! Instructions: the unit of work carried by the Serial Queue (spec §3/§4.2).

use crate::pattern::{Captures, Pattern};

#[derive(Clone)]
pub(crate) enum Variant {
    Plain,
    Matchable(Pattern),
    Collecting { begin: Pattern, end: Pattern },
}

/// A line to be sent to the printer, along with how (if at all) to capture
/// its response before the confirming `ok`.
#[derive(Clone)]
pub struct Instruction {
    pub message: String,
    pub to_checksum: bool,
    pub(crate) variant: Variant,
}

impl Instruction {
    /// Done when `ok` is seen; nothing else is captured.
    pub fn plain(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            to_checksum: false,
            variant: Variant::Plain,
        }
    }

    /// Captures the first line between send and the terminating `ok` that
    /// matches `pattern`.
    pub fn matchable(message: impl Into<String>, pattern: Pattern) -> Self {
        Self {
            message: message.into(),
            to_checksum: false,
            variant: Variant::Matchable(pattern),
        }
    }

    /// Captures every line between `begin` and `end` (both exclusive of the
    /// markers), however many lines that takes, before the terminating `ok`.
    pub fn collecting(message: impl Into<String>, begin: Pattern, end: Pattern) -> Self {
        Self {
            message: message.into(),
            to_checksum: false,
            variant: Variant::Collecting { begin, end },
        }
    }

    pub fn checksummed(mut self) -> Self {
        self.to_checksum = true;
        self
    }
}

/// What came back for an enqueued instruction, in whatever shape its
/// variant collects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CapturedOutput {
    #[default]
    None,
    Matched(Captures),
    Collected(Vec<String>),
}

/// The final disposition of an enqueued instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstructionOutcome {
    /// The printer sent `ok`; carries whatever was captured along the way.
    Confirmed(CapturedOutput),
    /// No `ok` arrived before the deadline. Soft failure — the queue moves on.
    Timeout,
    /// The link itself failed or closed. Fatal — the queue stops.
    LinkFailure,
}
