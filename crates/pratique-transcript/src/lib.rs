//! Turn aggregation primitives for live conversations.
//!
//! The remote conversation service streams transcription as many tiny text
//! fragments, each tagged with the speaker. This crate turns that stream into
//! two things:
//! - coalesced [`TranscriptUnit`]s, emitted once per [`TRANSCRIPT_TICK`], for
//!   display (see [`aggregator::TranscriptAggregator`]);
//! - an append-only [`history::TranscriptLog`] of finalized turns, used for
//!   evaluation once the conversation is over.

pub mod aggregator;
pub mod history;

use std::time::Duration;

/// Cadence at which buffered fragments are coalesced and emitted.
///
/// Fragments often arrive every few milliseconds. Batching them on a fixed
/// tick keeps frontend updates cheap regardless of the network cadence.
pub const TRANSCRIPT_TICK: Duration = Duration::from_millis(150);

/// Prefix of synthetic instructions that must never appear in a transcript.
pub(crate) const SYSTEM_PREFIX: &str = "(System:";

/// Speaker of a transcript fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The person practicing.
    User,
    /// The AI conversation partner.
    Agent,
}

impl Role {
    /// Header written in front of every finalized turn in the raw log.
    pub fn header(&self) -> &'static str {
        match self {
            Self::User => "User: ",
            Self::Agent => "Avatar: ",
        }
    }

    /// Parses a raw log line back into its role and text.
    pub fn split_line(line: &str) -> Option<(Role, &str)> {
        [Self::User, Self::Agent]
            .into_iter()
            .find_map(|role| line.strip_prefix(role.header()).map(|text| (role, text)))
    }
}

/// A run of consecutive same-role fragments, coalesced during one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptUnit {
    /// Who spoke.
    pub role: Role,
    /// Concatenated fragment text, in arrival order.
    pub text: String,
}

impl TranscriptUnit {
    /// Whether this unit was spoken by the user.
    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_split_back_into_roles() {
        assert_eq!(Role::split_line("User: hello"), Some((Role::User, "hello")));
        assert_eq!(
            Role::split_line("Avatar: hi there"),
            Some((Role::Agent, "hi there"))
        );
        assert_eq!(Role::split_line("hello"), None);
    }
}
