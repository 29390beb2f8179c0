use crate::{Role, SYSTEM_PREFIX, TranscriptUnit, history::TranscriptLog};

/// Coalesces incoming transcript fragments into turns.
///
/// Fragments are buffered as they arrive and released in batches by
/// [`TranscriptAggregator::tick`], which merges consecutive fragments from
/// the same speaker into a single [`TranscriptUnit`]. Independently of the
/// tick, every fragment extends the in-progress turn; when the speaker
/// changes, that turn is finalized into the [`TranscriptLog`].
#[derive(Debug, Default)]
pub struct TranscriptAggregator {
    pending: Vec<TranscriptUnit>,
    current: Option<TranscriptUnit>,
    log: TranscriptLog,
}

impl TranscriptAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers a fragment. Returns `false` when the fragment is ignored:
    /// blank text, or a synthetic system instruction echoed back.
    pub fn push(&mut self, role: Role, text: &str) -> bool {
        if text.starts_with(SYSTEM_PREFIX) || text.trim().is_empty() {
            return false;
        }

        match self.pending.last_mut() {
            Some(unit) if unit.role == role => unit.text.push_str(text),
            _ => self.pending.push(TranscriptUnit {
                role,
                text: text.to_string(),
            }),
        }

        match self.current.as_mut() {
            Some(turn) if turn.role == role => turn.text.push_str(text),
            _ => {
                if let Some(turn) = self.current.take() {
                    self.log.append(turn.role, turn.text);
                }
                self.current = Some(TranscriptUnit {
                    role,
                    text: text.to_string(),
                });
            }
        }
        true
    }

    /// Releases everything buffered since the previous tick, coalesced per
    /// speaker run and in arrival order.
    pub fn tick(&mut self) -> Vec<TranscriptUnit> {
        std::mem::take(&mut self.pending)
    }

    /// The turn that has not been finalized yet, if any.
    pub fn current_turn(&self) -> Option<&TranscriptUnit> {
        self.current.as_ref()
    }

    pub fn log(&self) -> &TranscriptLog {
        &self.log
    }

    /// Finalizes the in-progress turn and returns the complete log.
    pub fn finish(&mut self) -> TranscriptLog {
        if let Some(turn) = self.current.take() {
            self.log.append(turn.role, turn.text);
        }
        self.pending.clear();
        std::mem::take(&mut self.log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(role: Role, text: &str) -> TranscriptUnit {
        TranscriptUnit {
            role,
            text: text.to_string(),
        }
    }

    #[test]
    fn tick_coalesces_same_role_runs() {
        let mut aggregator = TranscriptAggregator::new();
        aggregator.push(Role::Agent, "How ");
        aggregator.push(Role::Agent, "are ");
        aggregator.push(Role::Agent, "you?");
        aggregator.push(Role::User, "Fine");
        aggregator.push(Role::User, ", thanks");

        assert_eq!(
            aggregator.tick(),
            vec![unit(Role::Agent, "How are you?"), unit(Role::User, "Fine, thanks")]
        );
        assert!(aggregator.tick().is_empty());
    }

    #[test]
    fn role_boundaries_survive_interleaving() {
        let mut aggregator = TranscriptAggregator::new();
        aggregator.push(Role::User, "a");
        aggregator.push(Role::Agent, "b");
        aggregator.push(Role::User, "c");

        let units = aggregator.tick();
        assert_eq!(units.len(), 3);
        assert!(units[0].is_user());
        assert!(!units[1].is_user());
        assert!(units[2].is_user());
    }

    #[test]
    fn noise_and_system_echoes_are_ignored() {
        let mut aggregator = TranscriptAggregator::new();
        assert!(!aggregator.push(Role::User, "   "));
        assert!(!aggregator.push(Role::User, "(System: keep going)"));
        assert!(aggregator.tick().is_empty());
        assert!(aggregator.current_turn().is_none());
    }

    #[test]
    fn turns_are_finalized_on_role_switch() {
        let mut aggregator = TranscriptAggregator::new();
        aggregator.push(Role::Agent, "Hello");
        aggregator.push(Role::Agent, " there");
        assert!(aggregator.log().is_empty());

        aggregator.push(Role::User, "Hi");
        assert_eq!(aggregator.log().raw(), "Avatar: Hello there\n");
        assert_eq!(aggregator.current_turn(), Some(&unit(Role::User, "Hi")));

        let log = aggregator.finish();
        assert_eq!(log.raw(), "Avatar: Hello there\nUser: Hi\n");
        assert!(aggregator.current_turn().is_none());
    }
}
