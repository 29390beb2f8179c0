use crate::Role;

/// One finalized speaker turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

/// Append-only sequence of finalized turns.
///
/// Alongside the structured turns the log keeps a raw, newline-delimited
/// mirror where every line carries a role header (`User: ` or `Avatar: `).
/// The raw form is what gets handed to the evaluator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscriptLog {
    turns: Vec<Turn>,
    raw: String,
}

impl TranscriptLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a finalized turn. Empty turns are not recorded.
    pub fn append(&mut self, role: Role, text: impl Into<String>) {
        let text = text.into();
        if text.trim().is_empty() {
            return;
        }

        self.raw.push_str(role.header());
        self.raw.push_str(&text);
        self.raw.push('\n');
        self.turns.push(Turn { role, text });
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// The raw role-tagged mirror of the log.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Returns the last `count` non-empty raw lines, oldest first.
    pub fn tail_lines(&self, count: usize) -> Vec<&str> {
        let lines: Vec<&str> = self
            .raw
            .lines()
            .filter(|line| !line.trim().is_empty())
            .collect();
        lines[lines.len().saturating_sub(count)..].to_vec()
    }

    /// Rebuilds the per-speaker turns from a raw transcript. Lines without a
    /// known header continue the previous turn.
    pub fn parse(raw: &str) -> Self {
        let mut log = Self::new();
        let mut current: Option<Turn> = None;
        for line in raw.lines().filter(|line| !line.trim().is_empty()) {
            match Role::split_line(line) {
                Some((role, text)) => {
                    if let Some(turn) = current.take() {
                        log.append(turn.role, turn.text);
                    }
                    current = Some(Turn {
                        role,
                        text: text.to_string(),
                    });
                }
                None => match current.as_mut() {
                    Some(turn) => {
                        turn.text.push('\n');
                        turn.text.push_str(line);
                    }
                    None => log::debug!("Dropping transcript line without a speaker: {line}"),
                },
            }
        }

        if let Some(turn) = current {
            log.append(turn.role, turn.text);
        }
        log
    }
}
