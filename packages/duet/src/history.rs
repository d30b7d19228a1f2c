//! Bounded dialogue history used to build generation prompts.

use std::collections::VecDeque;

/// Ordered `"speaker: utterance"` lines, trimmed from the oldest end while the
/// newline-joined text exceeds the character budget. The budget is a soft cap:
/// a single line is kept even when it alone is over budget.
#[derive(Debug, Clone)]
pub struct DialogueHistory {
    lines: VecDeque<String>,
    budget: usize,
}

impl DialogueHistory {
    pub fn new(budget: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            budget,
        }
    }

    pub fn append(&mut self, line: impl Into<String>) {
        self.lines.push_back(line.into());
        self.trim();
    }

    pub fn trim(&mut self) {
        while self.lines.len() > 1 && self.serialized_len() > self.budget {
            self.lines.pop_front();
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, line) in self.lines.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.push_str(line);
        }
        out
    }

    /// Length of `render()` in characters.
    pub fn serialized_len(&self) -> usize {
        let text: usize = self.lines.iter().map(|l| l.chars().count()).sum();
        text + self.lines.len().saturating_sub(1)
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}
