//! Prompt assembly for one dialogue round.

use chrono::{DateTime, Local};
use duet_protocol::Speaker;

use crate::extract::SpeakerTags;
use crate::history::DialogueHistory;

#[derive(Debug, Clone)]
pub struct PromptBuilder {
    system_prompt: String,
    reply_char_limit: usize,
    tags: SpeakerTags,
}

impl PromptBuilder {
    pub fn new(system_prompt: impl Into<String>, reply_char_limit: usize) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            reply_char_limit,
            tags: SpeakerTags::default(),
        }
    }

    pub fn with_tags(mut self, tags: SpeakerTags) -> Self {
        self.tags = tags;
        self
    }

    pub fn tags(&self) -> &SpeakerTags {
        &self.tags
    }

    /// System instructions, the current time, round rules, then the history.
    pub fn build(&self, opener: Speaker, history: &DialogueHistory, now: DateTime<Local>) -> String {
        let mut prompt = String::with_capacity(self.system_prompt.len() + history.serialized_len() * 3 + 256);
        prompt.push_str(self.system_prompt.trim_end());
        prompt.push_str("\n\n");
        prompt.push_str(&format!("Current time: {}\n", now.format("%Y-%m-%d %H:%M")));
        prompt.push_str("Rules for this reply:\n");
        let (a, b) = (self.tags.tag(Speaker::A), self.tags.tag(Speaker::B));
        prompt.push_str(&format!("- {} speaks first.\n", self.tags.tag(opener)));
        prompt.push_str(&format!("- Write only <{a}>...</{a}> and <{b}>...</{b}> lines.\n"));
        prompt.push_str(&format!(
            "- Keep the whole reply within {} characters.\n",
            self.reply_char_limit
        ));
        if !history.is_empty() {
            prompt.push('\n');
            prompt.push_str(&history.render());
        }
        prompt
    }
}
