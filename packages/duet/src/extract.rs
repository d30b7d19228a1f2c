//! Turn extraction from aggregated generation output.
//!
//! The model answers with labeled spans such as
//! `<A emotion="happy">…</A><B>…</B>`, possibly wrapped in a fenced code
//! block. The labels are the configured [`SpeakerTags`]. Spans are read left
//! to right without overlap; when none are found the whole cleaned text
//! becomes one turn for the speaker who triggered the round.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use duet_protocol::Speaker;
use regex::Regex;

static FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:xml|[A-Za-z0-9_+-]*\n)?\s*(.*?)\s*```").expect("fence pattern")
});

static DEFAULT_TAGS: LazyLock<SpeakerTags> =
    LazyLock::new(|| SpeakerTags::new("A", "B").expect("default tags"));

static ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z_][A-Za-z0-9_-]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"']+))"#)
        .expect("attribute pattern")
});

#[derive(Debug, thiserror::Error)]
pub enum TagError {
    #[error("speaker tag {0:?} must be non-empty with no whitespace, '<', '>' or '/'")]
    Invalid(String),

    #[error("speaker tags must differ (both are {0:?})")]
    Duplicate(String),

    #[error(transparent)]
    Pattern(#[from] regex::Error),
}

/// Labels the model uses for each character, in history lines, prompt rules
/// and labeled spans.
#[derive(Debug, Clone)]
pub struct SpeakerTags {
    a: String,
    b: String,
    span: Regex,
}

impl SpeakerTags {
    pub fn new(a: impl Into<String>, b: impl Into<String>) -> Result<Self, TagError> {
        let (a, b) = (a.into(), b.into());
        for tag in [&a, &b] {
            if tag.is_empty() || tag.chars().any(|c| c.is_whitespace() || matches!(c, '<' | '>' | '/')) {
                return Err(TagError::Invalid(tag.clone()));
            }
        }
        if a == b {
            return Err(TagError::Duplicate(a));
        }

        // The regex crate has no backreferences, so each label gets its own branch.
        let (ea, eb) = (regex::escape(&a), regex::escape(&b));
        let span = Regex::new(&format!(
            r"(?s)<{ea}(\s[^>]*)?>(.*?)</{ea}>|<{eb}(\s[^>]*)?>(.*?)</{eb}>"
        ))?;
        Ok(Self { a, b, span })
    }

    pub fn tag(&self, speaker: Speaker) -> &str {
        match speaker {
            Speaker::A => &self.a,
            Speaker::B => &self.b,
        }
    }

    /// Split generation output into ordered turns, falling back to a single
    /// turn for `fallback_speaker` when no labeled span is present.
    pub fn extract(&self, text: &str, fallback_speaker: Speaker) -> Vec<ExtractedTurn> {
        let cleaned = strip_fences(text);

        let turns: Vec<ExtractedTurn> = self
            .span
            .captures_iter(&cleaned)
            .filter_map(|caps| {
                let (speaker, attrs, body) = if let Some(body) = caps.get(2) {
                    (Speaker::A, caps.get(1), body)
                } else {
                    (Speaker::B, caps.get(3), caps.get(4)?)
                };
                Some(ExtractedTurn {
                    speaker,
                    text: body.as_str().trim().to_string(),
                    attrs: attrs.map(|m| parse_attrs(m.as_str())).unwrap_or_default(),
                })
            })
            .collect();

        if turns.is_empty() {
            return vec![ExtractedTurn::new(fallback_speaker, cleaned)];
        }
        turns
    }
}

impl Default for SpeakerTags {
    fn default() -> Self {
        DEFAULT_TAGS.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedTurn {
    pub speaker: Speaker,
    pub text: String,
    /// Attributes written on the opening tag, e.g. `emotion`.
    pub attrs: BTreeMap<String, String>,
}

impl ExtractedTurn {
    pub fn new(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            speaker,
            text: text.into(),
            attrs: BTreeMap::new(),
        }
    }

    pub fn emotion(&self) -> Option<&str> {
        self.attrs.get("emotion").map(String::as_str)
    }
}

/// Replace every fenced block with its inner text and trim the result.
pub fn strip_fences(text: &str) -> String {
    FENCE.replace_all(text, "$1").trim().to_string()
}

/// [`SpeakerTags::extract`] with the default `A`/`B` labels.
pub fn extract_turns(text: &str, fallback_speaker: Speaker) -> Vec<ExtractedTurn> {
    DEFAULT_TAGS.extract(text, fallback_speaker)
}

fn parse_attrs(raw: &str) -> BTreeMap<String, String> {
    ATTR.captures_iter(raw)
        .filter_map(|caps| {
            let key = caps.get(1)?.as_str().to_string();
            let value = caps.get(2).or(caps.get(3)).or(caps.get(4))?;
            Some((key, value.as_str().to_string()))
        })
        .collect()
}
