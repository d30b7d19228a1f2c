//! JSON text frames exchanged over relay sockets.

use serde::{Deserialize, Serialize};

use crate::speaker::Speaker;

/// Phase of the three-frame envelope that carries one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnPhase {
    Start,
    Message,
    End,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnMeta {
    pub character: Speaker,
    #[serde(rename = "turnId")]
    pub turn_id: u64,
}

/// Router → front-end frame. `text` and `emotion` only appear on `message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnFrame {
    #[serde(rename = "type")]
    pub phase: TurnPhase,
    pub role: String,
    pub target: Speaker,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotion: Option<String>,
    pub meta: TurnMeta,
}

impl TurnFrame {
    /// Build the `start` / `message` / `end` frames for one turn, in send order.
    pub fn envelope(
        turn_id: u64,
        speaker: Speaker,
        text: &str,
        emotion: Option<&str>,
    ) -> [TurnFrame; 3] {
        let frame = |phase: TurnPhase| TurnFrame {
            phase,
            role: "assistant".to_string(),
            target: speaker,
            text: None,
            emotion: None,
            meta: TurnMeta {
                character: speaker,
                turn_id,
            },
        };
        let mut message = frame(TurnPhase::Message);
        message.text = Some(text.to_string());
        message.emotion = emotion.map(str::to_string);
        [frame(TurnPhase::Start), message, frame(TurnPhase::End)]
    }
}

/// Echo of the viewer text that triggered a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "user_message")]
pub struct UserMessage {
    pub role: String,
    pub text: String,
    pub source: Speaker,
}

impl UserMessage {
    pub fn new(text: &str, source: Speaker) -> Self {
        Self {
            role: "user".to_string(),
            text: text.to_string(),
            source,
        }
    }
}

/// Viewer input as sent by a front-end or an injector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "chat")]
pub struct ViewerChat {
    pub text: String,
    pub source: Speaker,
}

/// Frames the router reacts to. Anything else with a `type` is `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    Chat {
        text: String,
        source: Speaker,
    },
    SpeechEnd {
        character: Speaker,
        #[serde(rename = "turnId")]
        turn_id: u64,
    },
    #[serde(other)]
    Other,
}

impl InboundEvent {
    /// `None` for text that is not a JSON object with a known shape.
    pub fn parse(raw: &str) -> Option<InboundEvent> {
        serde_json::from_str(raw).ok()
    }
}

#[derive(Deserialize)]
struct TargetField {
    #[serde(default)]
    target: Option<serde_json::Value>,
}

/// Read the `target` field of a frame without interpreting anything else.
pub fn peek_target(raw: &str) -> Option<Speaker> {
    let frame: TargetField = serde_json::from_str(raw).ok()?;
    frame.target?.as_str()?.parse().ok()
}
