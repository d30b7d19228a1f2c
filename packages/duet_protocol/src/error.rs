//! Errors raised while interpreting protocol values.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown speaker: {0}")]
    UnknownSpeaker(String),

    #[error("unknown room: {0}")]
    UnknownRoom(String),
}
