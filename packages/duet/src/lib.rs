//! Room relay and turn-synchronized dialogue router for two characters.

pub mod chat_bridge;
pub mod config;
pub mod extract;
pub mod generation;
pub mod history;
pub mod metrics;
pub mod prompt;
pub mod relay;
pub mod router;
