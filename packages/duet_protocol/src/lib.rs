//! Wire frames, speakers and room routing rules shared by the duet relay and router.

pub mod error;
pub mod frame;
pub mod room;
pub mod speaker;

pub use error::ProtocolError;
pub use frame::{
    InboundEvent, TurnFrame, TurnMeta, TurnPhase, UserMessage, ViewerChat, peek_target,
};
pub use room::RoomName;
pub use speaker::Speaker;
