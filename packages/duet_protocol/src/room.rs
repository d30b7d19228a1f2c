//! Relay rooms and the cross-room forwarding rule.
//!
//! There are exactly three rooms. Each character has a solo room, and the
//! paired room sees both. A frame sent into a solo room is mirrored into the
//! paired room as a log feed; a frame sent into the paired room reaches the
//! solo room named by its `target`, or both solo rooms when it names none.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::speaker::Speaker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RoomName {
    #[serde(rename = "soloA")]
    SoloA,
    #[serde(rename = "soloB")]
    SoloB,
    #[serde(rename = "paired")]
    Paired,
}

/// Request paths accepted by the relay. Several spellings exist because
/// front-ends and routers of different vintages still connect with them.
const PATH_TABLE: &[(&str, RoomName)] = &[
    ("/A", RoomName::SoloA),
    ("/WA", RoomName::SoloA),
    ("/wsA", RoomName::SoloA),
    ("/soloA", RoomName::SoloA),
    ("/B", RoomName::SoloB),
    ("/WB", RoomName::SoloB),
    ("/wsB", RoomName::SoloB),
    ("/soloB", RoomName::SoloB),
    ("/AB", RoomName::Paired),
    ("/ab", RoomName::Paired),
    ("/wsAB", RoomName::Paired),
    ("/paired", RoomName::Paired),
];

impl RoomName {
    pub const ALL: [RoomName; 3] = [RoomName::SoloA, RoomName::SoloB, RoomName::Paired];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SoloA => "soloA",
            Self::SoloB => "soloB",
            Self::Paired => "paired",
        }
    }

    pub fn solo(speaker: Speaker) -> RoomName {
        match speaker {
            Speaker::A => Self::SoloA,
            Speaker::B => Self::SoloB,
        }
    }

    /// Exact lookup in the path table. A trailing slash is ignored.
    pub fn from_path(path: &str) -> Option<RoomName> {
        let trimmed = match path.strip_suffix('/') {
            Some(rest) if !rest.is_empty() => rest,
            _ => path,
        };
        PATH_TABLE
            .iter()
            .find(|(p, _)| *p == trimmed)
            .map(|(_, room)| *room)
    }

    /// Resolve a connection's room, falling back to `default` for unknown paths.
    pub fn resolve(path: &str, default: RoomName) -> RoomName {
        Self::from_path(path).unwrap_or(default)
    }

    /// Rooms (other than this one) that receive a frame sent into this room.
    pub fn linked_rooms(&self, target: Option<Speaker>) -> Vec<RoomName> {
        match self {
            Self::SoloA | Self::SoloB => vec![Self::Paired],
            Self::Paired => match target {
                Some(speaker) => vec![Self::solo(speaker)],
                None => vec![Self::SoloA, Self::SoloB],
            },
        }
    }
}

impl fmt::Display for RoomName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoomName {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "soloA" => Ok(Self::SoloA),
            "soloB" => Ok(Self::SoloB),
            "paired" => Ok(Self::Paired),
            _ => Err(ProtocolError::UnknownRoom(s.to_string())),
        }
    }
}
