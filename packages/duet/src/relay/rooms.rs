use std::collections::{BTreeMap, HashMap};

use duet_protocol::{RoomName, peek_target};
use tokio::sync::mpsc;
use tracing::warn;

pub type MemberId = u64;

/// Result of forwarding one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: u64,
    pub dropped: u64,
}

/// Room membership. Each member is represented by the sending half of its
/// bounded outbound queue; the socket task owns the receiving half.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    next_id: MemberId,
    rooms: HashMap<RoomName, HashMap<MemberId, mpsc::Sender<String>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&mut self, room: RoomName, tx: mpsc::Sender<String>) -> MemberId {
        self.next_id += 1;
        let id = self.next_id;
        self.rooms.entry(room).or_default().insert(id, tx);
        id
    }

    pub fn leave(&mut self, room: RoomName, id: MemberId) -> bool {
        let Some(members) = self.rooms.get_mut(&room) else {
            return false;
        };
        let removed = members.remove(&id).is_some();
        if members.is_empty() {
            self.rooms.remove(&room);
        }
        removed
    }

    pub fn count(&self, room: RoomName) -> usize {
        self.rooms.get(&room).map_or(0, HashMap::len)
    }

    /// Member count of every room, including empty ones.
    pub fn counts(&self) -> BTreeMap<RoomName, usize> {
        RoomName::ALL
            .iter()
            .map(|room| (*room, self.count(*room)))
            .collect()
    }

    /// Queue `text` for every other member of `from`, plus the members of the
    /// rooms linked to `from` for this frame's target. Never blocks: a full or
    /// closed queue counts as dropped and delivery to the rest continues.
    pub fn forward(&self, from: RoomName, sender: MemberId, text: &str) -> Delivery {
        let mut delivery = Delivery::default();

        let same_room = self
            .rooms
            .get(&from)
            .into_iter()
            .flat_map(|members| members.iter())
            .filter(|(id, _)| **id != sender)
            .map(|(id, tx)| (from, *id, tx));

        let linked: Vec<RoomName> = from.linked_rooms(peek_target(text));
        let linked = linked.into_iter().flat_map(move |room| {
            self.rooms
                .get(&room)
                .into_iter()
                .flat_map(move |members| members.iter().map(move |(id, tx)| (room, *id, tx)))
        });

        for (room, id, tx) in same_room.chain(linked) {
            match tx.try_send(text.to_string()) {
                Ok(()) => delivery.delivered += 1,
                Err(e) => {
                    warn!(%room, member = id, error = %e, "dropping frame for member");
                    delivery.dropped += 1;
                }
            }
        }
        delivery
    }
}
