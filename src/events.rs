//! Wire protocol and the outbound fan-out seam
//!
//! `ServerEvent` is everything the room can say, serialized as JSON with a
//! `type` tag. `ClientMessage` is everything a client can send. The room never
//! talks to sockets directly; it hands events to an `Outbox`.

use crate::games::cards::Card;
use crate::games::drag_race::LaneShift;
use crate::games::snake::{Direction, Point};
use crate::identity::ConnId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Local wall-clock stamp attached to chat and system lines
pub fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandView {
    pub user: String,
    pub hand_index: usize,
    pub cards: Vec<Card>,
    pub value: u32,
    pub wager: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandOutcome {
    Natural,
    Win,
    Push,
    Lose,
    Bust,
    Forfeit,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandResult {
    pub user: String,
    pub hand_index: usize,
    pub value: u32,
    pub outcome: HandOutcome,
    /// Total returned to the player, stake included
    pub payout: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HorseView {
    pub number: usize,
    pub name: String,
    pub odds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Payout {
    pub user: String,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RacerView {
    pub user: String,
    pub car: String,
    pub lane: u8,
    pub position: f64,
    pub speed: f64,
    pub boosts: u32,
    pub finished: bool,
    pub dnf: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PotholeView {
    pub lane: u8,
    pub position: f64,
}

/// Outbound events
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    System {
        text: String,
        time: String,
    },
    Chat {
        user: String,
        text: String,
        title: Option<String>,
        time: String,
    },
    Users {
        users: Vec<String>,
    },
    ClearLocal,
    ClearAll,
    Killall {
        by: String,
    },
    BalanceUpdate {
        balances: BTreeMap<String, u64>,
    },
    AppraisalStarted {
        user: String,
        item: String,
        fee: u64,
        return_in_secs: u64,
    },
    AppraisalComplete {
        user: String,
        item: String,
        original_price: u64,
        value: u64,
        reason: String,
    },

    BjStarted {
        host: String,
        window_secs: u64,
    },
    /// A zero amount is a pass
    BjWager {
        user: String,
        amount: u64,
    },
    BjDeal {
        hands: Vec<HandView>,
        dealer_up: Card,
    },
    BjTurn {
        user: String,
        hand_index: usize,
        cards: Vec<Card>,
        value: u32,
        options: Vec<String>,
    },
    BjAction {
        user: String,
        hand_index: usize,
        action: String,
        cards: Vec<Card>,
        value: u32,
    },
    BjDealer {
        cards: Vec<Card>,
        value: u32,
    },
    BjResult {
        results: Vec<HandResult>,
    },
    BjCancelled {
        reason: String,
    },

    RaceStarted {
        horses: Vec<HorseView>,
        window_secs: u64,
    },
    RaceBet {
        user: String,
        horse: Option<String>,
        amount: u64,
    },
    RaceTick {
        positions: Vec<u32>,
    },
    RaceResult {
        winner: String,
        odds: u64,
        payouts: Vec<Payout>,
    },
    RaceCancelled {
        reason: String,
    },

    DragStarted {
        host: String,
        window_secs: u64,
    },
    DragJoined {
        user: String,
        car: String,
        amount: u64,
        pot: u64,
    },
    DragCountdown {
        remaining: u32,
    },
    DragGo,
    DragTick {
        racers: Vec<RacerView>,
        potholes: Vec<PotholeView>,
    },
    DragPothole {
        user: String,
    },
    DragNitro {
        user: String,
        boosts_left: u32,
    },
    DragResult {
        winner: Option<String>,
        pot: u64,
        order: Vec<String>,
    },
    DragCancelled {
        reason: String,
    },

    SnakeStarted {
        host: String,
        width: i32,
        height: i32,
    },
    SnakeTick {
        body: Vec<Point>,
        food: Point,
        score: u64,
        food_value: u64,
    },
    SnakeOver {
        host: String,
        score: u64,
        reason: String,
    },
}

impl ServerEvent {
    pub fn system(text: impl Into<String>) -> Self {
        ServerEvent::System {
            text: text.into(),
            time: timestamp(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Inbound client frames
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Join { username: String },
    Message { text: String },
    SnakeInput { direction: Direction },
    SnakeQuit,
    DragLane { direction: LaneShift },
    DragNitro,
}

/// Raw real-time input, delivered outside the command text channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    SnakeTurn(Direction),
    SnakeQuit,
    DragLane(LaneShift),
    DragNitro,
}

/// Delivery seam between the room and the transport
pub trait Outbox: Send + Sync {
    fn broadcast(&self, event: ServerEvent);

    fn unicast(&self, conn: ConnId, event: ServerEvent);

    /// System line to everyone
    fn announce(&self, text: &str) {
        self.broadcast(ServerEvent::system(text));
    }

    /// System line to one connection
    fn tell(&self, conn: ConnId, text: &str) {
        self.unicast(conn, ServerEvent::system(text));
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Broadcast(ServerEvent),
    Unicast(ConnId, ServerEvent),
}

/// Outbox that keeps everything it is given, for tests and tooling
#[derive(Debug, Default)]
pub struct RecordingOutbox {
    sent: Mutex<Vec<Sent>>,
}

impl RecordingOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain everything recorded so far
    pub fn take(&self) -> Vec<Sent> {
        match self.sent.lock() {
            Ok(mut sent) => std::mem::take(&mut *sent),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    pub fn broadcasts(&self) -> Vec<ServerEvent> {
        self.snapshot()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Broadcast(ev) => Some(ev),
                Sent::Unicast(..) => None,
            })
            .collect()
    }

    pub fn unicasts_to(&self, conn: ConnId) -> Vec<ServerEvent> {
        self.snapshot()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Unicast(c, ev) if c == conn => Some(ev),
                _ => None,
            })
            .collect()
    }

    /// Text of every system line sent to `conn`
    pub fn lines_to(&self, conn: ConnId) -> Vec<String> {
        self.unicasts_to(conn)
            .into_iter()
            .filter_map(|ev| match ev {
                ServerEvent::System { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    fn snapshot(&self) -> Vec<Sent> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn push(&self, sent: Sent) {
        match self.sent.lock() {
            Ok(mut all) => all.push(sent),
            Err(poisoned) => poisoned.into_inner().push(sent),
        }
    }
}

impl Outbox for RecordingOutbox {
    fn broadcast(&self, event: ServerEvent) {
        self.push(Sent::Broadcast(event));
    }

    fn unicast(&self, conn: ConnId, event: ServerEvent) {
        self.push(Sent::Unicast(conn, event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_event_is_type_tagged() {
        let json = serde_json::to_value(ServerEvent::RaceTick {
            positions: vec![1, 2],
        })
        .unwrap();
        assert_eq!(json["type"], "race_tick");
        assert_eq!(json["positions"][1], 2);

        let json = serde_json::to_value(ServerEvent::ClearAll).unwrap();
        assert_eq!(json["type"], "clear_all");
    }

    #[test]
    fn test_client_message_parsing() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"join","username":"alice"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Join {
                username: "alice".to_string()
            }
        );
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"snake_input","direction":"up"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::SnakeInput {
                direction: Direction::Up
            }
        );
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"drag_lane","direction":"left"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::DragLane {
                direction: LaneShift::Left
            }
        );
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"nope"}"#).is_err());
    }

    #[test]
    fn test_recording_outbox() {
        let out = RecordingOutbox::new();
        out.announce("hello");
        out.tell(ConnId(3), "just you");
        assert_eq!(out.broadcasts().len(), 1);
        assert_eq!(out.lines_to(ConnId(3)), vec!["just you".to_string()]);
        assert_eq!(out.take().len(), 2);
        assert!(out.is_empty());
    }
}
