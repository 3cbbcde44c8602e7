//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::predictor::Prediction;
use crate::game::replica::ReplicaState;
use crate::game::rules::FinishReason;
use crate::game::state::{GroupAssignment, PlacementZone, Seat};

/// Bumped whenever a message below changes shape
pub const PROTOCOL_VERSION: u32 = 1;

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Take a seat at a table
    JoinMatch {
        /// Specific table, otherwise any table with a free seat
        #[serde(default)]
        match_id: Option<Uuid>,
    },

    /// Table scene loaded; the match starts once both seats are ready
    SceneReady,

    /// Strike the cue ball
    RequestShot {
        /// Aim direction in radians
        direction: f32,
        /// 0.0 - 1.0
        power: f32,
        /// English, -1.0 (left) to 1.0 (right)
        #[serde(default)]
        side_spin: f32,
        /// Follow (+) / draw (-), -1.0 to 1.0
        #[serde(default)]
        follow: f32,
        /// Pocket called for the 8-ball
        #[serde(default)]
        called_pocket: Option<u8>,
    },

    /// Put the cue ball down while holding ball-in-hand
    PlaceBallInHand { x: f32, y: f32 },

    /// Ask for a trajectory preview of a shot without taking it
    PreviewShot {
        direction: f32,
        power: f32,
        #[serde(default)]
        side_spin: f32,
        #[serde(default)]
        follow: f32,
    },

    /// The peer's countdown for `turn_id` reached zero
    TurnTimeout { turn_id: u64 },

    /// Concede the match
    Forfeit,

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },

    /// Leave current match
    LeaveMatch,
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome {
        user_id: Uuid,
        protocol_version: u32,
        server_time: u64,
    },

    /// Confirmation of a seat at a table
    MatchJoined {
        user_id: Uuid,
        match_id: Uuid,
        seat: Seat,
        /// Seed the rack order was drawn from
        seed: u64,
        players: Vec<PlayerInfo>,
    },

    PlayerJoined { player: PlayerInfo },

    PlayerLeft { user_id: Uuid, reason: String },

    /// A shot was accepted; aiming is locked until the next turn starts
    BeginShot { shooter: Seat, turn_id: u64 },

    TurnStarted {
        shooter: Seat,
        turn_id: u64,
        /// Pending placement per seat
        ball_in_hand: [Option<PlacementZone>; 2],
        is_break_shot: bool,
        /// Shared-clock deadline in Unix milliseconds
        turn_ends_at: u64,
    },

    GroupsUpdated {
        /// Seat one's group
        group_a: GroupAssignment,
        /// Seat two's group
        group_b: GroupAssignment,
        locked: bool,
    },

    /// For display-only pocketed-ball trackers
    BallPocketedUi { ball: u8 },
    BallUnpocketedUi { ball: u8 },

    /// Narration of the last ruling
    RuleMessage { text: String },

    MatchFinished { winner: Seat, reason: FinishReason },

    /// Ball positions for rendering (sent while balls move)
    TableSnapshot { tick: u64, balls: Vec<BallSnapshot> },

    /// Answer to `PreviewShot`, addressed to the asker
    ShotPreview { user_id: Uuid, prediction: Prediction },

    /// Full replicated state for a peer joining mid-match
    StateSync { user_id: Uuid, state: ReplicaState },

    /// A command was refused
    Rejected {
        user_id: Uuid,
        code: String,
        message: String,
    },

    /// Pong response
    Pong {
        user_id: Uuid,
        /// Echo back client timestamp
        t: u64,
        server_time: u64,
    },
}

impl ServerMsg {
    /// The one peer an addressed message is meant for; `None` means everyone
    pub fn recipient(&self) -> Option<Uuid> {
        match self {
            ServerMsg::Welcome { user_id, .. }
            | ServerMsg::MatchJoined { user_id, .. }
            | ServerMsg::ShotPreview { user_id, .. }
            | ServerMsg::StateSync { user_id, .. }
            | ServerMsg::Rejected { user_id, .. }
            | ServerMsg::Pong { user_id, .. } => Some(*user_id),
            _ => None,
        }
    }

    pub fn is_for(&self, user_id: Uuid) -> bool {
        self.recipient().map_or(true, |to| to == user_id)
    }
}

/// Seated player info
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub user_id: Uuid,
    pub display_name: String,
    pub seat: Seat,
}

/// Ball state in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BallSnapshot {
    pub number: u8,
    /// Position X (along the table)
    pub x: f32,
    /// Position Y
    pub y: f32,
    /// Centre height above the bed; below rest height while dropping
    pub height: f32,
    pub moving: bool,
    pub visible: bool,
    pub pocketed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_use_type_tags() {
        let msg: ClientMsg = serde_json::from_str(
            r#"{"type":"request_shot","direction":1.5,"power":0.8,"called_pocket":2}"#,
        )
        .unwrap();
        match msg {
            ClientMsg::RequestShot {
                power,
                side_spin,
                called_pocket,
                ..
            } => {
                assert_eq!(power, 0.8);
                assert_eq!(side_spin, 0.0);
                assert_eq!(called_pocket, Some(2));
            }
            other => panic!("unexpected {other:?}"),
        }

        let ready: ClientMsg = serde_json::from_str(r#"{"type":"scene_ready"}"#).unwrap();
        assert!(matches!(ready, ClientMsg::SceneReady));
    }

    #[test]
    fn addressed_messages_reach_only_their_peer() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        let rejected = ServerMsg::Rejected {
            user_id: me,
            code: "not_your_turn".into(),
            message: String::new(),
        };
        assert!(rejected.is_for(me));
        assert!(!rejected.is_for(other));
        assert!(ServerMsg::RuleMessage { text: "x".into() }.is_for(other));
    }
}
