//! Peer-side view of a match, built only from authority broadcasts
//!
//! Applying a broadcast is idempotent: the same message twice leaves the
//! view unchanged, an older `TurnStarted` never overwrites a newer one, and
//! nothing is applied after `MatchFinished`. The authority keeps one of these
//! as well, fed with its own outgoing messages, to bring late joiners up to
//! date with a single `StateSync`.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::rules::FinishReason;
use super::state::{GroupAssignment, PlacementZone, Seat};
use crate::ws::protocol::ServerMsg;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnView {
    pub shooter: Seat,
    pub turn_id: u64,
    pub ball_in_hand: [Option<PlacementZone>; 2],
    pub is_break_shot: bool,
    pub turn_ends_at: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaState {
    pub turn: Option<TurnView>,
    /// The current turn's shot has been taken
    pub shooting: bool,
    pub groups: [GroupAssignment; 2],
    pub groups_locked: bool,
    pub pocketed: BTreeSet<u8>,
    pub last_rule: Option<String>,
    pub finished: Option<(Seat, FinishReason)>,
}

impl ReplicaState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_turn(&self) -> Option<u64> {
        self.turn.map(|t| t.turn_id)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_some()
    }

    /// Apply one broadcast; returns whether anything changed
    pub fn apply(&mut self, msg: &ServerMsg) -> bool {
        if self.is_finished() {
            return false;
        }
        let before = self.clone();

        match msg {
            ServerMsg::TurnStarted {
                shooter,
                turn_id,
                ball_in_hand,
                is_break_shot,
                turn_ends_at,
            } => {
                let current = self.current_turn();
                if current.map_or(true, |id| *turn_id >= id) {
                    if current != Some(*turn_id) {
                        self.shooting = false;
                    }
                    self.turn = Some(TurnView {
                        shooter: *shooter,
                        turn_id: *turn_id,
                        ball_in_hand: *ball_in_hand,
                        is_break_shot: *is_break_shot,
                        turn_ends_at: *turn_ends_at,
                    });
                }
            }
            ServerMsg::BeginShot { turn_id, .. } => {
                if self.current_turn() == Some(*turn_id) {
                    self.shooting = true;
                }
            }
            ServerMsg::GroupsUpdated {
                group_a,
                group_b,
                locked,
            } => {
                self.groups = [*group_a, *group_b];
                self.groups_locked = *locked;
            }
            ServerMsg::BallPocketedUi { ball } => {
                self.pocketed.insert(*ball);
            }
            ServerMsg::BallUnpocketedUi { ball } => {
                self.pocketed.remove(ball);
            }
            ServerMsg::RuleMessage { text } => {
                self.last_rule = Some(text.clone());
            }
            ServerMsg::MatchFinished { winner, reason } => {
                self.finished = Some((*winner, *reason));
            }
            ServerMsg::StateSync { state, .. } => {
                *self = state.clone();
            }
            _ => {}
        }

        *self != before
    }
}
