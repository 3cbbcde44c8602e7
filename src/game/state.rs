//! Turn and match state machine
//!
//! `MatchState` is only ever written by the table authority. Every mutating
//! entry point checks `MatchPhase::accepts_mutations` first, so once a match
//! has ended any late ruling, timeout or forfeit is refused.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use super::ball::{Group, BALLS_PER_GROUP};
use super::rules::{FinishReason, Outcome, Ruling};
use super::shot::ShotRecord;
use crate::util::time::deadline_after;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Seat {
    #[default]
    One,
    Two,
}

impl Seat {
    pub const ALL: [Seat; 2] = [Seat::One, Seat::Two];

    pub fn opponent(self) -> Self {
        match self {
            Seat::One => Seat::Two,
            Seat::Two => Seat::One,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Seat::One => 0,
            Seat::Two => 1,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Seat::One => "Player 1",
            Seat::Two => "Player 2",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupAssignment {
    #[default]
    Unknown,
    Solids,
    Stripes,
}

impl GroupAssignment {
    pub fn group(self) -> Option<Group> {
        match self {
            GroupAssignment::Unknown => None,
            GroupAssignment::Solids => Some(Group::Solids),
            GroupAssignment::Stripes => Some(Group::Stripes),
        }
    }
}

impl From<Group> for GroupAssignment {
    fn from(group: Group) -> Self {
        match group {
            Group::Solids => GroupAssignment::Solids,
            Group::Stripes => GroupAssignment::Stripes,
        }
    }
}

/// Where a ball-in-hand cue ball may be placed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementZone {
    /// Behind the head string
    Kitchen,
    /// Anywhere on the playing surface
    Anywhere,
}

/// Object balls of each group still on the table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCounts {
    pub solids: u8,
    pub stripes: u8,
}

impl GroupCounts {
    pub fn full() -> Self {
        Self {
            solids: BALLS_PER_GROUP,
            stripes: BALLS_PER_GROUP,
        }
    }

    pub fn remaining(&self, group: Group) -> u8 {
        match group {
            Group::Solids => self.solids,
            Group::Stripes => self.stripes,
        }
    }

    /// Counts once this shot's pocketed balls are off the table
    pub fn after(&self, shot: &ShotRecord) -> Self {
        Self {
            solids: self
                .solids
                .saturating_sub(shot.pocketed_count(Group::Solids) as u8),
            stripes: self
                .stripes
                .saturating_sub(shot.pocketed_count(Group::Stripes) as u8),
        }
    }
}

impl Default for GroupCounts {
    fn default() -> Self {
        Self::full()
    }
}

/// Identifies one turn. `ends_at_ms` is on the shared network clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TurnToken {
    pub turn_id: u64,
    pub shooter: Seat,
    pub ends_at_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    #[default]
    WaitingForPlayers,
    Break,
    OpenPlay,
    GroupsLocked,
    BallInHand,
    ShotInProgress,
    MatchEnded,
}

impl MatchPhase {
    /// The one lifecycle check every authoritative mutation goes through
    pub fn accepts_mutations(self) -> bool {
        !matches!(self, MatchPhase::MatchEnded)
    }

    pub fn is_playing(self) -> bool {
        !matches!(self, MatchPhase::WaitingForPlayers | MatchPhase::MatchEnded)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("match has ended")]
    MatchOver,
    #[error("match has not started")]
    NotStarted,
    #[error("match already started")]
    AlreadyStarted,
    #[error("a shot is still being resolved")]
    ShotPending,
    #[error("turn {got} is not the current turn ({current})")]
    StaleTurn { current: u64, got: u64 },
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MatchState {
    pub phase: MatchPhase,
    pub shooter: Seat,
    pub groups: [GroupAssignment; 2],
    pub groups_locked: bool,
    pub is_break_shot: bool,
    pub ball_in_hand: [Option<PlacementZone>; 2],
    pub remaining: GroupCounts,
    pub winner: Option<Seat>,
    pub finish_reason: Option<FinishReason>,
    pub turn: TurnToken,
    /// A shot has been taken and not yet ruled on
    pub shot_pending: bool,
}

impl MatchState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group_of(&self, seat: Seat) -> Option<Group> {
        self.groups[seat.index()].group()
    }

    pub fn placement_zone(&self, seat: Seat) -> Option<PlacementZone> {
        self.ball_in_hand[seat.index()]
    }

    /// First rack of the match
    pub fn start(&mut self, breaker: Seat, now_ms: u64, turn_secs: u64) -> Result<(), StateError> {
        if self.phase != MatchPhase::WaitingForPlayers {
            return Err(StateError::AlreadyStarted);
        }
        self.start_rack(breaker, now_ms, turn_secs);
        Ok(())
    }

    /// Fresh rack: open table, full counts, breaker places in the kitchen
    pub fn start_rack(&mut self, breaker: Seat, now_ms: u64, turn_secs: u64) {
        self.groups = [GroupAssignment::Unknown; 2];
        self.groups_locked = false;
        self.remaining = GroupCounts::full();
        self.is_break_shot = true;
        self.ball_in_hand = [None; 2];
        self.ball_in_hand[breaker.index()] = Some(PlacementZone::Kitchen);
        self.begin_turn(breaker, now_ms, turn_secs);
    }

    fn begin_turn(&mut self, shooter: Seat, now_ms: u64, turn_secs: u64) {
        self.shooter = shooter;
        self.shot_pending = false;
        self.turn = TurnToken {
            turn_id: self.turn.turn_id + 1,
            shooter,
            ends_at_ms: deadline_after(now_ms, turn_secs),
        };
        self.phase = self.idle_phase();
    }

    /// Phase while waiting for the current shooter to act
    fn idle_phase(&self) -> MatchPhase {
        if self.is_break_shot {
            MatchPhase::Break
        } else if self.placement_zone(self.shooter).is_some() {
            MatchPhase::BallInHand
        } else if self.groups_locked {
            MatchPhase::GroupsLocked
        } else {
            MatchPhase::OpenPlay
        }
    }

    /// Lock groups with `group` going to `seat`. No-op once locked.
    pub fn assign_groups(&mut self, seat: Seat, group: Group) -> bool {
        if self.groups_locked {
            return false;
        }
        self.groups[seat.index()] = group.into();
        self.groups[seat.opponent().index()] = group.opposite().into();
        self.groups_locked = true;
        true
    }

    pub fn begin_shot(&mut self) -> Result<(), StateError> {
        if !self.phase.accepts_mutations() {
            return Err(StateError::MatchOver);
        }
        if !self.phase.is_playing() {
            return Err(StateError::NotStarted);
        }
        if self.shot_pending {
            return Err(StateError::ShotPending);
        }
        self.shot_pending = true;
        self.ball_in_hand[self.shooter.index()] = None;
        self.phase = MatchPhase::ShotInProgress;
        Ok(())
    }

    /// Apply a ruling for the pending shot and start whatever comes next
    pub fn apply_ruling(&mut self, ruling: &Ruling, now_ms: u64, turn_secs: u64) -> Result<(), StateError> {
        if !self.phase.accepts_mutations() {
            return Err(StateError::MatchOver);
        }
        self.shot_pending = false;
        self.remaining = ruling.remaining;
        if let Some(group) = ruling.group_lock {
            self.assign_groups(ruling.shooter, group);
        }

        let next = match ruling.outcome {
            Outcome::MatchWon { winner, reason } => {
                self.finish(winner, reason);
                return Ok(());
            }
            Outcome::Rerack { breaker } => {
                self.start_rack(breaker, now_ms, turn_secs);
                return Ok(());
            }
            Outcome::ShooterContinues => ruling.shooter,
            Outcome::TurnPasses => ruling.shooter.opponent(),
        };

        self.is_break_shot = false;
        self.ball_in_hand = [None; 2];
        if let Some((seat, zone)) = ruling.ball_in_hand {
            self.ball_in_hand[seat.index()] = Some(zone);
        }
        self.begin_turn(next, now_ms, turn_secs);
        Ok(())
    }

    /// Procedural turn pass when the countdown runs out. Not a foul: the
    /// opponent only gets ball-in-hand when `grant_ball_in_hand` is set, or
    /// the kitchen placement of an untaken break.
    pub fn expire_turn(
        &mut self,
        turn_id: u64,
        now_ms: u64,
        turn_secs: u64,
        grant_ball_in_hand: bool,
    ) -> Result<Seat, StateError> {
        if !self.phase.accepts_mutations() {
            return Err(StateError::MatchOver);
        }
        if !self.phase.is_playing() {
            return Err(StateError::NotStarted);
        }
        if turn_id != self.turn.turn_id {
            return Err(StateError::StaleTurn {
                current: self.turn.turn_id,
                got: turn_id,
            });
        }
        if self.shot_pending {
            return Err(StateError::ShotPending);
        }

        let next = self.shooter.opponent();
        self.ball_in_hand = [None; 2];
        if self.is_break_shot {
            self.ball_in_hand[next.index()] = Some(PlacementZone::Kitchen);
        } else if grant_ball_in_hand {
            self.ball_in_hand[next.index()] = Some(PlacementZone::Anywhere);
        }
        self.begin_turn(next, now_ms, turn_secs);
        Ok(next)
    }

    pub fn forfeit(&mut self, seat: Seat) -> Result<Seat, StateError> {
        self.concede(seat, FinishReason::Forfeit)
    }

    /// `seat` gives up the match for `reason`; returns the winner
    pub fn concede(&mut self, seat: Seat, reason: FinishReason) -> Result<Seat, StateError> {
        if !self.phase.accepts_mutations() {
            return Err(StateError::MatchOver);
        }
        if !self.phase.is_playing() {
            return Err(StateError::NotStarted);
        }
        let winner = seat.opponent();
        self.finish(winner, reason);
        Ok(winner)
    }

    fn finish(&mut self, winner: Seat, reason: FinishReason) {
        info!(winner = ?winner, reason = ?reason, "match finished");
        self.winner = Some(winner);
        self.finish_reason = Some(reason);
        self.shot_pending = false;
        self.ball_in_hand = [None; 2];
        self.phase = MatchPhase::MatchEnded;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::rules::{Foul, Outcome, Ruling};

    fn started() -> MatchState {
        let mut state = MatchState::new();
        state.start(Seat::One, 1_000, 30).unwrap();
        state
    }

    fn ruling(shooter: Seat, outcome: Outcome) -> Ruling {
        Ruling {
            shooter,
            foul: None,
            break_result: None,
            group_lock: None,
            outcome,
            ball_in_hand: None,
            respot_eight: false,
            remaining: GroupCounts::full(),
            narration: String::new(),
        }
    }

    #[test]
    fn start_puts_breaker_in_kitchen() {
        let state = started();
        assert_eq!(state.phase, MatchPhase::Break);
        assert_eq!(state.placement_zone(Seat::One), Some(PlacementZone::Kitchen));
        assert_eq!(state.turn.turn_id, 1);
        assert_eq!(state.turn.ends_at_ms, 31_000);
        assert!(!state.groups_locked);
    }

    #[test]
    fn locked_groups_never_change() {
        let mut state = started();
        assert!(state.assign_groups(Seat::One, Group::Stripes));
        assert!(!state.assign_groups(Seat::Two, Group::Stripes));
        assert_eq!(state.group_of(Seat::One), Some(Group::Stripes));
        assert_eq!(state.group_of(Seat::Two), Some(Group::Solids));
    }

    #[test]
    fn one_shot_at_a_time() {
        let mut state = started();
        state.begin_shot().unwrap();
        assert_eq!(state.begin_shot(), Err(StateError::ShotPending));
        assert_eq!(state.phase, MatchPhase::ShotInProgress);
    }

    #[test]
    fn foul_ruling_hands_opponent_the_cue_ball() {
        let mut state = started();
        state.begin_shot().unwrap();
        let mut foul = ruling(Seat::One, Outcome::TurnPasses);
        foul.foul = Some(Foul::Scratch);
        foul.ball_in_hand = Some((Seat::Two, PlacementZone::Anywhere));
        state.apply_ruling(&foul, 2_000, 30).unwrap();

        assert_eq!(state.shooter, Seat::Two);
        assert_eq!(state.phase, MatchPhase::BallInHand);
        assert_eq!(state.turn.turn_id, 2);
        assert!(!state.is_break_shot);
    }

    #[test]
    fn timeout_is_a_procedural_pass() {
        let mut state = started();
        state.begin_shot().unwrap();
        state
            .apply_ruling(&ruling(Seat::One, Outcome::ShooterContinues), 2_000, 30)
            .unwrap();

        let stale = state.turn.turn_id - 1;
        assert!(matches!(
            state.expire_turn(stale, 40_000, 30, false),
            Err(StateError::StaleTurn { .. })
        ));

        let current = state.turn.turn_id;
        assert_eq!(state.expire_turn(current, 40_000, 30, false), Ok(Seat::Two));
        assert_eq!(state.placement_zone(Seat::Two), None);
        assert_eq!(state.phase, MatchPhase::OpenPlay);

        // Same token again is now stale
        assert!(state.expire_turn(current, 41_000, 30, false).is_err());
    }

    #[test]
    fn timeout_can_grant_ball_in_hand() {
        let mut state = started();
        state.begin_shot().unwrap();
        state
            .apply_ruling(&ruling(Seat::One, Outcome::ShooterContinues), 2_000, 30)
            .unwrap();

        let current = state.turn.turn_id;
        assert_eq!(state.expire_turn(current, 40_000, 30, true), Ok(Seat::Two));
        assert_eq!(state.placement_zone(Seat::Two), Some(PlacementZone::Anywhere));
        assert_eq!(state.placement_zone(Seat::One), None);
        assert_eq!(state.shooter, Seat::Two);
        assert_eq!(state.turn.turn_id, current + 1);
    }

    #[test]
    fn no_one_wins_before_the_break() {
        let mut state = MatchState::new();
        assert_eq!(state.forfeit(Seat::One), Err(StateError::NotStarted));
        assert_eq!(
            state.concede(Seat::Two, FinishReason::Disconnect),
            Err(StateError::NotStarted)
        );
        assert_eq!(state.winner, None);
        assert_eq!(state.phase, MatchPhase::WaitingForPlayers);
    }

    #[test]
    fn nothing_applies_after_the_match_ends() {
        let mut state = started();
        assert_eq!(state.forfeit(Seat::One), Ok(Seat::Two));
        assert_eq!(state.phase, MatchPhase::MatchEnded);

        let before = state.clone();
        assert_eq!(
            state.apply_ruling(&ruling(Seat::One, Outcome::ShooterContinues), 5_000, 30),
            Err(StateError::MatchOver)
        );
        assert_eq!(state.begin_shot(), Err(StateError::MatchOver));
        assert_eq!(state.forfeit(Seat::Two), Err(StateError::MatchOver));
        assert_eq!(state, before);
    }

    #[test]
    fn rerack_restarts_the_break() {
        let mut state = started();
        state.assign_groups(Seat::One, Group::Solids);
        state.begin_shot().unwrap();
        state
            .apply_ruling(&ruling(Seat::One, Outcome::Rerack { breaker: Seat::Two }), 3_000, 30)
            .unwrap();
        assert_eq!(state.phase, MatchPhase::Break);
        assert_eq!(state.shooter, Seat::Two);
        assert!(!state.groups_locked);
        assert_eq!(state.group_of(Seat::One), None);
    }
}
