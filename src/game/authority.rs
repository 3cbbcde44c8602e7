//! Table authority
//!
//! The synchronous heart of one match: it owns the physics world, the shot
//! aggregator, the match state and the scheduler, and is the only writer of
//! any of them. Every peer command goes through `authorize` before it can
//! touch anything. Outgoing messages are queued in an outbox that the match
//! task drains each tick.

use glam::Vec2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::util::time::{deadline_after, secs_until};
use crate::ws::protocol::{PlayerInfo, ServerMsg};

use super::ball::{CUE, EIGHT};
use super::physics::{CollisionResponse, PhysicsParams, PhysicsWorld, ShotError};
use super::predictor::predict;
use super::replica::ReplicaState;
use super::rules::{resolve, FinishReason, Outcome, RulesConfig};
use super::scheduler::{Scheduler, TaskTag, WaitContext, WaitFor};
use super::shot::{PhysicsEvent, ShotAggregator};
use super::snapshot::SnapshotBuilder;
use super::state::{MatchPhase, MatchState, PlacementZone, Seat, StateError};
use super::table::{rack_order, PocketId, TableLayout, BALL_RADIUS};

/// Slack for peer clocks when they report a turn timeout
pub const TIMEOUT_TOLERANCE_MS: u64 = 500;

/// Per-match settings, filled from the server configuration
#[derive(Debug, Clone)]
pub struct MatchSettings {
    pub rules: RulesConfig,
    pub turn_secs: u64,
    pub collision_response: CollisionResponse,
    pub break_cluster: bool,
    /// How long a finished table stays up before it is torn down
    pub linger_secs: u64,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            rules: RulesConfig::default(),
            turn_secs: 30,
            collision_response: CollisionResponse::Planned,
            break_cluster: true,
            linger_secs: 5,
        }
    }
}

/// A state-changing request from a seated peer
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SceneReady,
    RequestShot {
        direction: f32,
        power: f32,
        spin: Vec2,
        called_pocket: Option<u8>,
    },
    PlaceBallInHand { pos: Vec2 },
    PreviewShot {
        direction: f32,
        power: f32,
        spin: Vec2,
    },
    TurnTimeout { turn_id: u64 },
    Forfeit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Ready,
    Shoot,
    Place,
    Preview,
    Timeout(u64),
    Forfeit,
}

impl Command {
    fn action(&self) -> Action {
        match self {
            Command::SceneReady => Action::Ready,
            Command::RequestShot { .. } => Action::Shoot,
            Command::PlaceBallInHand { .. } => Action::Place,
            Command::PreviewShot { .. } => Action::Preview,
            Command::TurnTimeout { turn_id } => Action::Timeout(*turn_id),
            Command::Forfeit => Action::Forfeit,
        }
    }
}

/// Why a command was refused. Sent back to the peer as `Rejected`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("not seated at this table")]
    NotSeated,
    #[error("table is full")]
    TableFull,
    #[error("match has ended")]
    MatchOver,
    #[error("match has not started")]
    NotStarted,
    #[error("not your turn")]
    NotYourTurn,
    #[error("a shot is still being resolved")]
    ShotPending,
    #[error("no ball in hand")]
    NoBallInHand,
    #[error("cue ball cannot be placed there")]
    BadPlacement,
    #[error("no pocket {0}")]
    UnknownPocket(u8),
    #[error("turn {0} is not the current turn")]
    StaleTurn(u64),
    #[error("turn clock has {0}s left")]
    TurnNotExpired(u64),
    #[error("invalid shot: {0}")]
    InvalidShot(#[from] ShotError),
}

impl Rejection {
    /// Stable code for the wire
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::NotSeated => "not_seated",
            Rejection::TableFull => "table_full",
            Rejection::MatchOver => "match_over",
            Rejection::NotStarted => "not_started",
            Rejection::NotYourTurn => "not_your_turn",
            Rejection::ShotPending => "shot_pending",
            Rejection::NoBallInHand => "no_ball_in_hand",
            Rejection::BadPlacement => "bad_placement",
            Rejection::UnknownPocket(_) => "unknown_pocket",
            Rejection::StaleTurn(_) => "stale_turn",
            Rejection::TurnNotExpired(_) => "turn_not_expired",
            Rejection::InvalidShot(_) => "invalid_shot",
        }
    }
}

impl From<StateError> for Rejection {
    fn from(err: StateError) -> Self {
        match err {
            StateError::MatchOver => Rejection::MatchOver,
            StateError::NotStarted | StateError::AlreadyStarted => Rejection::NotStarted,
            StateError::ShotPending => Rejection::ShotPending,
            StateError::StaleTurn { got, .. } => Rejection::StaleTurn(got),
        }
    }
}

/// Continuations parked on the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wake {
    StartMatch,
    ResolveShot,
    TurnExpired { turn_id: u64 },
    Close,
}

#[derive(Debug, Clone)]
struct Seated {
    user_id: Uuid,
    display_name: String,
    ready: bool,
    connected: bool,
}

pub struct TableAuthority {
    match_id: Uuid,
    seed: u64,
    settings: MatchSettings,
    state: MatchState,
    world: PhysicsWorld,
    shot: Option<ShotAggregator>,
    scheduler: Scheduler<Wake>,
    seats: [Option<Seated>; 2],
    rng: ChaCha8Rng,
    /// Mirror of what peers have been told, for late joiners
    replica: ReplicaState,
    snapshots: SnapshotBuilder,
    outbox: Vec<ServerMsg>,
    tick: u64,
    closed: bool,
}

impl TableAuthority {
    pub fn new(match_id: Uuid, seed: u64, settings: MatchSettings) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let params = PhysicsParams {
            response: settings.collision_response,
            break_cluster: settings.break_cluster,
            ..PhysicsParams::default()
        };
        let mut world = PhysicsWorld::new(params, TableLayout::standard());
        world.rack(&rack_order(&mut rng));

        let mut scheduler = Scheduler::new();
        scheduler.schedule(TaskTag::MatchStart, WaitFor::AllPeersReady, Wake::StartMatch);

        Self {
            match_id,
            seed,
            settings,
            state: MatchState::new(),
            world,
            shot: None,
            scheduler,
            seats: [None, None],
            rng,
            replica: ReplicaState::new(),
            snapshots: SnapshotBuilder::at_default_rate(),
            outbox: Vec::new(),
            tick: 0,
            closed: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.match_id
    }

    pub fn state(&self) -> &MatchState {
        &self.state
    }

    #[cfg(test)]
    pub fn world(&self) -> &PhysicsWorld {
        &self.world
    }

    pub fn replica(&self) -> &ReplicaState {
        &self.replica
    }

    /// Torn down; the match task should exit
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn seat_of(&self, user_id: Uuid) -> Option<Seat> {
        Seat::ALL.into_iter().find(|s| {
            self.seats[s.index()]
                .as_ref()
                .is_some_and(|p| p.user_id == user_id)
        })
    }

    #[cfg(test)]
    pub fn user_at(&self, seat: Seat) -> Option<Uuid> {
        self.seats[seat.index()].as_ref().map(|p| p.user_id)
    }

    /// Connected, seated peers
    pub fn connected_count(&self) -> usize {
        self.seats.iter().flatten().filter(|p| p.connected).count()
    }

    pub fn seated_count(&self) -> usize {
        self.seats.iter().flatten().count()
    }

    /// Still seating players: not started and not torn down
    pub fn is_seating(&self) -> bool {
        !self.closed
            && self.state.phase == MatchPhase::WaitingForPlayers
            && self.seats.iter().any(Option::is_none)
    }

    pub fn players(&self) -> Vec<PlayerInfo> {
        Seat::ALL
            .into_iter()
            .filter_map(|seat| {
                self.seats[seat.index()].as_ref().map(|p| PlayerInfo {
                    user_id: p.user_id,
                    display_name: p.display_name.clone(),
                    seat,
                })
            })
            .collect()
    }

    pub fn drain_outbox(&mut self) -> Vec<ServerMsg> {
        std::mem::take(&mut self.outbox)
    }

    // ========================================================================
    // Seating
    // ========================================================================

    /// Seat a peer, or reconnect one already seated
    pub fn join(&mut self, user_id: Uuid, display_name: String) -> Result<Seat, Rejection> {
        if let Some(seat) = self.seat_of(user_id) {
            if let Some(player) = self.seats[seat.index()].as_mut() {
                player.connected = true;
            }
            info!(match_id = %self.match_id, user_id = %user_id, seat = ?seat, "player reconnected");
            self.welcome(user_id, seat);
            return Ok(seat);
        }

        if self.closed || !self.state.phase.accepts_mutations() {
            return Err(self.reject(user_id, Rejection::MatchOver));
        }
        let free = Seat::ALL
            .into_iter()
            .find(|s| self.seats[s.index()].is_none())
            .filter(|_| self.state.phase == MatchPhase::WaitingForPlayers);
        let Some(seat) = free else {
            return Err(self.reject(user_id, Rejection::TableFull));
        };

        self.seats[seat.index()] = Some(Seated {
            user_id,
            display_name: display_name.clone(),
            ready: false,
            connected: true,
        });
        info!(
            match_id = %self.match_id,
            user_id = %user_id,
            seat = ?seat,
            "player seated"
        );

        self.broadcast(ServerMsg::PlayerJoined {
            player: PlayerInfo {
                user_id,
                display_name,
                seat,
            },
        });
        self.welcome(user_id, seat);
        Ok(seat)
    }

    fn welcome(&mut self, user_id: Uuid, seat: Seat) {
        let joined = ServerMsg::MatchJoined {
            user_id,
            match_id: self.match_id,
            seat,
            seed: self.seed,
            players: self.players(),
        };
        self.outbox.push(joined);
        self.outbox.push(ServerMsg::StateSync {
            user_id,
            state: self.replica.clone(),
        });
        self.snapshots.force_next();
    }

    /// A peer left or dropped. Mid-match this ends the match.
    pub fn leave(&mut self, user_id: Uuid, now_ms: u64) {
        let Some(seat) = self.seat_of(user_id) else {
            return;
        };
        info!(match_id = %self.match_id, user_id = %user_id, seat = ?seat, "player left");
        self.broadcast(ServerMsg::PlayerLeft {
            user_id,
            reason: "disconnected".to_string(),
        });

        match self.state.phase {
            MatchPhase::WaitingForPlayers => self.seats[seat.index()] = None,
            phase => {
                if let Some(player) = self.seats[seat.index()].as_mut() {
                    player.connected = false;
                }
                if phase.is_playing() && self.state.concede(seat, FinishReason::Disconnect).is_ok() {
                    self.finish_match(now_ms);
                }
            }
        }

        if self.connected_count() == 0 {
            info!(match_id = %self.match_id, "no peers left, closing table");
            self.scheduler.cancel_all();
            self.closed = true;
        }
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Run one peer command through the gate. Refusals are logged and sent
    /// back to the peer as `Rejected`.
    pub fn handle(&mut self, user_id: Uuid, command: Command, now_ms: u64) -> Result<(), Rejection> {
        let result = self.dispatch(user_id, command, now_ms);
        if let Err(rejection) = &result {
            self.reject(user_id, rejection.clone());
        }
        result
    }

    fn dispatch(&mut self, user_id: Uuid, command: Command, now_ms: u64) -> Result<(), Rejection> {
        let seat = self.authorize(user_id, command.action(), now_ms)?;
        match command {
            Command::SceneReady => {
                self.mark_ready(seat);
                Ok(())
            }
            Command::RequestShot {
                direction,
                power,
                spin,
                called_pocket,
            } => self.take_shot(seat, direction, power, spin, called_pocket),
            Command::PlaceBallInHand { pos } => self.place_ball_in_hand(seat, pos),
            Command::PreviewShot {
                direction,
                power,
                spin,
            } => {
                if !direction.is_finite() || !power.is_finite() || !spin.is_finite() {
                    return Err(ShotError::NoDirection.into());
                }
                let prediction = predict(&self.world, Vec2::from_angle(direction), power, spin);
                self.outbox.push(ServerMsg::ShotPreview {
                    user_id,
                    prediction,
                });
                Ok(())
            }
            Command::TurnTimeout { turn_id } => self.expire_turn(turn_id, now_ms),
            Command::Forfeit if self.state.phase == MatchPhase::WaitingForPlayers => {
                // Nobody to award the match to yet
                self.leave(user_id, now_ms);
                Ok(())
            }
            Command::Forfeit => {
                self.state.forfeit(seat)?;
                self.broadcast(ServerMsg::RuleMessage {
                    text: format!("{} forfeits.", seat.label()),
                });
                self.finish_match(now_ms);
                Ok(())
            }
        }
    }

    /// The single gate for every state-changing command
    fn authorize(&self, user_id: Uuid, action: Action, now_ms: u64) -> Result<Seat, Rejection> {
        let seat = self.seat_of(user_id).ok_or(Rejection::NotSeated)?;
        if self.closed || !self.state.phase.accepts_mutations() {
            return Err(Rejection::MatchOver);
        }
        if matches!(action, Action::Ready | Action::Forfeit) {
            return Ok(seat);
        }
        if !self.state.phase.is_playing() {
            return Err(Rejection::NotStarted);
        }
        if self.state.shot_pending || self.shot.is_some() {
            return Err(Rejection::ShotPending);
        }

        match action {
            Action::Timeout(turn_id) => {
                if turn_id != self.state.turn.turn_id {
                    return Err(Rejection::StaleTurn(turn_id));
                }
                if now_ms + TIMEOUT_TOLERANCE_MS < self.state.turn.ends_at_ms {
                    return Err(Rejection::TurnNotExpired(secs_until(
                        now_ms,
                        self.state.turn.ends_at_ms,
                    )));
                }
            }
            Action::Shoot | Action::Place | Action::Preview => {
                if seat != self.state.shooter {
                    return Err(Rejection::NotYourTurn);
                }
                if action == Action::Place && self.state.placement_zone(seat).is_none() {
                    return Err(Rejection::NoBallInHand);
                }
            }
            Action::Ready | Action::Forfeit => {}
        }
        Ok(seat)
    }

    fn reject(&mut self, user_id: Uuid, rejection: Rejection) -> Rejection {
        warn!(
            match_id = %self.match_id,
            user_id = %user_id,
            code = rejection.code(),
            "command rejected: {rejection}"
        );
        self.outbox.push(ServerMsg::Rejected {
            user_id,
            code: rejection.code().to_string(),
            message: rejection.to_string(),
        });
        rejection
    }

    fn mark_ready(&mut self, seat: Seat) {
        if let Some(player) = self.seats[seat.index()].as_mut() {
            if !player.ready {
                debug!(match_id = %self.match_id, seat = ?seat, "scene ready");
            }
            player.ready = true;
        }
    }

    fn all_ready(&self) -> bool {
        self.seats
            .iter()
            .all(|s| s.as_ref().is_some_and(|p| p.ready && p.connected))
    }

    fn take_shot(
        &mut self,
        seat: Seat,
        direction: f32,
        power: f32,
        spin: Vec2,
        called_pocket: Option<u8>,
    ) -> Result<(), Rejection> {
        if !direction.is_finite() || !power.is_finite() || !spin.is_finite() {
            return Err(ShotError::NoDirection.into());
        }
        let called_pocket = match called_pocket {
            Some(n) => {
                let pocket = self
                    .world
                    .layout()
                    .pocket(PocketId(n))
                    .ok_or(Rejection::UnknownPocket(n))?;
                Some(pocket.id)
            }
            None => None,
        };

        let aim = Vec2::from_angle(direction);
        let plan = match self.settings.collision_response {
            CollisionResponse::Planned => predict(&self.world, aim, power, spin).plan(),
            CollisionResponse::Physical => None,
        };
        self.world.shoot(aim, power, spin, plan)?;
        self.state.begin_shot()?;

        self.scheduler.cancel(TaskTag::TurnClock);
        self.scheduler
            .schedule(TaskTag::ShotResolution, WaitFor::TableIdle, Wake::ResolveShot);
        self.shot = Some(ShotAggregator::new(seat, self.state.is_break_shot, called_pocket));

        let turn_id = self.state.turn.turn_id;
        info!(
            match_id = %self.match_id,
            turn_id,
            seat = ?seat,
            power,
            planned_target = ?plan.map(|p| p.target),
            "shot taken"
        );
        self.broadcast(ServerMsg::BeginShot {
            shooter: seat,
            turn_id,
        });
        Ok(())
    }

    fn place_ball_in_hand(&mut self, seat: Seat, pos: Vec2) -> Result<(), Rejection> {
        let zone = self
            .state
            .placement_zone(seat)
            .ok_or(Rejection::NoBallInHand)?;
        let layout = self.world.layout();
        let allowed = pos.is_finite()
            && layout.in_bounds(pos, BALL_RADIUS)
            && (zone == PlacementZone::Anywhere || layout.in_kitchen(pos))
            && self.world.is_clear(pos, CUE);
        if !allowed {
            return Err(Rejection::BadPlacement);
        }

        self.world.place_cue(pos);
        self.snapshots.force_next();
        debug!(match_id = %self.match_id, seat = ?seat, x = pos.x, y = pos.y, "cue ball placed");
        Ok(())
    }

    fn expire_turn(&mut self, turn_id: u64, now_ms: u64) -> Result<(), Rejection> {
        let next = self.state.expire_turn(
            turn_id,
            now_ms,
            self.settings.turn_secs,
            self.settings.rules.timeout_grants_ball_in_hand,
        )?;
        info!(match_id = %self.match_id, turn_id, next = ?next, "turn expired");
        self.broadcast(ServerMsg::RuleMessage {
            text: format!("Time ran out. {} to shoot.", next.label()),
        });
        self.start_turn();
        Ok(())
    }

    // ========================================================================
    // Tick
    // ========================================================================

    /// Advance physics, feed the shot aggregator and run due continuations
    pub fn tick(&mut self, dt: f32, now_ms: u64) {
        if self.closed {
            return;
        }
        self.tick += 1;

        if self.world.shot_in_progress() || !self.world.is_idle() {
            for event in self.world.advance(dt) {
                self.on_physics_event(event);
            }
        }

        if self.snapshots.should_send() {
            if let Some(snapshot) = self.snapshots.build(self.tick, self.world.balls()) {
                self.outbox.push(snapshot);
            }
        }

        let ctx = WaitContext {
            now_ms,
            peers_ready: self.all_ready(),
        };
        for wake in self.scheduler.poll(&ctx) {
            self.wake(wake, now_ms);
        }
    }

    fn on_physics_event(&mut self, event: PhysicsEvent) {
        debug!(match_id = %self.match_id, event = ?event, "physics event");
        if let Some(aggregator) = self.shot.as_mut() {
            aggregator.observe(&event);
        }
        match event {
            PhysicsEvent::Pocketed { ball, .. } => {
                self.broadcast(ServerMsg::BallPocketedUi { ball });
            }
            PhysicsEvent::TableIdle => self.scheduler.notify_idle(),
            _ => {}
        }
    }

    fn wake(&mut self, wake: Wake, now_ms: u64) {
        match wake {
            Wake::StartMatch => self.start_match(now_ms),
            Wake::ResolveShot => self.resolve_shot(now_ms),
            Wake::TurnExpired { turn_id } => {
                if let Err(rejection) = self.expire_turn(turn_id, now_ms) {
                    debug!(match_id = %self.match_id, turn_id, %rejection, "turn clock ignored");
                }
            }
            Wake::Close => {
                info!(match_id = %self.match_id, "table closed");
                self.closed = true;
            }
        }
    }

    fn start_match(&mut self, now_ms: u64) {
        let breaker = if self.rng.gen_bool(0.5) { Seat::One } else { Seat::Two };
        if let Err(err) = self.state.start(breaker, now_ms, self.settings.turn_secs) {
            warn!(match_id = %self.match_id, %err, "match start skipped");
            return;
        }
        info!(match_id = %self.match_id, breaker = ?breaker, "match started");
        self.broadcast_groups();
        self.start_turn();
    }

    fn start_turn(&mut self) {
        let turn = self.state.turn;
        self.scheduler.cancel(TaskTag::TurnClock);
        self.scheduler.schedule(
            TaskTag::TurnClock,
            WaitFor::Deadline(turn.ends_at_ms),
            Wake::TurnExpired {
                turn_id: turn.turn_id,
            },
        );
        self.broadcast(ServerMsg::TurnStarted {
            shooter: turn.shooter,
            turn_id: turn.turn_id,
            ball_in_hand: self.state.ball_in_hand,
            is_break_shot: self.state.is_break_shot,
            turn_ends_at: turn.ends_at_ms,
        });
        self.snapshots.force_next();
    }

    fn resolve_shot(&mut self, now_ms: u64) {
        let Some(aggregator) = self.shot.take() else {
            warn!(match_id = %self.match_id, "table came to rest with no shot recorded");
            return;
        };
        if !aggregator.is_settled() {
            warn!(match_id = %self.match_id, "resolving a shot the table never reported idle");
        }
        let record = aggregator.finish();
        let ruling = resolve(&record, &self.state, &self.settings.rules);
        let groups_before = (self.state.groups, self.state.groups_locked);

        if let Err(err) = self.state.apply_ruling(&ruling, now_ms, self.settings.turn_secs) {
            warn!(match_id = %self.match_id, %err, "ruling dropped");
            return;
        }
        info!(
            match_id = %self.match_id,
            shooter = ?ruling.shooter,
            foul = ?ruling.foul,
            outcome = ?ruling.outcome,
            pocketed = record.pocketed.len(),
            "shot ruled"
        );

        match ruling.outcome {
            Outcome::Rerack { .. } => self.rerack(),
            Outcome::MatchWon { .. } => {}
            Outcome::ShooterContinues | Outcome::TurnPasses => {
                if ruling.respot_eight {
                    self.world.respot_eight();
                    self.broadcast(ServerMsg::BallUnpocketedUi { ball: EIGHT });
                }
                if !self.world.cue().is_active() {
                    self.world.respawn_cue();
                }
            }
        }

        self.broadcast(ServerMsg::RuleMessage {
            text: ruling.narration.clone(),
        });
        if groups_before != (self.state.groups, self.state.groups_locked) {
            self.broadcast_groups();
        }

        if self.state.phase == MatchPhase::MatchEnded {
            self.finish_match(now_ms);
        } else {
            self.start_turn();
        }
    }

    fn rerack(&mut self) {
        let returned: Vec<u8> = self
            .world
            .balls()
            .iter()
            .filter(|b| b.number != CUE && !b.is_active())
            .map(|b| b.number)
            .collect();
        let order = rack_order(&mut self.rng);
        self.world.rack(&order);
        for ball in returned {
            self.broadcast(ServerMsg::BallUnpocketedUi { ball });
        }
        info!(match_id = %self.match_id, "re-racked");
    }

    /// Cancel every parked continuation and announce the result
    fn finish_match(&mut self, now_ms: u64) {
        let dropped = self.scheduler.cancel_all();
        self.shot = None;
        let (Some(winner), Some(reason)) = (self.state.winner, self.state.finish_reason) else {
            return;
        };
        info!(
            match_id = %self.match_id,
            winner = ?winner,
            reason = ?reason,
            dropped,
            "match over"
        );
        self.broadcast(ServerMsg::MatchFinished { winner, reason });
        self.scheduler.schedule(
            TaskTag::Teardown,
            WaitFor::Deadline(deadline_after(now_ms, self.settings.linger_secs)),
            Wake::Close,
        );
    }

    fn broadcast_groups(&mut self) {
        let [group_a, group_b] = self.state.groups;
        self.broadcast(ServerMsg::GroupsUpdated {
            group_a,
            group_b,
            locked: self.state.groups_locked,
        });
    }

    /// Queue a message for every peer and record it in the mirror
    fn broadcast(&mut self, msg: ServerMsg) {
        self.replica.apply(&msg);
        self.outbox.push(msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::time::tick_delta;

    struct Table {
        auth: TableAuthority,
        now: u64,
        a: Uuid,
        b: Uuid,
    }

    impl Table {
        fn seated(settings: MatchSettings) -> Self {
            let mut auth = TableAuthority::new(Uuid::new_v4(), 42, settings);
            let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
            auth.join(a, "alice".into()).unwrap();
            auth.join(b, "bob".into()).unwrap();
            Self { auth, now: 1_000, a, b }
        }

        fn started() -> Self {
            let mut table = Self::seated(MatchSettings::default());
            table.auth.handle(table.a, Command::SceneReady, table.now).unwrap();
            table.auth.handle(table.b, Command::SceneReady, table.now).unwrap();
            table.run(1);
            table
        }

        fn run(&mut self, ticks: usize) {
            for _ in 0..ticks {
                self.now += 8;
                self.auth.tick(tick_delta(), self.now);
            }
        }

        /// Tick until the pending shot has been ruled on
        fn settle(&mut self) {
            for _ in 0..(120 * 60) {
                if !self.auth.state().shot_pending {
                    return;
                }
                self.run(1);
            }
            panic!("shot never settled");
        }

        fn shooter(&self) -> Uuid {
            self.user(self.auth.state().shooter)
        }

        fn waiting(&self) -> Uuid {
            self.user(self.auth.state().shooter.opponent())
        }

        fn user(&self, seat: Seat) -> Uuid {
            self.auth.user_at(seat).unwrap()
        }

        fn break_shot(&mut self) {
            let shooter = self.shooter();
            let shot = Command::RequestShot {
                direction: 0.0,
                power: 1.0,
                spin: Vec2::ZERO,
                called_pocket: None,
            };
            self.auth.handle(shooter, shot, self.now).unwrap();
        }
    }

    #[test]
    fn match_waits_for_both_peers() {
        let mut table = Table::seated(MatchSettings::default());
        table.auth.handle(table.a, Command::SceneReady, table.now).unwrap();
        table.run(5);
        assert_eq!(table.auth.state().phase, MatchPhase::WaitingForPlayers);

        table.auth.handle(table.b, Command::SceneReady, table.now).unwrap();
        table.run(1);
        assert_eq!(table.auth.state().phase, MatchPhase::Break);
        assert!(table
            .auth
            .drain_outbox()
            .iter()
            .any(|m| matches!(m, ServerMsg::TurnStarted { turn_id: 1, is_break_shot: true, .. })));
    }

    #[test]
    fn third_player_is_turned_away() {
        let mut table = Table::seated(MatchSettings::default());
        let late = Uuid::new_v4();
        assert_eq!(table.auth.join(late, "carol".into()), Err(Rejection::TableFull));
        assert_eq!(table.auth.seated_count(), 2);
        assert!(!table.auth.is_seating());
    }

    #[test]
    fn only_the_shooter_may_shoot() {
        let mut table = Table::started();
        table.auth.drain_outbox();
        let other = table.waiting();
        let shot = Command::RequestShot {
            direction: 0.0,
            power: 0.5,
            spin: Vec2::ZERO,
            called_pocket: None,
        };
        assert_eq!(
            table.auth.handle(other, shot, table.now),
            Err(Rejection::NotYourTurn)
        );
        let outbox = table.auth.drain_outbox();
        assert!(outbox.iter().any(|m| matches!(
            m,
            ServerMsg::Rejected { user_id, code, .. } if *user_id == other && code == "not_your_turn"
        )));
        assert!(!table.auth.state().shot_pending);
    }

    #[test]
    fn second_shot_while_pending_is_refused() {
        let mut table = Table::started();
        table.break_shot();
        let shooter = table.shooter();
        let again = Command::RequestShot {
            direction: 1.0,
            power: 1.0,
            spin: Vec2::ZERO,
            called_pocket: None,
        };
        assert_eq!(
            table.auth.handle(shooter, again, table.now),
            Err(Rejection::ShotPending)
        );
    }

    #[test]
    fn break_is_ruled_and_next_turn_starts() {
        let mut table = Table::started();
        table.break_shot();
        table.settle();

        let outbox = table.auth.drain_outbox();
        assert!(outbox.iter().any(|m| matches!(m, ServerMsg::BeginShot { turn_id: 1, .. })));
        assert!(outbox.iter().any(|m| matches!(m, ServerMsg::RuleMessage { .. })));
        assert!(outbox.iter().any(|m| matches!(m, ServerMsg::TurnStarted { turn_id: 2, .. })));
        assert!(!table.auth.state().is_break_shot);
        assert!(table.auth.world().cue().is_active());
        assert_eq!(table.auth.replica().current_turn(), Some(2));
    }

    #[test]
    fn forfeit_mid_shot_suppresses_the_ruling() {
        let mut table = Table::started();
        let shooter_seat = table.auth.state().shooter;
        table.break_shot();
        table.run(10);
        let waiting = table.waiting();
        table.auth.handle(waiting, Command::Forfeit, table.now).unwrap();
        assert_eq!(table.auth.state().phase, MatchPhase::MatchEnded);
        assert_eq!(table.auth.state().winner, Some(shooter_seat));
        table.auth.drain_outbox();

        table.run(120 * 3);
        let after = table.auth.drain_outbox();
        assert!(!after
            .iter()
            .any(|m| matches!(m, ServerMsg::RuleMessage { .. } | ServerMsg::TurnStarted { .. })));

        let shooter = table.user(shooter_seat);
        assert_eq!(
            table.auth.handle(shooter, Command::Forfeit, table.now),
            Err(Rejection::MatchOver)
        );
    }

    #[test]
    fn stale_and_early_timeouts_are_dropped() {
        let mut table = Table::started();
        let waiting = table.waiting();
        let turn_id = table.auth.state().turn.turn_id;

        assert_eq!(
            table.auth.handle(waiting, Command::TurnTimeout { turn_id: turn_id + 7 }, table.now),
            Err(Rejection::StaleTurn(turn_id + 7))
        );
        assert_eq!(
            table.auth.handle(waiting, Command::TurnTimeout { turn_id }, table.now),
            Err(Rejection::TurnNotExpired(30))
        );

        let deadline = table.auth.state().turn.ends_at_ms;
        let shooter_before = table.auth.state().shooter;
        table
            .auth
            .handle(waiting, Command::TurnTimeout { turn_id }, deadline)
            .unwrap();
        assert_eq!(table.auth.state().shooter, shooter_before.opponent());
        assert_eq!(table.auth.state().turn.turn_id, turn_id + 1);

        // Duplicate of the same signal
        assert_eq!(
            table.auth.handle(waiting, Command::TurnTimeout { turn_id }, deadline),
            Err(Rejection::StaleTurn(turn_id))
        );
    }

    #[test]
    fn turn_clock_expires_on_the_authority() {
        let mut table = Table::started();
        let first = table.auth.state().shooter;
        let deadline = table.auth.state().turn.ends_at_ms;
        table.now = deadline;
        table.run(1);
        assert_eq!(table.auth.state().shooter, first.opponent());
        // An untaken break passes with the kitchen placement
        assert_eq!(
            table.auth.state().placement_zone(first.opponent()),
            Some(PlacementZone::Kitchen)
        );
    }

    #[test]
    fn break_placement_is_limited_to_the_kitchen() {
        let mut table = Table::started();
        let shooter = table.shooter();
        let outside = Command::PlaceBallInHand {
            pos: Vec2::new(0.0, 0.3),
        };
        assert_eq!(
            table.auth.handle(shooter, outside, table.now),
            Err(Rejection::BadPlacement)
        );

        let inside = Vec2::new(-0.9, 0.2);
        table
            .auth
            .handle(shooter, Command::PlaceBallInHand { pos: inside }, table.now)
            .unwrap();
        assert_eq!(table.auth.world().cue().pos, inside);

        let waiting = table.waiting();
        assert_eq!(
            table.auth.handle(waiting, Command::PlaceBallInHand { pos: inside }, table.now),
            Err(Rejection::NotYourTurn)
        );
    }

    #[test]
    fn placement_must_clear_every_ball() {
        let mut table = Table::started();
        let seat = table.auth.state().shooter;
        table.auth.state.ball_in_hand[seat.index()] = Some(PlacementZone::Anywhere);
        let shooter = table.shooter();

        let one = table.auth.world().ball(1).unwrap().pos;
        let touching = one + Vec2::new(BALL_RADIUS, 0.0);
        assert_eq!(
            table.auth.handle(shooter, Command::PlaceBallInHand { pos: touching }, table.now),
            Err(Rejection::BadPlacement)
        );

        // Past the head string is fine once the break is behind us
        let open = Vec2::new(0.0, 0.3);
        table
            .auth
            .handle(shooter, Command::PlaceBallInHand { pos: open }, table.now)
            .unwrap();
        assert_eq!(table.auth.world().cue().pos, open);
    }

    #[test]
    fn shot_taken_just_before_the_deadline_keeps_the_turn() {
        let mut table = Table::started();
        let shooter_seat = table.auth.state().shooter;
        let deadline = table.auth.state().turn.ends_at_ms;
        table.now = deadline - 10;
        table.break_shot();
        table.run(5);
        assert!(table.now > deadline);

        assert_eq!(table.auth.state().turn.turn_id, 1);
        assert_eq!(table.auth.state().shooter, shooter_seat);
        assert!(table.auth.state().shot_pending);

        let waiting = table.waiting();
        assert_eq!(
            table.auth.handle(waiting, Command::TurnTimeout { turn_id: 1 }, table.now),
            Err(Rejection::ShotPending)
        );
    }

    #[test]
    fn forfeit_before_the_start_just_frees_the_seat() {
        let mut table = Table::seated(MatchSettings::default());
        let b = table.b;
        table.auth.handle(b, Command::Forfeit, table.now).unwrap();

        assert_eq!(table.auth.state().phase, MatchPhase::WaitingForPlayers);
        assert_eq!(table.auth.state().winner, None);
        assert_eq!(table.auth.seated_count(), 1);
        assert!(table.auth.is_seating());
        assert!(!table
            .auth
            .drain_outbox()
            .iter()
            .any(|m| matches!(m, ServerMsg::MatchFinished { .. })));

        let carol = Uuid::new_v4();
        assert!(table.auth.join(carol, "carol".into()).is_ok());
        assert!(!table.auth.is_seating());
    }

    #[test]
    fn preview_with_non_finite_input_is_refused() {
        let mut table = Table::started();
        table.auth.drain_outbox();
        let shooter = table.shooter();
        let preview = Command::PreviewShot {
            direction: f32::NAN,
            power: 0.7,
            spin: Vec2::ZERO,
        };
        assert_eq!(
            table.auth.handle(shooter, preview, table.now),
            Err(Rejection::InvalidShot(ShotError::NoDirection))
        );
        let outbox = table.auth.drain_outbox();
        assert!(outbox.iter().any(|m| matches!(
            m,
            ServerMsg::Rejected { code, .. } if code == "invalid_shot"
        )));
        assert!(!outbox.iter().any(|m| matches!(m, ServerMsg::ShotPreview { .. })));
    }

    #[test]
    fn preview_is_addressed_to_the_shooter() {
        let mut table = Table::started();
        table.auth.drain_outbox();
        let shooter = table.shooter();
        let preview = Command::PreviewShot {
            direction: 0.0,
            power: 0.7,
            spin: Vec2::ZERO,
        };
        table.auth.handle(shooter, preview, table.now).unwrap();
        let outbox = table.auth.drain_outbox();
        match outbox.as_slice() {
            [ServerMsg::ShotPreview { user_id, prediction }] => {
                assert_eq!(*user_id, shooter);
                assert!(prediction.target.is_some());
            }
            other => panic!("unexpected outbox {other:?}"),
        }
        assert!(table.auth.world().is_idle());
    }

    #[test]
    fn disconnect_ends_match_and_table_closes() {
        let mut table = Table::started();
        let leaving_seat = table.auth.state().shooter;
        let leaving = table.user(leaving_seat);
        table.auth.leave(leaving, table.now);
        assert_eq!(table.auth.state().winner, Some(leaving_seat.opponent()));
        assert_eq!(
            table.auth.state().finish_reason,
            Some(FinishReason::Disconnect)
        );
        assert!(table.auth.replica().is_finished());

        assert!(!table.auth.is_closed());
        table.now += 5_000;
        table.run(1);
        assert!(table.auth.is_closed());
    }

    #[test]
    fn reconnect_gets_state_sync() {
        let mut table = Table::started();
        table.auth.drain_outbox();
        let a = table.a;
        table.auth.join(a, "alice".into()).unwrap();
        let outbox = table.auth.drain_outbox();
        assert!(outbox.iter().any(|m| matches!(
            m,
            ServerMsg::StateSync { user_id, state } if *user_id == a && state.current_turn() == Some(1)
        )));
    }
}
