//! Match task and registry
//!
//! Each table runs on its own tokio task: inputs arrive on an mpsc channel,
//! the authority ticks at the simulation rate and everything it emits is
//! fanned out on a broadcast channel. Connections filter addressed messages
//! on their side.

use dashmap::DashMap;
use glam::Vec2;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};
use uuid::Uuid;

use crate::util::time::{tick_delta, unix_millis, TICK_DURATION_MICROS};
use crate::ws::protocol::{ClientMsg, ServerMsg};

use super::authority::{Command, MatchSettings, TableAuthority};
use super::PlayerInput;

/// Seats at one table
pub const SEATS: usize = 2;

/// Handle for communicating with a running match
#[derive(Clone)]
pub struct MatchHandle {
    pub id: Uuid,
    pub input_tx: mpsc::Sender<PlayerInput>,
    pub events_tx: broadcast::Sender<ServerMsg>,
    /// Connected peers, as last seen by the match task
    pub player_count: Arc<AtomicUsize>,
    /// Seats handed out by the registry
    reserved: Arc<AtomicUsize>,
    seating: Arc<AtomicBool>,
}

impl MatchHandle {
    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }

    pub fn is_seating(&self) -> bool {
        self.seating.load(Ordering::Relaxed)
    }

    /// Claim a seat for an incoming peer
    fn try_reserve_seat(&self) -> bool {
        self.is_seating()
            && self
                .reserved
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                    (n < SEATS).then_some(n + 1)
                })
                .is_ok()
    }

    fn release_seat(&self) {
        let _ = self
            .reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}

/// Registry of all active matches
pub struct MatchRegistry {
    matches: DashMap<Uuid, MatchHandle>,
}

impl MatchRegistry {
    pub fn new() -> Self {
        Self {
            matches: DashMap::new(),
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<MatchHandle> {
        self.matches.get(id).map(|m| m.value().clone())
    }

    pub fn insert(&self, handle: MatchHandle) {
        self.matches.insert(handle.id, handle);
    }

    pub fn remove(&self, id: &Uuid) -> Option<MatchHandle> {
        self.matches.remove(id).map(|(_, h)| h)
    }

    pub fn active_matches(&self) -> usize {
        self.matches.len()
    }

    pub fn total_players(&self) -> usize {
        self.matches
            .iter()
            .map(|m| m.value().player_count())
            .sum()
    }

    /// Find a table with a free seat and reserve it
    fn find_available_match(&self) -> Option<MatchHandle> {
        self.matches
            .iter()
            .find(|entry| entry.value().try_reserve_seat())
            .map(|entry| entry.value().clone())
    }

    /// The requested table if it exists, else any table still seating, else
    /// a freshly spawned one
    pub fn find_or_spawn(
        self: &Arc<Self>,
        requested: Option<Uuid>,
        settings: &MatchSettings,
    ) -> MatchHandle {
        if let Some(handle) = requested.and_then(|id| self.get(&id)) {
            // Reconnects still reach a full table; the match task settles
            // the count once the join is answered
            handle.try_reserve_seat();
            return handle;
        }
        if let Some(handle) = self.find_available_match() {
            return handle;
        }

        let match_id = Uuid::new_v4();
        let seed = rand::random::<u64>();
        let (game_match, handle) = GameMatch::new(match_id, seed, settings.clone());
        handle.try_reserve_seat();
        self.insert(handle.clone());
        info!(match_id = %match_id, seed, "Created new match");

        let registry = Arc::clone(self);
        tokio::spawn(async move {
            game_match.run().await;
            registry.remove(&match_id);
            info!(match_id = %match_id, "Match removed from registry");
        });

        handle
    }
}

impl Default for MatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The authoritative match task
pub struct GameMatch {
    authority: TableAuthority,
    input_rx: mpsc::Receiver<PlayerInput>,
    events_tx: broadcast::Sender<ServerMsg>,
    handle: MatchHandle,
}

impl GameMatch {
    pub fn new(id: Uuid, seed: u64, settings: MatchSettings) -> (Self, MatchHandle) {
        let (input_tx, input_rx) = mpsc::channel(256);
        let (events_tx, _) = broadcast::channel(256);

        let handle = MatchHandle {
            id,
            input_tx,
            events_tx: events_tx.clone(),
            player_count: Arc::new(AtomicUsize::new(0)),
            reserved: Arc::new(AtomicUsize::new(0)),
            seating: Arc::new(AtomicBool::new(true)),
        };

        let game_match = Self {
            authority: TableAuthority::new(id, seed, settings),
            input_rx,
            events_tx,
            handle: handle.clone(),
        };

        (game_match, handle)
    }

    /// Run the authoritative tick loop until the table is torn down
    pub async fn run(mut self) {
        info!(match_id = %self.authority.id(), "Match task started");

        let mut tick_interval = interval(Duration::from_micros(TICK_DURATION_MICROS));
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tick_interval.tick().await;

            self.process_inputs();
            self.authority.tick(tick_delta(), unix_millis());
            self.flush();

            if self.authority.is_closed() {
                break;
            }
        }

        self.handle.seating.store(false, Ordering::Relaxed);
        self.handle.player_count.store(0, Ordering::Relaxed);
        info!(
            match_id = %self.authority.id(),
            turns = self.authority.state().turn.turn_id,
            finished = self.authority.replica().is_finished(),
            "Match task finished"
        );
    }

    /// Drain the input queue into the authority
    fn process_inputs(&mut self) {
        while let Ok(input) = self.input_rx.try_recv() {
            let now = unix_millis();
            debug!(
                match_id = %self.authority.id(),
                user_id = %input.user_id,
                latency_ms = now.saturating_sub(input.received_at),
                "input"
            );
            let seated = self.authority.seated_count();
            match input.msg {
                ClientMsg::JoinMatch { .. } => {
                    let _ = self.authority.join(input.user_id, input.display_name);
                    // Refused or reconnected: the registry's seat was not used
                    if self.authority.seated_count() <= seated {
                        self.handle.release_seat();
                    }
                }
                ClientMsg::LeaveMatch => {
                    self.authority.leave(input.user_id, now);
                }
                ClientMsg::Ping { t } => {
                    let _ = self.events_tx.send(ServerMsg::Pong {
                        user_id: input.user_id,
                        t,
                        server_time: now,
                    });
                }
                msg => {
                    if let Some(command) = command_from(msg) {
                        let _ = self.authority.handle(input.user_id, command, now);
                    }
                }
            }
            if self.authority.seated_count() < seated {
                self.handle.release_seat();
            }
        }

        // Never hand out a seat someone is sitting in
        self.handle
            .reserved
            .fetch_max(self.authority.seated_count(), Ordering::AcqRel);

        self.handle
            .player_count
            .store(self.authority.connected_count(), Ordering::Relaxed);
        self.handle
            .seating
            .store(self.authority.is_seating(), Ordering::Relaxed);
    }

    fn flush(&mut self) {
        for msg in self.authority.drain_outbox() {
            // No receivers just means nobody is connected right now
            if self.events_tx.send(msg).is_err() {
                debug!(match_id = %self.authority.id(), "No subscribers for match event");
            }
        }
    }
}

/// Table commands carried by a client message
fn command_from(msg: ClientMsg) -> Option<Command> {
    let command = match msg {
        ClientMsg::SceneReady => Command::SceneReady,
        ClientMsg::RequestShot {
            direction,
            power,
            side_spin,
            follow,
            called_pocket,
        } => Command::RequestShot {
            direction,
            power,
            spin: Vec2::new(side_spin, follow),
            called_pocket,
        },
        ClientMsg::PlaceBallInHand { x, y } => Command::PlaceBallInHand {
            pos: Vec2::new(x, y),
        },
        ClientMsg::PreviewShot {
            direction,
            power,
            side_spin,
            follow,
        } => Command::PreviewShot {
            direction,
            power,
            spin: Vec2::new(side_spin, follow),
        },
        ClientMsg::TurnTimeout { turn_id } => Command::TurnTimeout { turn_id },
        ClientMsg::Forfeit => Command::Forfeit,
        ClientMsg::JoinMatch { .. } | ClientMsg::LeaveMatch | ClientMsg::Ping { .. } => {
            return None
        }
    };
    Some(command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::Seat;

    fn input(user_id: Uuid, msg: ClientMsg) -> PlayerInput {
        PlayerInput {
            user_id,
            display_name: "peer".into(),
            msg,
            received_at: 0,
        }
    }

    async fn next_matching(
        rx: &mut broadcast::Receiver<ServerMsg>,
        pred: impl Fn(&ServerMsg) -> bool,
    ) -> ServerMsg {
        let wait = async {
            loop {
                match rx.recv().await {
                    Ok(msg) if pred(&msg) => return msg,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => panic!("match channel closed"),
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(10), wait)
            .await
            .expect("timed out waiting for message")
    }

    #[test]
    fn client_messages_map_to_commands() {
        let shot = ClientMsg::RequestShot {
            direction: 0.5,
            power: 0.8,
            side_spin: -0.2,
            follow: 0.4,
            called_pocket: Some(3),
        };
        assert_eq!(
            command_from(shot),
            Some(Command::RequestShot {
                direction: 0.5,
                power: 0.8,
                spin: Vec2::new(-0.2, 0.4),
                called_pocket: Some(3),
            })
        );
        assert_eq!(command_from(ClientMsg::LeaveMatch), None);
        assert_eq!(command_from(ClientMsg::Ping { t: 1 }), None);
    }

    #[tokio::test(start_paused = true)]
    async fn two_peers_start_a_match() {
        let registry = Arc::new(MatchRegistry::new());
        let settings = MatchSettings::default();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let first = registry.find_or_spawn(None, &settings);
        let second = registry.find_or_spawn(None, &settings);
        assert_eq!(first.id, second.id);
        assert_eq!(registry.active_matches(), 1);

        let mut rx = first.events_tx.subscribe();
        for user in [a, b] {
            first
                .input_tx
                .send(input(user, ClientMsg::JoinMatch { match_id: None }))
                .await
                .unwrap();
            first
                .input_tx
                .send(input(user, ClientMsg::SceneReady))
                .await
                .unwrap();
        }

        let started = next_matching(&mut rx, |m| matches!(m, ServerMsg::TurnStarted { .. })).await;
        match started {
            ServerMsg::TurnStarted {
                turn_id,
                is_break_shot,
                shooter,
                ..
            } => {
                assert_eq!(turn_id, 1);
                assert!(is_break_shot);
                assert!(Seat::ALL.contains(&shooter));
            }
            other => panic!("unexpected {other:?}"),
        }

        // Table is full and playing: the next peer gets a fresh table
        let third = registry.find_or_spawn(None, &settings);
        assert_ne!(third.id, first.id);
        assert_eq!(first.player_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn named_table_counts_against_free_seats() {
        let registry = Arc::new(MatchRegistry::new());
        let settings = MatchSettings::default();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let first = registry.find_or_spawn(None, &settings);
        let mut rx = first.events_tx.subscribe();
        let named = registry.find_or_spawn(Some(first.id), &settings);
        assert_eq!(named.id, first.id);

        for user in [a, b] {
            first
                .input_tx
                .send(input(user, ClientMsg::JoinMatch { match_id: Some(first.id) }))
                .await
                .unwrap();
        }
        next_matching(&mut rx, |m| {
            matches!(m, ServerMsg::MatchJoined { user_id, .. } if *user_id == b)
        })
        .await;

        // Both seats taken but nobody ready yet: still not a free table
        assert!(!first.is_seating());
        let third = registry.find_or_spawn(None, &settings);
        assert_ne!(third.id, first.id);
        assert_eq!(first.reserved.load(Ordering::Acquire), SEATS);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_join_hands_the_seat_back() {
        let registry = Arc::new(MatchRegistry::new());
        let settings = MatchSettings::default();
        let a = Uuid::new_v4();

        let first = registry.find_or_spawn(None, &settings);
        let mut rx = first.events_tx.subscribe();
        first
            .input_tx
            .send(input(a, ClientMsg::JoinMatch { match_id: None }))
            .await
            .unwrap();

        // Same peer again from a second connection: no new seat is taken
        let again = registry.find_or_spawn(None, &settings);
        assert_eq!(again.id, first.id);
        assert_eq!(first.reserved.load(Ordering::Acquire), SEATS);
        first
            .input_tx
            .send(input(a, ClientMsg::JoinMatch { match_id: None }))
            .await
            .unwrap();
        for _ in 0..2 {
            next_matching(&mut rx, |m| {
                matches!(m, ServerMsg::MatchJoined { user_id, .. } if *user_id == a)
            })
            .await;
        }
        assert_eq!(first.reserved.load(Ordering::Acquire), 1);

        let b = registry.find_or_spawn(None, &settings);
        assert_eq!(b.id, first.id);
    }

    #[tokio::test(start_paused = true)]
    async fn full_table_refuses_a_named_join() {
        let registry = Arc::new(MatchRegistry::new());
        let settings = MatchSettings::default();
        let (a, b, late) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let first = registry.find_or_spawn(None, &settings);
        registry.find_or_spawn(None, &settings);
        let mut rx = first.events_tx.subscribe();
        for user in [a, b] {
            first
                .input_tx
                .send(input(user, ClientMsg::JoinMatch { match_id: None }))
                .await
                .unwrap();
        }

        let named = registry.find_or_spawn(Some(first.id), &settings);
        assert_eq!(named.id, first.id);
        named
            .input_tx
            .send(input(late, ClientMsg::JoinMatch { match_id: Some(first.id) }))
            .await
            .unwrap();
        let refused = next_matching(&mut rx, |m| matches!(m, ServerMsg::Rejected { .. })).await;
        assert!(matches!(
            refused,
            ServerMsg::Rejected { user_id, ref code, .. } if user_id == late && code == "table_full"
        ));
        assert_eq!(first.reserved.load(Ordering::Acquire), SEATS);
        assert_eq!(first.player_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn ping_is_answered_to_the_sender() {
        let (game_match, handle) = GameMatch::new(Uuid::new_v4(), 7, MatchSettings::default());
        let mut rx = handle.events_tx.subscribe();
        tokio::spawn(game_match.run());

        let user = Uuid::new_v4();
        handle
            .input_tx
            .send(input(user, ClientMsg::Ping { t: 99 }))
            .await
            .unwrap();
        let pong = next_matching(&mut rx, |m| matches!(m, ServerMsg::Pong { .. })).await;
        assert!(pong.is_for(user));
        assert!(matches!(pong, ServerMsg::Pong { t: 99, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn match_task_ends_when_everyone_leaves() {
        let registry = Arc::new(MatchRegistry::new());
        let handle = registry.find_or_spawn(None, &MatchSettings::default());
        let user = Uuid::new_v4();
        handle
            .input_tx
            .send(input(user, ClientMsg::JoinMatch { match_id: None }))
            .await
            .unwrap();
        handle
            .input_tx
            .send(input(user, ClientMsg::LeaveMatch))
            .await
            .unwrap();

        for _ in 0..100 {
            if registry.active_matches() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("match was never removed");
    }
}
