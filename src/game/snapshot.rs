//! Table snapshots for rendering

use crate::util::time::{SIMULATION_TPS, SNAPSHOT_TPS};
use crate::ws::protocol::{BallSnapshot, ServerMsg};

use super::ball::Ball;

/// Builds ball-position snapshots for network transmission
pub struct SnapshotBuilder {
    /// Tick counter since last snapshot
    ticks_since_snapshot: u32,
    /// Snapshot interval in ticks
    snapshot_interval: u32,
    /// Last balls sent, so a resting table is not re-sent every interval
    last_sent: Option<Vec<BallSnapshot>>,
}

impl SnapshotBuilder {
    pub fn new(snapshot_interval: u32) -> Self {
        Self {
            ticks_since_snapshot: 0,
            snapshot_interval: snapshot_interval.max(1),
            last_sent: None,
        }
    }

    /// Interval derived from the simulation and snapshot rates
    pub fn at_default_rate() -> Self {
        Self::new(SIMULATION_TPS / SNAPSHOT_TPS)
    }

    /// Check if it's time to send a snapshot
    pub fn should_send(&mut self) -> bool {
        self.ticks_since_snapshot += 1;
        if self.ticks_since_snapshot >= self.snapshot_interval {
            self.ticks_since_snapshot = 0;
            true
        } else {
            false
        }
    }

    /// Force a full snapshot on the next check (rack, respot, placement)
    pub fn force_next(&mut self) {
        self.ticks_since_snapshot = self.snapshot_interval;
        self.last_sent = None;
    }

    /// Snapshot message, or `None` if nothing moved since the last one
    pub fn build(&mut self, tick: u64, balls: &[Ball]) -> Option<ServerMsg> {
        let snapshots = snapshot_balls(balls);
        if self.last_sent.as_ref() == Some(&snapshots) {
            return None;
        }
        self.last_sent = Some(snapshots.clone());
        Some(ServerMsg::TableSnapshot {
            tick,
            balls: snapshots,
        })
    }
}

pub fn snapshot_balls(balls: &[Ball]) -> Vec<BallSnapshot> {
    balls
        .iter()
        .map(|b| BallSnapshot {
            number: b.number,
            x: b.pos.x,
            y: b.pos.y,
            height: b.height,
            moving: b.moving || b.drop.is_some(),
            visible: b.visible,
            pocketed: b.pocketed,
        })
        .collect()
}
