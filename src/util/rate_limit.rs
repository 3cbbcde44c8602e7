//! Per-peer rate limiting for table commands

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

use crate::ws::protocol::ClientMsg;

/// Rate limiter type alias
pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

fn limiter(per_second: u32) -> Arc<Limiter> {
    let quota = Quota::per_second(NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::direct(quota))
}

/// Shots, placements, forfeits and other state-changing commands
pub const COMMAND_RATE_LIMIT: u32 = 10;

/// Aim previews are sent while the player drags the cue
pub const PREVIEW_RATE_LIMIT: u32 = 30;

/// Limits one connected peer. Previews get their own bucket so aiming never
/// starves the shot that follows it.
#[derive(Clone)]
pub struct PeerRateLimiter {
    commands: Arc<Limiter>,
    previews: Arc<Limiter>,
}

impl PeerRateLimiter {
    pub fn new() -> Self {
        Self {
            commands: limiter(COMMAND_RATE_LIMIT),
            previews: limiter(PREVIEW_RATE_LIMIT),
        }
    }

    /// True if the message may be forwarded to the match
    pub fn allow(&self, msg: &ClientMsg) -> bool {
        match msg {
            ClientMsg::PreviewShot { .. } | ClientMsg::Ping { .. } => self.previews.check().is_ok(),
            // Leaving must always get through
            ClientMsg::LeaveMatch => true,
            _ => self.commands.check().is_ok(),
        }
    }
}

impl Default for PeerRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
