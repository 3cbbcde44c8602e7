//! Table simulation and match authority

pub mod authority;
pub mod ball;
pub mod r#match;
pub mod physics;
pub mod predictor;
pub mod replica;
pub mod rules;
pub mod scheduler;
pub mod shot;
pub mod snapshot;
pub mod state;
pub mod table;

pub use authority::MatchSettings;
pub use r#match::{MatchHandle, MatchRegistry};

use crate::ws::protocol::ClientMsg;
use uuid::Uuid;

/// Player input received from WebSocket
#[derive(Debug, Clone)]
pub struct PlayerInput {
    pub user_id: Uuid,
    pub display_name: String,
    pub msg: ClientMsg,
    pub received_at: u64,
}
