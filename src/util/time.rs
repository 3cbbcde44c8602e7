//! Time utilities: the shared network clock and the fixed simulation rate

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Current time on the shared network clock (Unix milliseconds).
///
/// Every turn deadline is expressed on this clock so peers can render the
/// same countdown without asking the authority again.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Physics steps per second on the authority
pub const SIMULATION_TPS: u32 = 120;
/// Table snapshots per second while balls are moving
pub const SNAPSHOT_TPS: u32 = 30;
pub const TICK_DURATION_MICROS: u64 = 1_000_000 / SIMULATION_TPS as u64;

/// Fixed physics step in seconds
pub fn tick_delta() -> f32 {
    1.0 / SIMULATION_TPS as f32
}

/// Absolute deadline `secs` seconds after `now_ms`
pub fn deadline_after(now_ms: u64, secs: u64) -> u64 {
    now_ms.saturating_add(secs.saturating_mul(1000))
}

/// Whole seconds left until `deadline_ms`, rounded up (for narration)
pub fn secs_until(now_ms: u64, deadline_ms: u64) -> u64 {
    deadline_ms.saturating_sub(now_ms).div_ceil(1000)
}
