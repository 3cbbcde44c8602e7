//! Cooperative waits for the match loop
//!
//! Match lifecycle steps that have to wait ("until the table is at rest",
//! "until the turn clock runs out", "until both peers loaded the scene") are
//! parked here as a predicate plus the value to hand back once it holds. The
//! match loop polls once per tick. Cancelled tasks are dropped on the spot, so
//! nothing they carried can be returned afterwards.

/// Condition a parked task waits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitFor {
    /// The integrator reported the table at rest
    TableIdle,
    /// Shared-clock time in milliseconds
    Deadline(u64),
    /// Every seated peer has signalled scene-ready
    AllPeersReady,
}

/// What a task is for; used to cancel by purpose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskTag {
    MatchStart,
    ShotResolution,
    TurnClock,
    Teardown,
}

/// Inputs the predicates are evaluated against
#[derive(Debug, Clone, Copy, Default)]
pub struct WaitContext {
    pub now_ms: u64,
    pub peers_ready: bool,
}

#[derive(Debug)]
struct Task<T> {
    tag: TaskTag,
    wait: WaitFor,
    wake: T,
}

#[derive(Debug)]
pub struct Scheduler<T> {
    tasks: Vec<Task<T>>,
    /// Set by `notify_idle`, consumed by the next poll
    idle: bool,
}

impl<T> Scheduler<T> {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            idle: false,
        }
    }

    pub fn schedule(&mut self, tag: TaskTag, wait: WaitFor, wake: T) {
        self.tasks.push(Task { tag, wait, wake });
    }

    /// Drop every task with `tag`; returns how many were dropped
    pub fn cancel(&mut self, tag: TaskTag) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|t| t.tag != tag);
        before - self.tasks.len()
    }

    pub fn cancel_all(&mut self) -> usize {
        let dropped = self.tasks.len();
        self.tasks.clear();
        self.idle = false;
        dropped
    }

    #[cfg(test)]
    pub fn is_scheduled(&self, tag: TaskTag) -> bool {
        self.tasks.iter().any(|t| t.tag == tag)
    }

    /// The integrator's push notification that the table came to rest
    pub fn notify_idle(&mut self) {
        self.idle = true;
    }

    /// Remove and return every task whose condition holds, in schedule order
    pub fn poll(&mut self, ctx: &WaitContext) -> Vec<T> {
        let idle = std::mem::take(&mut self.idle);
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.tasks)
            .into_iter()
            .partition(|t| match t.wait {
                WaitFor::TableIdle => idle,
                WaitFor::Deadline(at) => ctx.now_ms >= at,
                WaitFor::AllPeersReady => ctx.peers_ready,
            });
        self.tasks = waiting;
        ready.into_iter().map(|t| t.wake).collect()
    }
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(now_ms: u64) -> WaitContext {
        WaitContext {
            now_ms,
            peers_ready: false,
        }
    }

    #[test]
    fn deadlines_fire_once() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(TaskTag::TurnClock, WaitFor::Deadline(1_000), "expire");
        assert!(scheduler.poll(&at(999)).is_empty());
        assert_eq!(scheduler.poll(&at(1_000)), vec!["expire"]);
        assert!(scheduler.poll(&at(2_000)).is_empty());
    }

    #[test]
    fn cancelled_tasks_never_wake() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(TaskTag::TurnClock, WaitFor::Deadline(10), 1);
        scheduler.schedule(TaskTag::ShotResolution, WaitFor::TableIdle, 2);
        assert_eq!(scheduler.cancel(TaskTag::TurnClock), 1);
        scheduler.notify_idle();
        assert_eq!(scheduler.poll(&at(100)), vec![2]);

        scheduler.schedule(TaskTag::ShotResolution, WaitFor::TableIdle, 3);
        scheduler.notify_idle();
        assert_eq!(scheduler.cancel_all(), 1);
        assert!(scheduler.poll(&at(200)).is_empty());
    }

    #[test]
    fn idle_notification_is_consumed_by_one_poll() {
        let mut scheduler = Scheduler::new();
        scheduler.notify_idle();
        assert!(scheduler.poll(&at(0)).is_empty());
        scheduler.schedule(TaskTag::ShotResolution, WaitFor::TableIdle, ());
        assert!(scheduler.poll(&at(0)).is_empty());
        assert!(scheduler.is_scheduled(TaskTag::ShotResolution));
    }

    #[test]
    fn waits_for_all_peers() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(TaskTag::MatchStart, WaitFor::AllPeersReady, "start");
        assert!(scheduler.poll(&at(0)).is_empty());
        let ready = WaitContext {
            now_ms: 0,
            peers_ready: true,
        };
        assert_eq!(scheduler.poll(&ready), vec!["start"]);
    }
}
