use std::time::Duration;

use tokio::time::{Instant, sleep_until};

use super::state::CancelReason;
use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    Idle,
    Total,
}

impl From<TimeoutKind> for CancelReason {
    fn from(kind: TimeoutKind) -> Self {
        match kind {
            TimeoutKind::Idle => CancelReason::IdleTimeout,
            TimeoutKind::Total => CancelReason::TotalTimeout,
        }
    }
}

/// Idle and total deadlines of one turn.
///
/// The total deadline is fixed when the turn starts. The idle deadline moves
/// forward on every event and is suspended while a tool runs.
#[derive(Debug, Clone)]
pub struct TimeoutSupervisor {
    idle: Duration,
    total: Duration,
    idle_deadline: Option<Instant>,
    total_deadline: Option<Instant>,
}

impl TimeoutSupervisor {
    pub fn new(idle: Duration, total: Duration) -> Self {
        Self {
            idle,
            total,
            idle_deadline: None,
            total_deadline: None,
        }
    }

    pub fn start(&mut self) {
        let now = Instant::now();
        self.total_deadline = Some(now + self.total);
        self.idle_deadline = Some(now + self.idle);
    }

    /// Data arrived: push the idle deadline out.
    pub fn touch(&mut self) {
        if self.idle_deadline.is_some() {
            self.idle_deadline = Some(Instant::now() + self.idle);
        }
    }

    pub fn pause_idle(&mut self) {
        self.idle_deadline = None;
    }

    pub fn resume_idle(&mut self) {
        if self.total_deadline.is_some() {
            self.idle_deadline = Some(Instant::now() + self.idle);
        }
    }

    pub fn clear(&mut self) {
        self.idle_deadline = None;
        self.total_deadline = None;
    }

    pub fn error_for(&self, kind: TimeoutKind) -> EngineError {
        match kind {
            TimeoutKind::Idle => EngineError::IdleTimeout(self.idle.as_secs()),
            TimeoutKind::Total => EngineError::TotalTimeout(self.total.as_secs()),
        }
    }

    /// Resolves when an armed deadline passes; never resolves when none is.
    pub async fn expired(&self) -> TimeoutKind {
        let total = self.total_deadline;
        let idle = self.idle_deadline;
        tokio::select! {
            biased;
            () = wait_for(total) => TimeoutKind::Total,
            () = wait_for(idle) => TimeoutKind::Idle,
        }
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{advance, timeout};

    fn supervisor() -> TimeoutSupervisor {
        TimeoutSupervisor::new(Duration::from_secs(60), Duration::from_secs(120))
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_fires_without_events() {
        let mut timers = supervisor();
        timers.start();
        let started = Instant::now();

        assert_eq!(timers.expired().await, TimeoutKind::Idle);
        assert_eq!(started.elapsed().as_secs(), 60);
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_defers_idle_but_not_total() {
        let mut timers = supervisor();
        timers.start();
        let started = Instant::now();

        for _ in 0..2 {
            advance(Duration::from_secs(50)).await;
            timers.touch();
        }

        assert_eq!(timers.expired().await, TimeoutKind::Total);
        assert_eq!(started.elapsed().as_secs(), 120);
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_idle_leaves_total() {
        let mut timers = supervisor();
        timers.start();
        timers.pause_idle();

        assert_eq!(timers.expired().await, TimeoutKind::Total);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleared_never_fires() {
        let mut timers = supervisor();
        timers.start();
        timers.clear();

        assert!(timeout(Duration::from_secs(600), timers.expired()).await.is_err());

        // Resuming without a running turn does not re-arm anything.
        timers.resume_idle();
        assert!(timeout(Duration::from_secs(600), timers.expired()).await.is_err());
    }

    #[test]
    fn test_timeout_errors() {
        let timers = supervisor();
        assert_eq!(timers.error_for(TimeoutKind::Idle), EngineError::IdleTimeout(60));
        assert_eq!(timers.error_for(TimeoutKind::Total), EngineError::TotalTimeout(120));
        assert_eq!(CancelReason::from(TimeoutKind::Idle), CancelReason::IdleTimeout);
    }
}
