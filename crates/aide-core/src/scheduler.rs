//! Quiescence tracking for automatic turns.

use std::time::Duration;
use tokio::time::Instant;

use crate::prompts::{HISTORY_RESET_SEED, IDLE_CHECK_IN_SEED};

/// Why the engine is starting a turn on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoTrigger {
    /// No foreground activity for the quiescence interval
    Idle,
    /// The history was just cleared
    HistoryReset,
}

impl AutoTrigger {
    pub fn seed(&self) -> &'static str {
        match self {
            AutoTrigger::Idle => IDLE_CHECK_IN_SEED,
            AutoTrigger::HistoryReset => HISTORY_RESET_SEED,
        }
    }
}

/// Decides when an idle automatic turn is due.
///
/// Fires at most once per quiet period: after firing, it waits for new
/// foreground activity before it can be due again.
#[derive(Debug, Clone)]
pub struct AutoTurnScheduler {
    quiescence: Duration,
    last_activity: Instant,
    fired_since_activity: bool,
    enabled: bool,
}

impl AutoTurnScheduler {
    pub fn new(quiescence: Duration) -> Self {
        Self {
            quiescence,
            last_activity: Instant::now(),
            fired_since_activity: false,
            enabled: true,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(Duration::MAX)
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn quiescence(&self) -> Duration {
        self.quiescence
    }

    /// Foreground activity (the user typed something).
    pub fn note_activity(&mut self) {
        self.last_activity = Instant::now();
        self.fired_since_activity = false;
    }

    pub fn due(&self, now: Instant) -> bool {
        self.enabled
            && !self.fired_since_activity
            && now.saturating_duration_since(self.last_activity) >= self.quiescence
    }

    pub fn mark_fired(&mut self) {
        self.fired_since_activity = true;
    }

    /// Time left until the next idle turn, or `None` if none is pending.
    pub fn time_until_due(&self, now: Instant) -> Option<Duration> {
        if !self.enabled || self.fired_since_activity {
            return None;
        }
        let idle = now.saturating_duration_since(self.last_activity);
        Some(self.quiescence.saturating_sub(idle))
    }
}
