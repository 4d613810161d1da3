use std::time::{Duration, Instant};

/// One entry of the scheduler's domain rotation
///
/// Lives only in memory. `free_at` is the earliest instant at which a fetch
/// for `domain` may be dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainSlot {
    pub domain: String,

    pub free_at: Instant,
}

impl DomainSlot {
    /// A slot that may be served immediately
    pub fn ready(domain: impl Into<String>, now: Instant) -> Self {
        Self {
            domain: domain.into(),
            free_at: now,
        }
    }

    /// A slot that starts in cooldown
    pub fn cooling(domain: impl Into<String>, now: Instant, cooldown: Duration) -> Self {
        Self {
            domain: domain.into(),
            free_at: now + cooldown,
        }
    }

    pub fn is_free(&self, now: Instant) -> bool {
        self.free_at <= now
    }

    /// Time left until the slot frees up, or None if it is already free
    pub fn time_until_free(&self, now: Instant) -> Option<Duration> {
        if self.is_free(now) {
            None
        } else {
            Some(self.free_at - now)
        }
    }
}
