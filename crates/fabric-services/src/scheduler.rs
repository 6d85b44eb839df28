//! Rate-limited multicast rounds.
//!
//! Requests for a round are coalesced: while one is pending, further
//! requests only upgrade its kind (an advertisement round becomes a
//! solicitation round, never the reverse). Rounds are at least
//! `min_interval` apart.

use std::time::Duration;

use tokio::time::Instant;

use fabric_core::wire::BeaconType;

#[derive(Debug, Clone, Copy)]
struct Pending {
    kind: BeaconType,
    deadline: Instant,
}

#[derive(Debug)]
pub struct BroadcastScheduler {
    min_interval: Duration,
    pending: Option<Pending>,
    last_round: Option<Instant>,
}

impl BroadcastScheduler {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            pending: None,
            last_round: None,
        }
    }

    /// Ask for a round of `kind`.
    ///
    /// Returns the delay until the round fires when a new round was
    /// scheduled, or None when the request merged into a pending one.
    pub fn request(&mut self, kind: BeaconType, now: Instant) -> Option<Duration> {
        if let Some(pending) = self.pending.as_mut() {
            if kind == BeaconType::Solicitation {
                pending.kind = BeaconType::Solicitation;
            }
            return None;
        }

        let delay = match self.last_round {
            Some(last) => self
                .min_interval
                .saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        };
        self.pending = Some(Pending {
            kind,
            deadline: now + delay,
        });
        Some(delay)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.map(|p| p.deadline)
    }

    pub fn pending_kind(&self) -> Option<BeaconType> {
        self.pending.map(|p| p.kind)
    }

    /// Fire the pending round if its deadline has passed.
    pub fn take_due(&mut self, now: Instant) -> Option<BeaconType> {
        let pending = self.pending?;
        if pending.deadline > now {
            return None;
        }
        self.pending = None;
        self.last_round = Some(now);
        Some(pending.kind)
    }

    /// Drop the pending round, if any.
    pub fn cancel(&mut self) -> Option<BeaconType> {
        self.pending.take().map(|p| p.kind)
    }

    pub fn last_round(&self) -> Option<Instant> {
        self.last_round
    }
}
