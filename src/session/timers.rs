//! Deadline registry driven by an injected clock.
//!
//! The registry never sleeps. The reactor asks for [`TimerRegistry::next_deadline`],
//! sleeps until then, and drains expired entries with [`TimerRegistry::pop_due`].
//! Tests swap in [`ManualClock`] and advance time explicitly.

use std::collections::{BTreeMap, HashMap};
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::models::protocol::ConnectionId;
use crate::session::store::RecordId;

/// Upper bound on a single delay, keeping deadlines representable.
const MAX_DELAY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Source of monotonic time.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> Instant;
}

/// Wall clock backed by [`Instant::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    base: Instant,
    offset_ms: Arc<AtomicU64>,
}

impl ManualClock {
    /// Clock frozen at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Move time forward by `by`.
    pub fn advance(&self, by: Duration) {
        let ms = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.offset_ms.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
    }
}

/// Handle to a scheduled deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl Display for TimerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

/// What an expired deadline means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// A client did not finish its save in time.
    SaveTimeout(ConnectionId),
    /// Shutdown phase 2 ran out of patience.
    DieTimeout,
    /// A restarted client stayed up long enough to forgive its attempts.
    RestartReset(RecordId),
    /// A launched application never registered.
    StartupTimeout(RecordId),
}

/// Ordered set of pending deadlines.
pub struct TimerRegistry {
    clock: Arc<dyn Clock>,
    next_id: u64,
    queue: BTreeMap<(Instant, TimerId), TimerKind>,
    deadlines: HashMap<TimerId, Instant>,
}

impl TimerRegistry {
    /// Empty registry reading time from `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            next_id: 0,
            queue: BTreeMap::new(),
            deadlines: HashMap::new(),
        }
    }

    /// Current instant according to the injected clock.
    #[must_use]
    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Arm a deadline `after` from now. Delays beyond a year are clamped.
    pub fn schedule(&mut self, after: Duration, kind: TimerKind) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        let now = self.clock.now();
        let deadline = now
            .checked_add(after.min(MAX_DELAY))
            .unwrap_or(now);
        self.queue.insert((deadline, id), kind);
        self.deadlines.insert(id, deadline);
        id
    }

    /// Disarm `id`. Returns whether it was still pending.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        match self.deadlines.remove(&id) {
            Some(deadline) => self.queue.remove(&(deadline, id)).is_some(),
            None => false,
        }
    }

    /// Whether `id` is still pending.
    #[must_use]
    pub fn is_armed(&self, id: TimerId) -> bool {
        self.deadlines.contains_key(&id)
    }

    /// Earliest pending deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Remove and return the earliest expired deadline, if any.
    pub fn pop_due(&mut self) -> Option<(TimerId, TimerKind)> {
        let now = self.clock.now();
        let (&(deadline, id), _) = self.queue.iter().next()?;
        if deadline > now {
            return None;
        }
        let kind = self.queue.remove(&(deadline, id))?;
        self.deadlines.remove(&id);
        Some((id, kind))
    }

    /// Number of armed deadlines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    /// Whether nothing is armed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    /// Kinds of every armed deadline, earliest first.
    pub fn armed(&self) -> impl Iterator<Item = TimerKind> + '_ {
        self.queue.values().copied()
    }
}
