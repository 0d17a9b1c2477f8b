//! Arena of property records and the queues that own them.
//!
//! Every record lives in exactly one [`Location`]. Queue membership is kept
//! in step with the stored location by [`RecordStore::move_to`], so callers
//! never touch the queues directly.

use std::collections::{HashMap, VecDeque};
use std::fmt::{Display, Formatter};

use crate::models::properties::PropertyRecord;
use crate::models::protocol::ConnectionId;
use crate::session::timers::TimerId;

/// Arena key for a stored [`PropertyRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(pub u64);

impl Display for RecordId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "rec-{}", self.0)
    }
}

/// Identity of one process launch, used to match exits to launches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LaunchId(pub u64);

impl Display for LaunchId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "launch-{}", self.0)
    }
}

/// Where a record currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// Loaded and waiting to be launched.
    Pending,
    /// Launched and waiting for the process to register.
    Starting,
    /// Deferred to the next session.
    Restart,
    /// Owned by a registered client.
    Client(ConnectionId),
}

/// A record plus the timers armed on its behalf.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    /// Restart contract.
    pub record: PropertyRecord,
    /// Registration deadline while `Starting`.
    pub startup_timer: Option<TimerId>,
    /// Restart-attempt reset while owned by a client.
    pub reset_timer: Option<TimerId>,
    /// Most recent launch; exits of older launches are stale.
    pub launch: Option<LaunchId>,
    location: Location,
}

impl StoredRecord {
    /// Current owner.
    #[must_use]
    pub fn location(&self) -> Location {
        self.location
    }
}

/// Record arena with `pending`, `starting` and `restart` queues.
#[derive(Debug, Default)]
pub struct RecordStore {
    next_id: u64,
    next_launch: u64,
    entries: HashMap<RecordId, StoredRecord>,
    pending: VecDeque<RecordId>,
    starting: VecDeque<RecordId>,
    restart: VecDeque<RecordId>,
}

impl RecordStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `record` at `location`, appending to the matching queue.
    pub fn insert(&mut self, record: PropertyRecord, location: Location) -> RecordId {
        self.next_id += 1;
        let id = RecordId(self.next_id);
        self.entries.insert(
            id,
            StoredRecord {
                record,
                startup_timer: None,
                reset_timer: None,
                launch: None,
                location,
            },
        );
        if let Some(queue) = self.queue_mut(location) {
            queue.push_back(id);
        }
        id
    }

    /// Allocate the identity of a new launch.
    pub fn next_launch(&mut self) -> LaunchId {
        self.next_launch += 1;
        LaunchId(self.next_launch)
    }

    /// Record by id.
    #[must_use]
    pub fn get(&self, id: RecordId) -> Option<&PropertyRecord> {
        self.entries.get(&id).map(|entry| &entry.record)
    }

    /// Mutable record by id.
    pub fn get_mut(&mut self, id: RecordId) -> Option<&mut PropertyRecord> {
        self.entries.get_mut(&id).map(|entry| &mut entry.record)
    }

    /// Stored entry including its timers.
    #[must_use]
    pub fn entry(&self, id: RecordId) -> Option<&StoredRecord> {
        self.entries.get(&id)
    }

    /// Mutable stored entry.
    pub fn entry_mut(&mut self, id: RecordId) -> Option<&mut StoredRecord> {
        self.entries.get_mut(&id)
    }

    /// Current location of `id`.
    #[must_use]
    pub fn location(&self, id: RecordId) -> Option<Location> {
        self.entries.get(&id).map(StoredRecord::location)
    }

    /// Move `id` to `location`, leaving its old queue.
    ///
    /// Returns `false` if the record does not exist.
    pub fn move_to(&mut self, id: RecordId, location: Location) -> bool {
        let Some(old) = self.entries.get(&id).map(StoredRecord::location) else {
            return false;
        };
        if let Some(queue) = self.queue_mut(old) {
            queue.retain(|queued| *queued != id);
        }
        if let Some(queue) = self.queue_mut(location) {
            queue.push_back(id);
        }
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.location = location;
        }
        true
    }

    /// Drop `id` from the arena and its queue, returning what was stored.
    pub fn remove(&mut self, id: RecordId) -> Option<StoredRecord> {
        let entry = self.entries.remove(&id)?;
        if let Some(queue) = self.queue_mut(entry.location) {
            queue.retain(|queued| *queued != id);
        }
        Some(entry)
    }

    /// Records waiting to be launched, in launch order.
    #[must_use]
    pub fn pending(&self) -> &VecDeque<RecordId> {
        &self.pending
    }

    /// Launched records waiting for registration.
    #[must_use]
    pub fn starting(&self) -> &VecDeque<RecordId> {
        &self.starting
    }

    /// Records deferred to the next session.
    #[must_use]
    pub fn restart(&self) -> &VecDeque<RecordId> {
        &self.restart
    }

    /// Find a queued record by client id.
    #[must_use]
    pub fn find_queued(&self, location: Location, client_id: &str) -> Option<RecordId> {
        let queue = match location {
            Location::Pending => &self.pending,
            Location::Starting => &self.starting,
            Location::Restart => &self.restart,
            Location::Client(_) => return None,
        };
        queue
            .iter()
            .copied()
            .find(|id| self.get(*id).is_some_and(|r| r.client_id == client_id))
    }

    /// Whether any stored record carries `client_id`.
    #[must_use]
    pub fn contains_client_id(&self, client_id: &str) -> bool {
        self.entries
            .values()
            .any(|entry| entry.record.client_id == client_id)
    }

    /// Stable-sort `pending` by priority; ties keep load order.
    pub fn sort_pending_by_priority(&mut self) {
        let entries = &self.entries;
        self.pending
            .make_contiguous()
            .sort_by_key(|id| entries.get(id).map_or(u8::MAX, |e| e.record.priority));
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn queue_mut(&mut self, location: Location) -> Option<&mut VecDeque<RecordId>> {
        match location {
            Location::Pending => Some(&mut self.pending),
            Location::Starting => Some(&mut self.starting),
            Location::Restart => Some(&mut self.restart),
            Location::Client(_) => None,
        }
    }
}
