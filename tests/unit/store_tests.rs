//! Record arena queue bookkeeping.

use session_broker::models::properties::PropertyRecord;
use session_broker::models::protocol::ConnectionId;
use session_broker::session::store::{Location, RecordStore};

fn record(id: &str, priority: u8) -> PropertyRecord {
    let mut record = PropertyRecord::new(id, "host");
    record.priority = priority;
    record
}

#[test]
fn insert_places_record_in_matching_queue() {
    let mut store = RecordStore::new();
    let pending = store.insert(record("a", 50), Location::Pending);
    let restart = store.insert(record("b", 50), Location::Restart);
    let owned = store.insert(record("c", 50), Location::Client(ConnectionId(1)));

    assert_eq!(store.len(), 3);
    assert_eq!(store.pending().iter().copied().collect::<Vec<_>>(), vec![pending]);
    assert_eq!(store.restart().iter().copied().collect::<Vec<_>>(), vec![restart]);
    assert!(store.starting().is_empty());
    assert_eq!(store.location(owned), Some(Location::Client(ConnectionId(1))));
}

#[test]
fn move_keeps_exactly_one_location() {
    let mut store = RecordStore::new();
    let id = store.insert(record("a", 50), Location::Pending);

    assert!(store.move_to(id, Location::Starting));
    assert!(store.pending().is_empty());
    assert_eq!(store.starting().len(), 1);

    assert!(store.move_to(id, Location::Client(ConnectionId(3))));
    assert!(store.starting().is_empty());
    assert_eq!(store.location(id), Some(Location::Client(ConnectionId(3))));

    assert!(store.move_to(id, Location::Restart));
    assert_eq!(store.restart().len(), 1);
}

#[test]
fn moving_missing_record_fails() {
    let mut store = RecordStore::new();
    let id = store.insert(record("a", 50), Location::Pending);
    store.remove(id);
    assert!(!store.move_to(id, Location::Starting));
    assert!(store.starting().is_empty());
}

#[test]
fn remove_leaves_queue() {
    let mut store = RecordStore::new();
    let id = store.insert(record("a", 50), Location::Starting);
    let entry = store.remove(id).expect("stored");
    assert_eq!(entry.record.client_id, "a");
    assert!(store.starting().is_empty());
    assert!(store.is_empty());
    assert!(store.remove(id).is_none());
}

#[test]
fn find_queued_only_searches_named_queue() {
    let mut store = RecordStore::new();
    let pending = store.insert(record("a", 50), Location::Pending);
    store.insert(record("b", 50), Location::Client(ConnectionId(1)));

    assert_eq!(store.find_queued(Location::Pending, "a"), Some(pending));
    assert_eq!(store.find_queued(Location::Starting, "a"), None);
    assert_eq!(store.find_queued(Location::Client(ConnectionId(1)), "b"), None);
    assert!(store.contains_client_id("b"));
    assert!(!store.contains_client_id("z"));
}

#[test]
fn pending_sort_is_stable_by_priority() {
    let mut store = RecordStore::new();
    let late = store.insert(record("late", 90), Location::Pending);
    let first = store.insert(record("first", 10), Location::Pending);
    let mid_a = store.insert(record("mid-a", 50), Location::Pending);
    let mid_b = store.insert(record("mid-b", 50), Location::Pending);

    store.sort_pending_by_priority();
    assert_eq!(
        store.pending().iter().copied().collect::<Vec<_>>(),
        vec![first, mid_a, mid_b, late]
    );
}
