//! Deadline registry ordering and cancellation.

use std::sync::Arc;
use std::time::Duration;

use session_broker::models::protocol::ConnectionId;
use session_broker::session::store::RecordId;
use session_broker::session::timers::{Clock, ManualClock, TimerKind, TimerRegistry};

fn registry() -> (TimerRegistry, ManualClock) {
    let clock = ManualClock::new();
    (TimerRegistry::new(Arc::new(clock.clone())), clock)
}

#[test]
fn nothing_is_due_before_deadline() {
    let (mut timers, clock) = registry();
    let id = timers.schedule(Duration::from_secs(5), TimerKind::DieTimeout);

    assert!(timers.pop_due().is_none());
    assert_eq!(
        timers.next_deadline(),
        Some(clock.now() + Duration::from_secs(5))
    );

    clock.advance(Duration::from_secs(5));
    assert_eq!(timers.pop_due(), Some((id, TimerKind::DieTimeout)));
    assert!(timers.is_empty());
}

#[test]
fn expired_deadlines_pop_earliest_first() {
    let (mut timers, clock) = registry();
    let late = timers.schedule(
        Duration::from_secs(30),
        TimerKind::StartupTimeout(RecordId(1)),
    );
    let early = timers.schedule(
        Duration::from_secs(10),
        TimerKind::SaveTimeout(ConnectionId(4)),
    );

    clock.advance(Duration::from_secs(60));
    assert_eq!(timers.pop_due().map(|(id, _)| id), Some(early));
    assert_eq!(timers.pop_due().map(|(id, _)| id), Some(late));
    assert!(timers.pop_due().is_none());
}

#[test]
fn cancelled_deadline_never_fires() {
    let (mut timers, clock) = registry();
    let id = timers.schedule(Duration::from_secs(1), TimerKind::RestartReset(RecordId(2)));

    assert!(timers.is_armed(id));
    assert!(timers.cancel(id));
    assert!(!timers.is_armed(id));
    assert!(!timers.cancel(id));

    clock.advance(Duration::from_secs(10));
    assert!(timers.pop_due().is_none());
    assert_eq!(timers.next_deadline(), None);
}

#[test]
fn armed_lists_kinds_in_deadline_order() {
    let (mut timers, _clock) = registry();
    timers.schedule(Duration::from_secs(3), TimerKind::DieTimeout);
    timers.schedule(
        Duration::from_secs(1),
        TimerKind::SaveTimeout(ConnectionId(1)),
    );

    let kinds: Vec<_> = timers.armed().collect();
    assert_eq!(
        kinds,
        vec![TimerKind::SaveTimeout(ConnectionId(1)), TimerKind::DieTimeout]
    );
    assert_eq!(timers.len(), 2);
}

#[test]
fn oversized_delay_is_clamped() {
    let (mut timers, clock) = registry();
    timers.schedule(Duration::MAX, TimerKind::DieTimeout);

    let deadline = timers.next_deadline().expect("armed");
    assert!(deadline > clock.now() + Duration::from_secs(86_400));
    assert!(timers.pop_due().is_none());
}

#[test]
fn manual_clock_clones_share_time() {
    let clock = ManualClock::new();
    let other = clock.clone();
    let before = other.now();
    clock.advance(Duration::from_millis(1500));
    assert_eq!(other.now() - before, Duration::from_millis(1500));
}
