//! Event types for the beatreel push channel
//!
//! Provides the progress event definitions and the EventBus that fans them
//! out to every connected observer.

mod progress_types;

pub use progress_types::{ProgressEvent, ProgressStatus};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// beatreel event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
/// The `type` tag keeps the wire shape `{"type": "progress", ...}` that
/// push-channel clients switch on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ReelEvent {
    /// Pipeline, detection, or download progress for one project
    #[serde(rename = "progress")]
    Progress(ProgressEvent),
}

impl ReelEvent {
    /// SSE event name for this event
    pub fn event_type(&self) -> &'static str {
        match self {
            ReelEvent::Progress(_) => "progress",
        }
    }

    /// Project the event belongs to
    pub fn project_id(&self) -> &str {
        match self {
            ReelEvent::Progress(p) => &p.project_id,
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Automatic cleanup when subscribers drop
/// - Lagged message detection for slow subscribers
///
/// No history is kept: a subscriber only receives events emitted after it
/// subscribed.
///
/// # Examples
///
/// ```
/// use beatreel_common::events::{EventBus, ProgressEvent, ReelEvent};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.publish(ProgressEvent::processing("1700000000000-abcd1234", "Building slideshow", Some(75)));
///
/// match rx.try_recv() {
///     Ok(ReelEvent::Progress(p)) => assert_eq!(p.progress, Some(75)),
///     other => panic!("unexpected: {:?}", other),
/// }
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ReelEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// * `capacity` - Number of events buffered per subscriber before the
    ///   oldest are dropped for that subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity: capacity.max(1) }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<ReelEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists,
    /// `Err` if nobody is listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: ReelEvent) -> Result<usize, broadcast::error::SendError<ReelEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: ReelEvent) {
        let _ = self.tx.send(event);
    }

    /// Broadcast a progress event (best-effort)
    pub fn publish(&self, event: ProgressEvent) {
        self.emit_lossy(ReelEvent::Progress(event));
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::{RecvError, TryRecvError};

    fn progress(n: i32) -> ProgressEvent {
        ProgressEvent::processing("p1", format!("line {n}"), Some(n))
    }

    #[test]
    fn test_publish_without_subscribers_does_not_fail() {
        let bus = EventBus::new(10);
        bus.publish(progress(1));
        assert!(bus.emit(ReelEvent::Progress(progress(2))).is_err());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_late_subscriber_misses_earlier_events() {
        let bus = EventBus::new(10);
        let mut early = bus.subscribe();
        bus.publish(progress(1));

        let mut late = bus.subscribe();
        bus.publish(progress(2));

        let ReelEvent::Progress(first) = early.try_recv().unwrap();
        assert_eq!(first.progress, Some(1));
        let ReelEvent::Progress(only) = late.try_recv().unwrap();
        assert_eq!(only.progress, Some(2));
        assert!(matches!(late.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_every_subscriber_receives_each_event() {
        let bus = EventBus::new(10);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        assert_eq!(bus.emit(ReelEvent::Progress(progress(5))).unwrap(), 2);
        assert!(a.try_recv().is_ok());
        assert!(b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_lagging_subscriber_does_not_affect_others() {
        let bus = EventBus::new(2);
        let mut slow = bus.subscribe();
        let mut fast = bus.subscribe();

        for n in 0..5 {
            bus.publish(progress(n));
            let ReelEvent::Progress(p) = fast.recv().await.unwrap();
            assert_eq!(p.progress, Some(n));
        }

        assert!(matches!(slow.recv().await, Err(RecvError::Lagged(_))));
        // After the lag report the slow subscriber resumes with the newest events
        let ReelEvent::Progress(p) = slow.recv().await.unwrap();
        assert_eq!(p.progress, Some(3));
    }

    #[test]
    fn test_wire_shape_is_tagged_progress() {
        let event = ReelEvent::Progress(ProgressEvent::failed("p9", "Process failed with code 2"));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["projectId"], "p9");
        assert_eq!(json["progress"], -1);
        assert_eq!(json["status"], "failed");
        assert!(json["timestamp"].is_string());
        assert_eq!(event.event_type(), "progress");
        assert_eq!(event.project_id(), "p9");
    }
}
