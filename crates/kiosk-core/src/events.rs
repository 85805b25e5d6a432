//! # Session Events
//!
//! Typed broadcast channel the auth session uses to notify collaborators
//! (UI, catalog sync, reader coordinator). Explicit channels instead of a
//! notification side channel keep fan-out observable and ordering
//! testable.

use tokio::sync::broadcast;

/// Events emitted by the auth session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The device completed authentication and holds valid credentials.
    Authenticated,
    /// The session was torn down (explicit logout or unrecoverable
    /// hardware/auth disagreement).
    ForcedLogout,
    /// Collaborators should drop cached catalog/kiosk state.
    ClearCachedState,
}

/// Bounded fan-out bus for [`SessionEvent`]s.
///
/// Slow subscribers that fall more than `capacity` events behind see a
/// `Lagged` error from the receiver, never a blocked publisher.
pub struct SessionEvents {
    sender: broadcast::Sender<SessionEvent>,
}

impl SessionEvents {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new(16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_are_delivered_in_order() {
        let events = SessionEvents::default();
        let mut rx = events.subscribe();

        events.emit(SessionEvent::Authenticated);
        events.emit(SessionEvent::ForcedLogout);
        events.emit(SessionEvent::ClearCachedState);

        assert_eq!(rx.recv().await.unwrap(), SessionEvent::Authenticated);
        assert_eq!(rx.recv().await.unwrap(), SessionEvent::ForcedLogout);
        assert_eq!(rx.recv().await.unwrap(), SessionEvent::ClearCachedState);
    }

    #[test]
    fn test_emit_without_subscribers_is_fine() {
        let events = SessionEvents::default();
        events.emit(SessionEvent::Authenticated);
    }
}
