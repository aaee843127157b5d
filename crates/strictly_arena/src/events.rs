//! Lifecycle events published to whoever drives the arena.

use crate::session::{MoveOutcome, Outcome};
use crate::{PlayerId, SessionId};
use serde::{Deserialize, Serialize};
use strictly_tictactoe::{Board, Position};
use tokio::sync::broadcast;
use tracing::{debug, instrument, trace};

/// Something that happened in the queue or a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ArenaEvent {
    /// A player entered the queue.
    Enrolled {
        /// Who.
        player: PlayerId,
        /// 1-based queue position right after enrolling.
        position: usize,
    },
    /// A player left the queue on request.
    Withdrawn {
        /// Who.
        player: PlayerId,
    },
    /// Stale entries were purged.
    Expired {
        /// Entries removed.
        count: usize,
    },
    /// Two players were paired into a new session.
    MatchFound {
        /// New session.
        session_id: SessionId,
        /// X then O.
        players: [PlayerId; 2],
        /// Match quality in `[0, 1]`.
        quality: f64,
    },
    /// A move was accepted.
    MoveApplied {
        /// Session.
        session_id: SessionId,
        /// Who moved.
        mover: PlayerId,
        /// Where.
        position: Position,
        /// Board after the move.
        board: Board,
        /// Next turn or terminal result.
        outcome: MoveOutcome,
    },
    /// A session reached a terminal state.
    SessionEnded {
        /// Session.
        session_id: SessionId,
        /// How it ended.
        outcome: Outcome,
        /// Winner, absent on a draw.
        winner: Option<PlayerId>,
    },
}

/// Receives arena events.
pub trait EventSink: Send + Sync + std::fmt::Debug {
    /// Delivers one event. Must not block.
    fn publish(&self, event: ArenaEvent);
}

/// Drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, event: ArenaEvent) {
        trace!(?event, "Discarding event");
    }
}

/// Fans events out over a tokio broadcast channel.
///
/// Slow subscribers lag and lose the oldest events rather than blocking
/// publishers.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<ArenaEvent>,
}

impl BroadcastSink {
    /// Creates a sink buffering up to `capacity` events per subscriber.
    #[instrument]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// New receiver seeing events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ArenaEvent> {
        self.sender.subscribe()
    }

    /// Current number of receivers.
    pub fn subscribers(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl EventSink for BroadcastSink {
    fn publish(&self, event: ArenaEvent) {
        if self.sender.send(event).is_err() {
            debug!("No subscribers for arena event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_shape() {
        let event = ArenaEvent::Expired { count: 3 };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "expired");
        assert_eq!(json["count"], 3);
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let sink = BroadcastSink::new(4);
        assert_eq!(sink.subscribers(), 0);
        sink.publish(ArenaEvent::Expired { count: 1 });
    }

    #[test]
    fn test_subscriber_receives_events() {
        let sink = BroadcastSink::new(4);
        let mut rx = sink.subscribe();
        let player = PlayerId::parse("p1").unwrap();
        sink.publish(ArenaEvent::Withdrawn {
            player: player.clone(),
        });
        assert_eq!(rx.try_recv().unwrap(), ArenaEvent::Withdrawn { player });
    }
}
