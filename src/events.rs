//! Typed guard events
//!
//! Violation/block/spike notifications are pushed onto an mpsc channel and
//! drained by a background task into tracing records. Listeners are
//! explicit; there is no implicit event bus.

use crate::pattern::PatternKind;
use crate::reputation::{BlockReason, ViolationKind};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Notification emitted by the protection engine. Used for logging and
/// stats only; dropping the receiver silently discards events.
#[derive(Debug, Clone)]
pub enum GuardEvent {
    SpikeDetected {
        key: String,
        rate: f64,
    },
    SuspiciousPattern {
        addr: String,
        patterns: Vec<PatternKind>,
    },
    Violation {
        key: String,
        kind: ViolationKind,
        score: i32,
    },
    ClientBlocked {
        key: String,
        reason: BlockReason,
        permanent: bool,
    },
    ClientUnblocked {
        key: String,
    },
}

pub type EventSender = mpsc::UnboundedSender<GuardEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<GuardEvent>;

pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Drain guard events into structured logs until the channel closes.
pub async fn run_event_logger(mut rx: EventReceiver) {
    while let Some(event) = rx.recv().await {
        match event {
            GuardEvent::SpikeDetected { key, rate } => {
                warn!(client = %key, rate, "Traffic spike detected");
            }
            GuardEvent::SuspiciousPattern { addr, patterns } => {
                let tags: Vec<&str> = patterns.iter().map(PatternKind::as_str).collect();
                warn!(addr = %addr, patterns = ?tags, "Suspicious traffic pattern");
            }
            GuardEvent::Violation { key, kind, score } => {
                warn!(client = %key, violation = kind.as_str(), score, "Violation recorded");
            }
            GuardEvent::ClientBlocked {
                key,
                reason,
                permanent,
            } => {
                warn!(client = %key, reason = reason.as_str(), permanent, "Client blocked");
            }
            GuardEvent::ClientUnblocked { key } => {
                info!(client = %key, "Client unblocked");
            }
        }
    }
}
