pub mod admin;
pub mod burst;
pub mod config;
pub mod error;
pub mod events;
pub mod identity;
pub mod janitor;
pub mod middleware;
pub mod pattern;
pub mod rate_limit;
pub mod reputation;
pub mod state;

pub use admin::admin_router;
pub use burst::{BurstDecision, BurstDetector};
pub use config::{CliArgs, Config, GuardConfig};
pub use error::GuardError;
pub use events::{run_event_logger, EventReceiver, EventSender, GuardEvent};
pub use identity::{client_key, fingerprint, resolve_address, FingerprintTracker, UNKNOWN_ADDR};
pub use janitor::Janitor;
pub use middleware::guard;
pub use pattern::{PatternAnalyzer, PatternKind, PatternReport};
pub use rate_limit::{FixedWindowLimiter, RateDecision};
pub use reputation::{BlockReason, BlockStatus, BlockedClient, BlocklistManager, ViolationKind};
pub use state::{GuardState, GuardStats, SharedState, StatsSnapshot};
