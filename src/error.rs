use thiserror::Error;

/// Rampart error type.
///
/// Policy outcomes (rate-limited, burst-denied, blocked) are not errors;
/// they are structured denial responses built by the middleware. Errors
/// here cover configuration problems, which are fatal at startup before
/// any traffic is served.
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("Configuration error: {0}")]
    Config(String),
}
