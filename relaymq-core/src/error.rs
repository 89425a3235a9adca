//! Error types for the inbound delivery engine.

use thiserror::Error;

/// Classification of a failure reported by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerErrorKind {
    /// The broker rejected the caller's credentials.
    Authentication,
    /// The operation conflicts with the current broker-side state.
    Conflict,
    /// The transaction or resource is unknown to the broker.
    NotFound,
    /// The broker does not implement the requested operation.
    NotImplemented,
    /// Any other failure, including communication errors.
    Unknown,
}

impl std::fmt::Display for BrokerErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BrokerErrorKind::Authentication => "authentication",
            BrokerErrorKind::Conflict => "conflict",
            BrokerErrorKind::NotFound => "not-found",
            BrokerErrorKind::NotImplemented => "not-implemented",
            BrokerErrorKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// A classified failure returned by a broker transaction operation.
#[derive(Debug, Clone, Error)]
#[error("broker {kind} error: {message}")]
pub struct BrokerError {
    kind: BrokerErrorKind,
    message: String,
}

impl BrokerError {
    /// Creates a new broker error with the given classification.
    pub fn new(kind: BrokerErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Returns the error classification.
    pub fn kind(&self) -> BrokerErrorKind {
        self.kind
    }

    /// Returns the broker-supplied message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns true if the broker no longer knows the transaction.
    ///
    /// A one-phase commit failure with this classification must not trigger
    /// a compensating rollback: there is nothing left to roll back.
    pub fn is_not_found(&self) -> bool {
        self.kind == BrokerErrorKind::NotFound
    }
}

/// The main error type for inbound delivery operations.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Resource-manager failure (XAER_RMERR/RMFAIL class) during a
    /// transaction operation. Always surfaced to the transaction manager.
    #[error("resource manager error: {0}")]
    ResourceManager(String),

    /// A one-phase commit failed and the compensating rollback succeeded.
    /// The transaction was rolled back, not merely left uncommitted.
    #[error("transaction rolled back: {0}")]
    RolledBack(String),

    /// The requested work was already rolled back.
    #[error("transaction already rolled back: {0}")]
    AlreadyRolledBack(String),

    /// State-machine or XA protocol violation.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Worker acquisition attempted while the pool is shutting down.
    #[error("worker pool closed: {0}")]
    PoolClosed(String),

    /// No endpoint could be leased from the endpoint factory.
    #[error("endpoint unavailable: {0}")]
    EndpointUnavailable(String),

    /// The consumer's capability set does not support the operation.
    #[error("domain mismatch: {0}")]
    DomainMismatch(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Classified broker error passed through unchanged.
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// A specialized `Result` type for inbound delivery operations.
pub type Result<T> = std::result::Result<T, RelayError>;
