//! Error taxonomy. These are kinds, not exhaustive variant trees:
//! each carries enough context to decide the propagation policy without the
//! caller having to downcast.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GridError {
    /// Network or venue returned null/HTTP 5xx. Recovered locally with one
    /// retry; escalates to `Transient` if it persists.
    #[error("transient submit failure for {context}: {source}")]
    TransientSubmit {
        context: String,
        #[source]
        source: anyhow::Error,
    },

    /// Adapter exception or timeout, counted against the global failure
    /// counter. N-in-a-row flips the network-fault flag.
    #[error("transient failure for {context}: {source}")]
    Transient {
        context: String,
        #[source]
        source: anyhow::Error,
    },

    /// Invalid configuration discovered at startup.
    #[error("invalid configuration: {0}")]
    Permanent(String),

    /// Order refused by the exchange (precision, balance, limit).
    #[error("exchange rejected order: {0}")]
    ExchangeReject(String),

    /// Latched state anomaly: position growth, scalping deviation,
    /// unrepairable health-check residue.
    #[error("state anomaly, emergency stop latched: {0}")]
    StateAnomaly(String),

    /// A reset was requested while one was already in flight.
    #[error("reset already in progress, request ignored")]
    ResetConflict,
}

impl GridError {
    pub fn is_latching(&self) -> bool {
        matches!(self, GridError::StateAnomaly(_))
    }
}

pub type GridResult<T> = Result<T, GridError>;
