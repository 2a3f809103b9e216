//! Error taxonomy for the OBS connection and the expression controller.
//!
//! Connection-level failures surface to the UI as actionable messages, so the
//! `Display` strings distinguish a bad password from an unreachable host from
//! a protocol mismatch. Controller-level per-item failures are degraded-mode
//! errors: they are logged and reported, never fatal.

use thiserror::Error;

/// Failure establishing an obs-websocket session.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// OBS rejected the Identify (bad or missing password).
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The endpoint was unreachable or the transport dropped mid-handshake.
    #[error("could not reach OBS: {0}")]
    Network(String),

    /// Version negotiation failed or the server spoke something unexpected.
    #[error("protocol mismatch: {0}")]
    Protocol(String),
}

/// Failure of a single request/response round trip.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// No identified session; the request was never sent (or its session died
    /// before a response arrived).
    #[error("not connected to OBS")]
    NotConnected,

    /// OBS processed the request and rejected it.
    #[error("OBS rejected the request (code {code}): {message}")]
    Remote { code: u16, message: String },

    /// No response within the bounded call interval.
    #[error("request timed out")]
    Timeout,
}

/// Failure inside the expression controller's state machine.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// The label is outside the vocabulary, or no scene item in the current
    /// mirror matches it (e.g. the operator removed that layer). Recoverable.
    #[error("no scene item matches expression '{0}'")]
    UnknownExpression(String),

    /// The show succeeded but one or more hides failed; the switch happened,
    /// stale items may still be visible remotely.
    #[error("{failed} hide call(s) failed while switching expressions")]
    PartialHideFailure { failed: usize },

    /// A command arrived before initialize completed and the grace period
    /// elapsed without the controller becoming ready.
    #[error("controller is not ready (initialize has not completed)")]
    NotReady,

    /// The show call itself failed; the expression was not switched.
    #[error(transparent)]
    Call(#[from] CallError),
}
