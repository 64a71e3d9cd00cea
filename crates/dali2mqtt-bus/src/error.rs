use thiserror::Error;

/// Top-level error type for the `dali2mqtt-bus` crate.
///
/// Covers every way a transport can fail to carry a frame: the link is
/// gone, the interface did not answer in time, or what came back could not
/// be interpreted. A *missing backward frame* is not an error here -- on DALI
/// that is a normal "no" answer and is reported as
/// [`Response::NoAnswer`](crate::Response::NoAnswer).
#[derive(Debug, Error)]
pub enum Error {
    // ── Link ────────────────────────────────────────────────────────
    /// The interface is not connected (never connected, or unplugged).
    #[error("Bus interface is not connected")]
    NotConnected,

    /// The interface link failed (USB unplugged, serial port vanished, etc.)
    #[error("Bus link failure: {0}")]
    Link(String),

    // ── Timing ──────────────────────────────────────────────────────
    /// The interface did not complete the transaction in time.
    #[error("Bus transaction timed out: {command}")]
    Timeout { command: String },

    // ── Protocol ────────────────────────────────────────────────────
    /// A sequence received an answer it cannot make sense of.
    #[error("Bus protocol error: {message}")]
    Protocol { message: String },
}
