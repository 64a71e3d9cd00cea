// ── Transport boundary ──
//
// Everything above this trait talks to the bus through it. Implementations
// wrap a concrete interface (USB, serial, a simulator) and only ever carry
// one transaction at a time; serialising callers is the caller's job.

use async_trait::async_trait;
use tokio::sync::watch;

use crate::command::Command;
use crate::error::Error;
use crate::response::Response;
use crate::sequence::{self, Sequence, SequenceValue};

#[async_trait]
pub trait BusTransport: Send + Sync {
    /// Short interface name for logs and status output.
    fn name(&self) -> &str;

    /// Open the link to the interface.
    async fn connect(&self) -> Result<(), Error>;

    /// Close the link. Idempotent.
    async fn disconnect(&self) -> Result<(), Error>;

    /// Send one forward frame and collect the answer, if any.
    async fn send(&self, command: Command) -> Result<Response, Error>;

    /// Run a multi-frame sequence as one unit.
    async fn run_sequence(&self, sequence: &Sequence) -> Result<SequenceValue, Error> {
        sequence::execute(self, sequence).await
    }

    /// Link liveness, for interfaces that can report it. `true` while the
    /// interface is attached and usable.
    fn liveness(&self) -> Option<watch::Receiver<bool>> {
        None
    }
}
