pub mod console;
mod service;

use async_trait::async_trait;

use crate::{error::CommandError, models::Command};

pub use console::ConsoleCommand;
pub use service::{CommandDispatcher, DispatchReport};

/// One outbound channel for commands (device-direct HTTP or backend REST).
///
/// Commands are idempotent, so a sink may be called again for the same
/// command without harm.
#[async_trait]
pub trait CommandSink: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, command: &Command) -> Result<(), CommandError>;
}
