mod link;
mod poller;
mod session;

use async_trait::async_trait;

use crate::{error::FetchError, models::DeviceSnapshot};

pub use link::LocalLink;
pub use poller::{Poller, PollerHandle};
pub use session::{MonitorSession, STATUS_CONNECTED, STATUS_NO_RESPONSE, STATUS_RECONNECTING};

#[cfg(test)]
pub(crate) use session::testing;

/// Where a poller gets its snapshots from: one device over HTTP, or every
/// device known to the backend.
#[async_trait]
pub trait ReadingSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self) -> Result<Vec<DeviceSnapshot>, FetchError>;
}
