use std::{collections::HashMap, sync::Arc};

use tokio::sync::RwLock;

use crate::models::{DeviceIdentity, DeviceReading};

#[derive(Debug, Clone, PartialEq)]
pub struct CachedDevice {
    pub identity: DeviceIdentity,
    pub reading: DeviceReading,
}

/// In-memory store of the most recent `DeviceReading` per device id.
///
/// Wrapped in `Arc` so it can be cheaply cloned and shared across tasks.
/// Uses `tokio::sync::RwLock` so concurrent readers never block each other and
/// always see a complete entry.
#[derive(Clone, Default)]
pub struct ReadingCache {
    inner: Arc<RwLock<HashMap<String, CachedDevice>>>,
}

impl ReadingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cached reading for `identity.id`.
    ///
    /// The identity recorded on first sight is kept; later snapshots never
    /// rename a device.
    pub async fn update(&self, identity: DeviceIdentity, reading: DeviceReading) {
        let mut guard = self.inner.write().await;
        match guard.get_mut(&identity.id) {
            Some(entry) => entry.reading = reading,
            None => {
                guard.insert(identity.id.clone(), CachedDevice { identity, reading });
            }
        }
    }

    /// Snapshot of every device, ordered by id.
    pub async fn all(&self) -> Vec<CachedDevice> {
        let mut devices: Vec<_> = self.inner.read().await.values().cloned().collect();
        devices.sort_by(|a, b| a.identity.id.cmp(&b.identity.id));
        devices
    }

    pub async fn get(&self, device_id: &str) -> Option<CachedDevice> {
        self.inner.read().await.get(device_id).cloned()
    }

    pub async fn device_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.inner.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}
