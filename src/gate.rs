use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async lock per channel, created on first use. Holding the guard
/// means no other resolution for that channel is in flight.
#[derive(Debug, Default)]
pub struct ChannelGate {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ChannelGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, channel_id: &str) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(channel_id.to_string())
            .or_default()
            .clone()
    }

    pub async fn acquire(&self, channel_id: &str) -> OwnedMutexGuard<()> {
        self.lock_for(channel_id).lock_owned().await
    }
}
