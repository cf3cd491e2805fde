//! In-process payload cache.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use glance_core::{PayloadCache, Result};

/// Payload bytes held in memory, keyed by job ID.
///
/// Entries live until the pipeline purges them after a terminal outcome.
/// Nothing here survives a restart.
#[derive(Default)]
pub struct MemoryPayloadCache {
    entries: RwLock<HashMap<Uuid, Arc<[u8]>>>,
}

impl MemoryPayloadCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes currently held.
    pub async fn total_bytes(&self) -> usize {
        self.entries.read().await.values().map(|p| p.len()).sum()
    }
}

#[async_trait]
impl PayloadCache for MemoryPayloadCache {
    async fn put(&self, job_id: Uuid, payload: Arc<[u8]>) -> Result<()> {
        self.entries.write().await.insert(job_id, payload);
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Arc<[u8]>>> {
        Ok(self.entries.read().await.get(&job_id).cloned())
    }

    async fn remove(&self, job_id: Uuid) -> Result<bool> {
        Ok(self.entries.write().await.remove(&job_id).is_some())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.entries.read().await.len())
    }
}
