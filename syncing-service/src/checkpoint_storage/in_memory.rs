use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Checkpoint, CheckpointError, CheckpointStorage};

#[derive(Default)]
pub struct InMemoryCheckpointStorage {
    inner: RwLock<InMemoryCheckpointStorageInner>,
}

#[derive(Default)]
struct InMemoryCheckpointStorageInner {
    checkpoints: BTreeMap<Checkpoint, i64>,
    read_only: bool,
}

impl InMemoryCheckpointStorage {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn set_read_only(&self, read_only: bool) {
        self.inner.write().await.read_only = read_only;
    }
}

#[async_trait]
impl CheckpointStorage for InMemoryCheckpointStorage {
    async fn get(&self, checkpoint: Checkpoint) -> Result<Option<i64>, CheckpointError> {
        Ok(self.inner.read().await.checkpoints.get(&checkpoint).copied())
    }

    async fn set(&self, checkpoint: Checkpoint, value: i64) -> Result<(), CheckpointError> {
        let mut inner = self.inner.write().await;
        if inner.read_only {
            return Err(CheckpointError::ReadOnly);
        }

        inner.checkpoints.insert(checkpoint, value);

        Ok(())
    }
}
