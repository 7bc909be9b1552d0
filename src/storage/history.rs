use tracing::{error, info, warn};

use crate::session::block::CodingBlock;

use super::preferences::KeyValueStore;

pub const HISTORY_KEY: &str = "completedBlocks";

/// Completed blocks, most recent first, mirrored into a [KeyValueStore] as one JSON blob.
///
/// Persistence is best effort. Unreadable or missing data loads as an empty history and failed
/// writes are only logged, the in-memory copy stays authoritative for the running session.
pub struct History<S> {
    store: S,
    blocks: Vec<CodingBlock>,
}

impl<S: KeyValueStore> History<S> {
    pub async fn load(store: S) -> Self {
        let blocks = match store.get(HISTORY_KEY).await {
            Ok(Some(blob)) => serde_json::from_str::<Vec<CodingBlock>>(&blob).unwrap_or_else(|e| {
                warn!("Stored history can't be decoded, starting empty: {e}");
                vec![]
            }),
            Ok(None) => vec![],
            Err(e) => {
                warn!("Failed to read stored history, starting empty: {e:?}");
                vec![]
            }
        };
        info!("Loaded {} completed blocks", blocks.len());
        Self { store, blocks }
    }

    pub fn blocks(&self) -> &[CodingBlock] {
        &self.blocks
    }

    pub async fn prepend(&mut self, block: CodingBlock) {
        self.blocks.insert(0, block);
        self.save().await;
    }

    pub async fn clear(&mut self) {
        self.blocks.clear();
        if let Err(e) = self.store.remove(HISTORY_KEY).await {
            error!("Failed to clear stored history {e:?}");
        }
    }

    async fn save(&self) {
        let blob = match serde_json::to_string(&self.blocks) {
            Ok(v) => v,
            Err(e) => {
                error!("Failed to encode history {e:?}");
                return;
            }
        };
        if let Err(e) = self.store.set(HISTORY_KEY, blob).await {
            error!("Failed to save history {e:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{History, HISTORY_KEY};
    use crate::{
        session::block::CodingBlock,
        storage::preferences::memory::MemoryStore,
    };

    #[tokio::test]
    async fn missing_or_garbage_history_loads_empty() {
        let history = History::load(MemoryStore::default()).await;
        assert!(history.blocks().is_empty());

        let history = History::load(MemoryStore::with_entry(HISTORY_KEY, "][")).await;
        assert!(history.blocks().is_empty());
    }

    #[tokio::test]
    async fn prepend_keeps_most_recent_first_and_persists() {
        let store = Arc::new(MemoryStore::default());
        let mut history = History::load(store.clone()).await;

        history.prepend(CodingBlock::new("first", 60, 60)).await;
        history.prepend(CodingBlock::new("second", 60, 60)).await;

        let reloaded = History::load(store.clone()).await;
        let intentions = reloaded
            .blocks()
            .iter()
            .map(|v| v.intended_description())
            .collect::<Vec<_>>();
        assert_eq!(intentions, vec!["second", "first"]);
    }

    #[tokio::test]
    async fn failed_writes_keep_memory_copy() {
        let mut history = History::load(MemoryStore::failing()).await;

        history.prepend(CodingBlock::new("first", 60, 60)).await;

        assert_eq!(history.blocks().len(), 1);
    }

    #[tokio::test]
    async fn clear_removes_stored_key() {
        let store = Arc::new(MemoryStore::default());
        let mut history = History::load(store.clone()).await;
        history.prepend(CodingBlock::new("first", 60, 60)).await;

        history.clear().await;

        assert!(history.blocks().is_empty());
        assert_eq!(store.raw(HISTORY_KEY), None);
    }
}
