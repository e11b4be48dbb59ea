use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sigforge_core::Posting;
use tokio::sync::Mutex;

use crate::{merge_into, PostingFilter, PostingStore, StoreError, StoreStats, StoredPosting, UpsertResult};

type Slot = Arc<Mutex<Option<StoredPosting>>>;

/// In-process store. Each id owns its own lock; the map lock is only held long enough to
/// find or create a slot.
#[derive(Debug, Default)]
pub struct MemoryPostingStore {
    slots: Mutex<HashMap<String, Slot>>,
}

impl MemoryPostingStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, id: &str) -> Slot {
        let mut map = self.slots.lock().await;
        map.entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    async fn existing_slot(&self, id: &str) -> Option<Slot> {
        self.slots.lock().await.get(id).cloned()
    }

    async fn snapshot(&self) -> Vec<StoredPosting> {
        let slots: Vec<Slot> = self.slots.lock().await.values().cloned().collect();
        let mut out = Vec::with_capacity(slots.len());
        for slot in slots {
            if let Some(stored) = slot.lock().await.as_ref() {
                out.push(stored.clone());
            }
        }
        out
    }

    pub async fn len(&self) -> usize {
        self.snapshot().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl PostingStore for MemoryPostingStore {
    async fn upsert(&self, posting: &Posting) -> Result<UpsertResult, StoreError> {
        let slot = self.slot(&posting.id).await;
        let mut guard = slot.lock().await;
        let now = Utc::now();
        if let Some(existing) = guard.as_mut() {
            return Ok(merge_into(existing, posting, now));
        }
        *guard = Some(StoredPosting {
            posting: posting.clone(),
            first_seen_at: now,
            last_seen_at: now,
        });
        Ok(UpsertResult {
            is_new: true,
            previously_alerted: false,
        })
    }

    async fn mark_alerted(&self, id: &str) -> Result<(), StoreError> {
        let slot = self
            .existing_slot(id)
            .await
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let mut guard = slot.lock().await;
        match guard.as_mut() {
            Some(stored) => {
                stored.posting.alerted = true;
                Ok(())
            }
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    async fn get(&self, id: &str) -> Result<Option<StoredPosting>, StoreError> {
        match self.existing_slot(id).await {
            Some(slot) => Ok(slot.lock().await.clone()),
            None => Ok(None),
        }
    }

    async fn list(&self, filter: &PostingFilter) -> Result<Vec<StoredPosting>, StoreError> {
        let mut rows: Vec<StoredPosting> = self
            .snapshot()
            .await
            .into_iter()
            .filter(|s| filter.matches(&s.posting))
            .collect();
        rows.sort_by(|a, b| {
            b.posting
                .score
                .cmp(&a.posting.score)
                .then(b.posting.posted_at.cmp(&a.posting.posted_at))
                .then(a.posting.id.cmp(&b.posting.id))
        });
        Ok(rows
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit)
            .collect())
    }

    async fn stats(&self, alert_threshold: u8) -> Result<StoreStats, StoreError> {
        let rows = self.snapshot().await;
        Ok(StoreStats {
            total: rows.len(),
            high_score: rows
                .iter()
                .filter(|s| s.posting.score >= alert_threshold)
                .count(),
            alerted: rows.iter().filter(|s| s.posting.alerted).count(),
        })
    }
}
