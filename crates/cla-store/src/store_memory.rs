//! In-process [`DocumentStore`].
//!
//! All collections sit behind one `RwLock`; every mutating call holds the
//! write half for its whole duration, which gives the same per-document
//! atomicity the database backend gets from row locks.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::trace;

use crate::document::*;
use crate::store::{DocumentStore, Result};

#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in a collection.
    pub async fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert_one(&self, collection: &str, fields: Fields) -> Result<DocId> {
        let id = DocId::generate();
        let mut guard = self.collections.write().await;
        guard
            .entry(collection.to_string())
            .or_default()
            .push(Document::new(id, fields));
        trace!(collection, %id, "memory insert");
        Ok(id)
    }

    async fn insert_if_absent(
        &self,
        collection: &str,
        filter: &DocFilter,
        fields: Fields,
    ) -> Result<Option<DocId>> {
        let mut guard = self.collections.write().await;
        let docs = guard.entry(collection.to_string()).or_default();
        if docs.iter().any(|d| filter.matches(d)) {
            return Ok(None);
        }
        let id = DocId::generate();
        docs.push(Document::new(id, fields));
        Ok(Some(id))
    }

    async fn replace_one(
        &self,
        collection: &str,
        filter: &DocFilter,
        fields: Fields,
        upsert: bool,
    ) -> Result<ReplaceOutcome> {
        let mut guard = self.collections.write().await;
        let docs = guard.entry(collection.to_string()).or_default();
        if let Some(doc) = docs.iter_mut().find(|d| filter.matches(d)) {
            doc.fields = fields;
            return Ok(ReplaceOutcome {
                matched: 1,
                upserted: None,
            });
        }
        if !upsert {
            return Ok(ReplaceOutcome::default());
        }
        let id = DocId::generate();
        docs.push(Document::new(id, fields));
        Ok(ReplaceOutcome {
            matched: 0,
            upserted: Some(id),
        })
    }

    async fn delete_many(&self, collection: &str, filter: &DocFilter) -> Result<u64> {
        let mut guard = self.collections.write().await;
        let Some(docs) = guard.get_mut(collection) else {
            return Ok(0);
        };
        let before = docs.len();
        docs.retain(|d| !filter.matches(d));
        Ok((before - docs.len()) as u64)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &DocFilter,
        update: &Update,
    ) -> Result<UpdateOutcome> {
        let mut guard = self.collections.write().await;
        let Some(doc) = guard
            .get_mut(collection)
            .and_then(|docs| docs.iter_mut().find(|d| filter.matches(d)))
        else {
            return Ok(UpdateOutcome::default());
        };

        let applied = update.apply(&mut doc.fields)?;
        Ok(UpdateOutcome {
            matched: 1,
            modified: u64::from(applied.modified),
            removed: applied.removed,
        })
    }

    async fn find(
        &self,
        collection: &str,
        filter: &DocFilter,
        projection: &Projection,
    ) -> Result<Vec<Document>> {
        let guard = self.collections.read().await;
        Ok(guard
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|d| filter.matches(d))
                    .map(|d| Document::new(d.id, projection.apply(&d.fields)))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn count_array_elems(
        &self,
        collection: &str,
        filter: &DocFilter,
        array: &str,
        elem: &ElemFilter,
    ) -> Result<u64> {
        let guard = self.collections.read().await;
        Ok(guard
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|d| filter.matches(d))
                    .map(|d| d.array(array).iter().filter(|e| elem.matches(e)).count() as u64)
                    .sum()
            })
            .unwrap_or(0))
    }
}
