//! Whole-document operations: create, replace, read, insert, delete.

use tracing::debug;

use crate::collection::Collection;
use crate::document::*;
use crate::error::DbError;
use crate::store::Result;

impl Collection {
    /// Insert `fields` only when nothing matches `filter`.
    pub async fn new_doc_if_not_exist(&self, filter: &DocFilter, fields: Fields) -> Result<DocId> {
        match self.store.insert_if_absent(self.name, filter, fields).await? {
            Some(id) => {
                debug!(collection = self.name, %id, "created document");
                Ok(id)
            }
            None => Err(DbError::RecordExists(format!(
                "a document already exists in {}",
                self.name
            ))),
        }
    }

    /// Replace the document matched by `filter`, creating it when absent.
    /// Returns the new id when one was created.
    pub async fn new_doc(&self, filter: &DocFilter, fields: Fields) -> Result<Option<DocId>> {
        let outcome = self.store.replace_one(self.name, filter, fields, true).await?;
        debug!(
            collection = self.name,
            matched = outcome.matched,
            upserted = outcome.upserted.is_some(),
            "replace or create document"
        );
        Ok(outcome.upserted)
    }

    /// Set top-level fields of the matched document.
    pub async fn update_doc(&self, filter: &DocFilter, fields: Fields) -> Result<()> {
        let outcome = self
            .store
            .update_one(self.name, filter, &Update::Set(fields))
            .await?;
        debug!(
            collection = self.name,
            matched = outcome.matched,
            modified = outcome.modified,
            "update document"
        );
        if outcome.matched == 0 {
            return Err(DbError::no_record(format!(
                "no document in {} to update",
                self.name
            )));
        }
        Ok(())
    }

    pub async fn get_doc(&self, filter: &DocFilter, projection: &Projection) -> Result<Document> {
        self.get_docs(filter, projection)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DbError::no_record(format!("no document in {}", self.name)))
    }

    pub async fn get_docs(
        &self,
        filter: &DocFilter,
        projection: &Projection,
    ) -> Result<Vec<Document>> {
        self.store.find(self.name, filter, projection).await
    }

    pub async fn insert_doc(&self, fields: Fields) -> Result<DocId> {
        let id = self.store.insert_one(self.name, fields).await?;
        debug!(collection = self.name, %id, "inserted document");
        Ok(id)
    }

    /// Delete every matching document; returns how many went away.
    pub async fn delete_docs(&self, filter: &DocFilter) -> Result<u64> {
        let deleted = self.store.delete_many(self.name, filter).await?;
        debug!(collection = self.name, deleted, "delete documents");
        Ok(deleted)
    }
}
