use async_trait::async_trait;

use crate::document::*;
use crate::error::DbError;

pub type Result<T> = std::result::Result<T, DbError>;

/// Backend contract for document persistence.
///
/// Every method is one atomic step against the backend: `update_one` matches
/// at most one document and applies its [`Update`] without a read-modify-write
/// round trip through the caller. The array and document engines
/// ([`crate::collection::Collection`]) interpret the returned counters.
/// Implementations: `MemoryStore` (in-process) and `PgDocumentStore`
/// (cla-store-postgres).
#[async_trait]
pub trait DocumentStore: Send + Sync {
    // ── Whole documents ──

    /// Insert a new independent document and return its id.
    async fn insert_one(&self, collection: &str, fields: Fields) -> Result<DocId>;

    /// Insert only if no document matches `filter`. `None` when one did.
    async fn insert_if_absent(
        &self,
        collection: &str,
        filter: &DocFilter,
        fields: Fields,
    ) -> Result<Option<DocId>>;

    /// Replace the first matching document, inserting when none matches and
    /// `upsert` is set.
    async fn replace_one(
        &self,
        collection: &str,
        filter: &DocFilter,
        fields: Fields,
        upsert: bool,
    ) -> Result<ReplaceOutcome>;

    async fn delete_many(&self, collection: &str, filter: &DocFilter) -> Result<u64>;

    // ── Single-document mutation ──

    async fn update_one(
        &self,
        collection: &str,
        filter: &DocFilter,
        update: &Update,
    ) -> Result<UpdateOutcome>;

    // ── Queries ──

    async fn find(
        &self,
        collection: &str,
        filter: &DocFilter,
        projection: &Projection,
    ) -> Result<Vec<Document>>;

    /// Like `find`, with embedded arrays narrowed to matching elements before
    /// the projection applies.
    async fn find_with_arrays(
        &self,
        collection: &str,
        filter: &DocFilter,
        arrays: &[ArrayFilter],
        projection: &Projection,
    ) -> Result<Vec<Document>> {
        let docs = self.find(collection, filter, &Projection::all()).await?;
        Ok(docs
            .into_iter()
            .map(|mut doc| {
                for af in arrays {
                    af.apply(&mut doc.fields);
                }
                let fields = projection.apply(&doc.fields);
                Document::new(doc.id, fields)
            })
            .collect())
    }

    /// Total number of `array` elements matching `elem` across the matched
    /// documents.
    async fn count_array_elems(
        &self,
        collection: &str,
        filter: &DocFilter,
        array: &str,
        elem: &ElemFilter,
    ) -> Result<u64>;
}
