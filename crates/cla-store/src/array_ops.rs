//! Atomic array operation engine.
//!
//! Every mutation is a single filtered `update_one` against the backend. No
//! operation reads an array into memory to rewrite it. Whether something
//! happened is decided from the engine's matched/modified counters, with an
//! explicit read-only existence probe when "modified nothing" is ambiguous.

use serde_json::Value;
use tracing::{debug, warn};

use crate::collection::Collection;
use crate::document::*;
use crate::error::DbError;
use crate::store::Result;

fn error_if_matching_no_doc(outcome: &UpdateOutcome) -> Result<()> {
    if outcome.matched == 0 {
        return Err(DbError::no_record("doesn't match any records"));
    }
    Ok(())
}

impl Collection {
    /// Append one element to `array` of the document matched by `filter`.
    pub async fn push_array_elem(
        &self,
        array: &str,
        filter: &DocFilter,
        value: Fields,
    ) -> Result<()> {
        self.push_array_elems(array, filter, vec![value]).await
    }

    /// Append several elements in one atomic update.
    pub async fn push_array_elems(
        &self,
        array: &str,
        filter: &DocFilter,
        values: Vec<Fields>,
    ) -> Result<()> {
        let update = Update::Push {
            array: array.to_string(),
            values: values.into_iter().map(Value::Object).collect(),
        };
        let outcome = self.store.update_one(self.name, filter, &update).await?;
        debug!(
            collection = self.name,
            array,
            matched = outcome.matched,
            "push array elements"
        );
        error_if_matching_no_doc(&outcome)
    }

    /// Remove the elements matching `elem`. Removing nothing from an existing
    /// document is not an error.
    pub async fn pull_array_elem(
        &self,
        array: &str,
        filter: &DocFilter,
        elem: &ElemFilter,
    ) -> Result<()> {
        self.pull_and_return_array_elem(array, filter, elem)
            .await
            .map(|_| ())
    }

    /// Remove the elements matching `elem` and return what was removed.
    pub async fn pull_and_return_array_elem(
        &self,
        array: &str,
        filter: &DocFilter,
        elem: &ElemFilter,
    ) -> Result<Vec<Value>> {
        let update = Update::Pull {
            array: array.to_string(),
            elem: elem.clone(),
        };
        let outcome = self.store.update_one(self.name, filter, &update).await?;
        debug!(
            collection = self.name,
            array,
            matched = outcome.matched,
            removed = outcome.removed.len(),
            "pull array elements"
        );
        error_if_matching_no_doc(&outcome)?;
        Ok(outcome.removed)
    }

    /// Set `fields` on the elements matching `elem`, in place.
    ///
    /// `modified == 0` happens either because no element matched or because
    /// the values were already equal. With `check_modified` the engine issues
    /// an existence probe and reports `NoDbRecord` in the first case; without
    /// it both cases are success.
    pub async fn update_array_elem(
        &self,
        array: &str,
        filter: &DocFilter,
        elem: &ElemFilter,
        fields: Fields,
        check_modified: bool,
    ) -> Result<()> {
        let update = Update::SetElem {
            array: array.to_string(),
            elem: elem.clone(),
            fields,
        };
        self.apply_elem_update(array, filter, elem, &update, check_modified)
            .await
    }

    /// Add `value` to the set stored in `field` of the matching elements.
    pub async fn add_to_array_elem_set(
        &self,
        array: &str,
        filter: &DocFilter,
        elem: &ElemFilter,
        field: &str,
        value: Value,
        check_modified: bool,
    ) -> Result<()> {
        let update = Update::AddToElemSet {
            array: array.to_string(),
            elem: elem.clone(),
            field: field.to_string(),
            value,
        };
        self.apply_elem_update(array, filter, elem, &update, check_modified)
            .await
    }

    async fn apply_elem_update(
        &self,
        array: &str,
        filter: &DocFilter,
        elem: &ElemFilter,
        update: &Update,
        check_modified: bool,
    ) -> Result<()> {
        let outcome = self.store.update_one(self.name, filter, update).await?;
        debug!(
            collection = self.name,
            array,
            matched = outcome.matched,
            modified = outcome.modified,
            "update array element"
        );
        error_if_matching_no_doc(&outcome)?;

        if outcome.modified == 0
            && check_modified
            && !self.array_elem_exists(array, filter, elem).await?
        {
            warn!(collection = self.name, array, "array element not found");
            return Err(DbError::no_record("can't find array element"));
        }
        Ok(())
    }

    /// Read-only probe: does a document match `filter` and hold an element
    /// matching `elem`?
    pub async fn array_elem_exists(
        &self,
        array: &str,
        filter: &DocFilter,
        elem: &ElemFilter,
    ) -> Result<bool> {
        let query = filter.clone().elem_match(array, elem.clone());
        let docs = self
            .store
            .find(self.name, &query, &Projection::ids_only())
            .await?;
        Ok(!docs.is_empty())
    }

    /// Fetch the matched documents with `array` narrowed to the elements
    /// matching `elem` (all elements when `None`).
    pub async fn get_array_elem(
        &self,
        array: &str,
        filter: &DocFilter,
        elem: Option<&ElemFilter>,
        projection: &Projection,
    ) -> Result<Vec<Document>> {
        let arrays: Vec<ArrayFilter> = elem
            .map(|e| ArrayFilter::new(array, e.clone()))
            .into_iter()
            .collect();
        self.store
            .find_with_arrays(self.name, filter, &arrays, projection)
            .await
    }

    /// Number of `array` elements matching `elem` in the matched documents.
    pub async fn count_array(
        &self,
        array: &str,
        filter: &DocFilter,
        elem: &ElemFilter,
    ) -> Result<u64> {
        self.store
            .count_array_elems(self.name, filter, array, elem)
            .await
    }
}
