use std::fmt;
use std::sync::Arc;

use crate::store::DocumentStore;

/// A named collection bound to a storage backend.
///
/// Handles are cheap to clone; repositories hold one per collection they
/// touch. The array engine lives in `array_ops`, whole-document operations in
/// `doc_ops`.
#[derive(Clone)]
pub struct Collection {
    pub(crate) store: Arc<dyn DocumentStore>,
    pub(crate) name: &'static str,
}

impl Collection {
    pub fn new(store: Arc<dyn DocumentStore>, name: &'static str) -> Self {
        Self { store, name }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection").field("name", &self.name).finish()
    }
}
