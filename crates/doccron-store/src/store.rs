//! Document store trait and in-memory implementation.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::document::{Document, DocumentId};
use crate::error::StoreError;
use crate::query::{Query, Update};

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;

/// The three operations the scheduler needs from a collection.
///
/// `find_one_and_update` is the claim primitive: selecting the document and
/// applying the update must be one indivisible step. Two callers racing with
/// the same query must never both receive the same document.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Atomically select one document matching `query`, apply `update` to it
    /// and return the document as it was before the update.
    ///
    /// Returns `Ok(None)` when nothing matches. Selection order among several
    /// matches is backend-defined.
    async fn find_one_and_update(
        &self,
        query: &Query,
        update: &Update,
    ) -> Result<Option<Document>, StoreError>;

    /// Apply `update` to the document with `id`. Returns whether it existed.
    async fn update_one(&self, id: &DocumentId, update: &Update) -> Result<bool, StoreError>;

    /// Delete the document with `id`. Returns whether it existed.
    async fn delete_one(&self, id: &DocumentId) -> Result<bool, StoreError>;
}

/// In-memory document collection.
///
/// Documents are kept in insertion order; claims pick the first match.
pub struct MemoryStore {
    documents: RwLock<Vec<Document>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(Vec::new()),
        }
    }

    /// Insert a body under a generated id.
    pub async fn insert_one(&self, body: Value) -> Result<DocumentId, StoreError> {
        let document = Document::new(body)?;
        let id = document.id.clone();
        self.insert(document).await?;
        Ok(id)
    }

    /// Insert a document, rejecting duplicate ids.
    pub async fn insert(&self, document: Document) -> Result<(), StoreError> {
        let mut documents = self.documents.write().await;
        if documents.iter().any(|d| d.id == document.id) {
            return Err(StoreError::DuplicateId(document.id.to_string()));
        }
        debug!(document_id = %document.id, "document inserted");
        documents.push(document);
        Ok(())
    }

    /// Fetch a document by id.
    pub async fn find_by_id(&self, id: &DocumentId) -> Option<Document> {
        let documents = self.documents.read().await;
        documents.iter().find(|d| &d.id == id).cloned()
    }

    /// Snapshot of every document.
    pub async fn all(&self) -> Vec<Document> {
        self.documents.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find_one_and_update(
        &self,
        query: &Query,
        update: &Update,
    ) -> Result<Option<Document>, StoreError> {
        // One write guard covers both the selection and the mutation.
        let mut documents = self.documents.write().await;

        let Some(document) = documents.iter_mut().find(|d| query.matches(&d.body)) else {
            return Ok(None);
        };

        let original = document.clone();
        let mut body = document.body.clone();
        update.apply(&mut body)?;
        document.body = body;

        debug!(document_id = %original.id, "document claimed");
        Ok(Some(original))
    }

    async fn update_one(&self, id: &DocumentId, update: &Update) -> Result<bool, StoreError> {
        let mut documents = self.documents.write().await;
        let Some(document) = documents.iter_mut().find(|d| &d.id == id) else {
            return Ok(false);
        };

        let mut body = document.body.clone();
        update.apply(&mut body)?;
        document.body = body;
        Ok(true)
    }

    async fn delete_one(&self, id: &DocumentId) -> Result<bool, StoreError> {
        let mut documents = self.documents.write().await;
        let before = documents.len();
        documents.retain(|d| &d.id != id);
        Ok(documents.len() != before)
    }
}
