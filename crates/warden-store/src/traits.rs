//! Document store trait.
//!
//! Defines the interface Warden needs from a backing document store. Stores
//! are not assumed to support cross-document transactions or cancellation.

use crate::{Document, Fields, Result, StoreError, WriteOp};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Trait for document store backends.
///
/// Collections are addressed by path (`users`,
/// `departments/{id}/supervisors`); documents by id within a collection.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Reads a document. Absence is `Ok(None)`, not an error.
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>>;

    /// Writes a document. With `merge`, fields are merged into an existing
    /// document; otherwise the document is replaced.
    async fn set(&self, collection: &str, id: &str, fields: Fields, merge: bool) -> Result<()>;

    /// Merges fields into an existing document, failing with
    /// [`StoreError::NotFound`] if it does not exist.
    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<()>;

    /// Creates a document only if absent. Returns whether it was created.
    async fn create(&self, collection: &str, id: &str, fields: Fields) -> Result<bool>;

    /// Deletes a document. Returns whether it existed.
    async fn delete(&self, collection: &str, id: &str) -> Result<bool>;

    /// Lists every document of a collection.
    async fn list(&self, collection: &str) -> Result<Vec<Document>>;

    /// Cheap liveness probe.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    /// Whether [`DocumentStore::commit`] applies batches atomically.
    fn supports_transactions(&self) -> bool {
        false
    }

    /// Applies a batch of writes as one atomic unit.
    async fn commit(&self, _writes: Vec<WriteOp>) -> Result<()> {
        Err(StoreError::TransactionsUnsupported)
    }

    /// Reads a document, racing the call against `timeout`.
    ///
    /// On expiry the in-flight read is dropped and its result discarded.
    async fn get_within(
        &self,
        collection: &str,
        id: &str,
        timeout: Duration,
    ) -> Result<Option<Document>> {
        match tokio::time::timeout(timeout, self.get(collection, id)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(timeout)),
        }
    }
}

#[async_trait]
impl<T: DocumentStore + ?Sized> DocumentStore for Arc<T> {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        (**self).get(collection, id).await
    }

    async fn set(&self, collection: &str, id: &str, fields: Fields, merge: bool) -> Result<()> {
        (**self).set(collection, id, fields, merge).await
    }

    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<()> {
        (**self).update(collection, id, fields).await
    }

    async fn create(&self, collection: &str, id: &str, fields: Fields) -> Result<bool> {
        (**self).create(collection, id, fields).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        (**self).delete(collection, id).await
    }

    async fn list(&self, collection: &str) -> Result<Vec<Document>> {
        (**self).list(collection).await
    }

    async fn ping(&self) -> Result<()> {
        (**self).ping().await
    }

    fn supports_transactions(&self) -> bool {
        (**self).supports_transactions()
    }

    async fn commit(&self, writes: Vec<WriteOp>) -> Result<()> {
        (**self).commit(writes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Store whose reads never complete.
    struct StalledStore;

    #[async_trait]
    impl DocumentStore for StalledStore {
        async fn get(&self, _collection: &str, _id: &str) -> Result<Option<Document>> {
            std::future::pending().await
        }

        async fn set(&self, _c: &str, _id: &str, _f: Fields, _merge: bool) -> Result<()> {
            Ok(())
        }

        async fn update(&self, _c: &str, _id: &str, _f: Fields) -> Result<()> {
            Ok(())
        }

        async fn create(&self, _c: &str, _id: &str, _f: Fields) -> Result<bool> {
            Ok(true)
        }

        async fn delete(&self, _c: &str, _id: &str) -> Result<bool> {
            Ok(false)
        }

        async fn list(&self, _c: &str) -> Result<Vec<Document>> {
            Ok(vec![])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_within_times_out() {
        let store = StalledStore;
        let result = store
            .get_within("users", "u1", Duration::from_secs(5))
            .await;
        assert_eq!(result, Err(StoreError::Timeout(Duration::from_secs(5))));
    }

    #[tokio::test]
    async fn test_default_commit_unsupported() {
        let store = Arc::new(StalledStore);
        assert!(!store.supports_transactions());
        assert_eq!(
            store.commit(vec![]).await,
            Err(StoreError::TransactionsUnsupported)
        );
        assert!(store.ping().await.is_ok());
    }
}
