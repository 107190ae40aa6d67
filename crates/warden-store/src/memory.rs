//! In-memory document store.
//!
//! Used by tests and the operator tooling. Supports fault injection (read
//! latency, failing collections, going offline) so degraded paths can be
//! exercised deterministically, and optionally advertises transactions.

use crate::{Document, DocumentStore, Fields, Result, StoreError, WriteOp};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

type Collections = BTreeMap<String, BTreeMap<String, Fields>>;

/// Serializable image of every collection in a store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Documents by collection path, then by id.
    #[serde(default)]
    pub collections: Collections,
}

/// Operation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of get/list calls.
    pub reads: u64,
    /// Number of applied writes.
    pub writes: u64,
}

#[derive(Debug, Default)]
struct Faults {
    read_delay: Option<Duration>,
    failing_reads: BTreeSet<String>,
    failing_writes: BTreeSet<(String, Option<String>)>,
    offline: bool,
}

/// Thread-safe in-memory document store.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    collections: RwLock<Collections>,
    faults: RwLock<Faults>,
    transactional: bool,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl MemoryDocumentStore {
    /// Create an empty, non-transactional store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store whose [`DocumentStore::commit`] is atomic.
    pub fn transactional() -> Self {
        Self {
            transactional: true,
            ..Self::default()
        }
    }

    /// Create a store pre-loaded from a snapshot.
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            collections: RwLock::new(snapshot.collections),
            ..Self::default()
        }
    }

    /// Take a snapshot of the current contents.
    pub fn snapshot(&self) -> Snapshot {
        let mut collections = self.collections.read().clone();
        collections.retain(|_, docs| !docs.is_empty());
        Snapshot { collections }
    }

    /// Current operation counters.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            reads: self.reads.load(Ordering::SeqCst),
            writes: self.writes.load(Ordering::SeqCst),
        }
    }

    /// Delay every read by `delay`.
    pub fn set_read_delay(&self, delay: Option<Duration>) {
        self.faults.write().read_delay = delay;
    }

    /// Make reads of a collection fail.
    pub fn fail_reads(&self, collection: impl Into<String>) {
        self.faults.write().failing_reads.insert(collection.into());
    }

    /// Make writes to a collection (or to a single document of it) fail.
    pub fn fail_writes(&self, collection: impl Into<String>, id: Option<&str>) {
        self.faults
            .write()
            .failing_writes
            .insert((collection.into(), id.map(str::to_string)));
    }

    /// Make every operation, including pings, fail.
    pub fn set_offline(&self, offline: bool) {
        self.faults.write().offline = offline;
    }

    /// Remove every injected fault.
    pub fn clear_faults(&self) {
        *self.faults.write() = Faults::default();
    }

    async fn before_read(&self, collection: &str) -> Result<()> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let delay = self.faults.read().read_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let faults = self.faults.read();
        if faults.offline || faults.failing_reads.contains(collection) {
            return Err(StoreError::Unavailable(format!(
                "read of '{}' rejected",
                collection
            )));
        }
        Ok(())
    }

    fn check_write(&self, collection: &str, id: &str) -> Result<()> {
        let faults = self.faults.read();
        let blocked = faults.offline
            || faults
                .failing_writes
                .contains(&(collection.to_string(), None))
            || faults
                .failing_writes
                .contains(&(collection.to_string(), Some(id.to_string())));
        if blocked {
            tracing::debug!(collection, id, "injected write failure");
            return Err(StoreError::Unavailable(format!(
                "write to '{}/{}' rejected",
                collection, id
            )));
        }
        Ok(())
    }

    fn apply(collections: &mut Collections, op: WriteOp) -> Result<()> {
        match op {
            WriteOp::Set {
                collection,
                id,
                fields,
                merge,
            } => {
                let docs = collections.entry(collection).or_default();
                match docs.get_mut(&id) {
                    Some(existing) if merge => existing.extend(fields),
                    _ => {
                        docs.insert(id, fields);
                    }
                }
            }
            WriteOp::Update {
                collection,
                id,
                fields,
            } => {
                let existing = collections
                    .get_mut(&collection)
                    .and_then(|docs| docs.get_mut(&id))
                    .ok_or(StoreError::NotFound { collection, id })?;
                existing.extend(fields);
            }
            WriteOp::Delete { collection, id } => {
                if let Some(docs) = collections.get_mut(&collection) {
                    docs.remove(&id);
                }
            }
        }
        Ok(())
    }

    fn write(&self, op: WriteOp) -> Result<()> {
        self.check_write(op.collection(), op.id())?;
        Self::apply(&mut self.collections.write(), op)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        self.before_read(collection).await?;
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|fields| Document::new(id, fields.clone())))
    }

    async fn set(&self, collection: &str, id: &str, fields: Fields, merge: bool) -> Result<()> {
        self.write(WriteOp::Set {
            collection: collection.to_string(),
            id: id.to_string(),
            fields,
            merge,
        })
    }

    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<()> {
        self.write(WriteOp::Update {
            collection: collection.to_string(),
            id: id.to_string(),
            fields,
        })
    }

    async fn create(&self, collection: &str, id: &str, fields: Fields) -> Result<bool> {
        self.check_write(collection, id)?;
        let mut collections = self.collections.write();
        let docs = collections.entry(collection.to_string()).or_default();
        if docs.contains_key(id) {
            return Ok(false);
        }
        docs.insert(id.to_string(), fields);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        self.check_write(collection, id)?;
        let existed = self
            .collections
            .write()
            .get_mut(collection)
            .and_then(|docs| docs.remove(id))
            .is_some();
        if existed {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(existed)
    }

    async fn list(&self, collection: &str) -> Result<Vec<Document>> {
        self.before_read(collection).await?;
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, fields)| Document::new(id.clone(), fields.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn ping(&self) -> Result<()> {
        if self.faults.read().offline {
            return Err(StoreError::Unavailable("store offline".into()));
        }
        Ok(())
    }

    fn supports_transactions(&self) -> bool {
        self.transactional
    }

    async fn commit(&self, writes: Vec<WriteOp>) -> Result<()> {
        if !self.transactional {
            return Err(StoreError::TransactionsUnsupported);
        }
        for op in &writes {
            self.check_write(op.collection(), op.id())?;
        }

        // Stage on a copy so a failing write leaves the store untouched.
        let mut collections = self.collections.write();
        let mut staged = collections.clone();
        let count = writes.len() as u64;
        for op in writes {
            Self::apply(&mut staged, op)?;
        }
        *collections = staged;
        self.writes.fetch_add(count, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_set_get_merge() {
        let store = MemoryDocumentStore::new();
        store
            .set("users", "u1", fields(json!({"role": "employee", "status": "active"})), false)
            .await
            .unwrap();
        store
            .set("users", "u1", fields(json!({"role": "admin"})), true)
            .await
            .unwrap();

        let doc = store.get("users", "u1").await.unwrap().unwrap();
        assert_eq!(doc.fields["role"], "admin");
        assert_eq!(doc.fields["status"], "active");

        // Replace drops fields not written
        store
            .set("users", "u1", fields(json!({"role": "employee"})), false)
            .await
            .unwrap();
        let doc = store.get("users", "u1").await.unwrap().unwrap();
        assert!(doc.fields.get("status").is_none());
    }

    #[tokio::test]
    async fn test_update_requires_existing() {
        let store = MemoryDocumentStore::new();
        let err = store
            .update("users", "ghost", fields(json!({"role": "admin"})))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_create_if_absent() {
        let store = MemoryDocumentStore::new();
        assert!(store
            .create("users", "u1", fields(json!({"role": "employee"})))
            .await
            .unwrap());
        assert!(!store
            .create("users", "u1", fields(json!({"role": "admin"})))
            .await
            .unwrap());
        let doc = store.get("users", "u1").await.unwrap().unwrap();
        assert_eq!(doc.fields["role"], "employee");
    }

    #[tokio::test]
    async fn test_delete_and_list() {
        let store = MemoryDocumentStore::new();
        store.set("supervisors", "a", Fields::new(), false).await.unwrap();
        store.set("supervisors", "b", Fields::new(), false).await.unwrap();

        assert!(store.delete("supervisors", "a").await.unwrap());
        assert!(!store.delete("supervisors", "a").await.unwrap());

        let docs = store.list("supervisors").await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "b");
        assert!(store.list("empty").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let store = MemoryDocumentStore::new();
        store.fail_writes("departments/d1/supervisors", Some("u1"));

        let err = store
            .set("departments/d1/supervisors", "u1", Fields::new(), true)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        store
            .set("departments/d1/supervisors", "u2", Fields::new(), true)
            .await
            .unwrap();

        store.fail_reads("users");
        assert!(store.get("users", "u1").await.is_err());

        store.set_offline(true);
        assert!(store.ping().await.is_err());

        store.clear_faults();
        assert!(store.ping().await.is_ok());
        assert!(store.get("users", "u1").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_delay_hits_deadline() {
        let store = MemoryDocumentStore::new();
        store.set_read_delay(Some(Duration::from_secs(10)));
        let result = store
            .get_within("users", "u1", Duration::from_secs(5))
            .await;
        assert_eq!(result, Err(StoreError::Timeout(Duration::from_secs(5))));
    }

    #[tokio::test]
    async fn test_commit_is_atomic() {
        let store = MemoryDocumentStore::transactional();
        assert!(store.supports_transactions());

        let batch = vec![
            WriteOp::Set {
                collection: "users".into(),
                id: "u1".into(),
                fields: fields(json!({"role": "supervisor"})),
                merge: true,
            },
            WriteOp::Update {
                collection: "users".into(),
                id: "missing".into(),
                fields: Fields::new(),
            },
        ];
        assert!(store.commit(batch).await.is_err());
        assert!(store.get("users", "u1").await.unwrap().is_none());

        let batch = vec![
            WriteOp::Set {
                collection: "users".into(),
                id: "u1".into(),
                fields: fields(json!({"role": "supervisor"})),
                merge: true,
            },
            WriteOp::Delete {
                collection: "supervisors".into(),
                id: "u1".into(),
            },
        ];
        store.commit(batch).await.unwrap();
        assert!(store.get("users", "u1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_commit_unsupported_without_transactions() {
        let store = MemoryDocumentStore::new();
        assert_eq!(
            store.commit(vec![]).await,
            Err(StoreError::TransactionsUnsupported)
        );
    }

    #[tokio::test]
    async fn test_snapshot_and_stats() {
        let store = MemoryDocumentStore::new();
        store
            .set("users", "u1", fields(json!({"role": "admin"})), false)
            .await
            .unwrap();
        store.get("users", "u1").await.unwrap();

        let stats = store.stats();
        assert_eq!(stats, StoreStats { reads: 1, writes: 1 });

        let snapshot = store.snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        let restored = MemoryDocumentStore::from_snapshot(serde_json::from_str(&json).unwrap());
        assert_eq!(restored.snapshot(), snapshot);
    }
}
