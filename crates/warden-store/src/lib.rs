//! Document storage for Warden.
//!
//! This crate defines the contract Warden expects from its backing document
//! store (collections of JSON documents keyed by id, without guaranteed
//! cross-document transactions) and ships an in-memory implementation used by
//! tests and by the operator tooling.
//!
//! # Example
//!
//! ```
//! use warden_store::{DocumentStore, MemoryDocumentStore};
//! use serde_json::json;
//!
//! # tokio_test_block(async {
//! let store = MemoryDocumentStore::new();
//! let fields = json!({ "role": "employee" }).as_object().cloned().unwrap();
//! store.set("users", "u1", fields, false).await.unwrap();
//!
//! let doc = store.get("users", "u1").await.unwrap().unwrap();
//! assert_eq!(doc.fields["role"], "employee");
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

#![warn(missing_docs)]

mod document;
mod error;
mod memory;
mod traits;

pub use document::{to_fields, Document, Fields, WriteOp};
pub use error::{Result, StoreError};
pub use memory::{MemoryDocumentStore, Snapshot, StoreStats};
pub use traits::DocumentStore;
