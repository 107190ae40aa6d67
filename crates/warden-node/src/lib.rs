//! # Warden Node
//!
//! Operator tooling for Warden access control.
//!
//! A node loads a JSON snapshot of the document store into memory, wires
//! [`warden_access::AccessControl`] over it and runs one command: a role
//! lookup, an access check, an assignment, an audit, or a long-running
//! watch with scheduled audits and store heartbeats.
//!
//! ## Modules
//!
//! - [`config`] - Node configuration (YAML)
//! - [`logging`] - Structured logging setup
//! - [`node`] - Snapshot-backed access control and the commands over it

#![warn(missing_docs)]

pub mod config;
pub mod logging;
pub mod node;

pub use config::NodeConfig;
pub use logging::{init_logging, LogFormat};
pub use node::{read_snapshot, write_snapshot, Assignment, AuditOutcome, Node};
