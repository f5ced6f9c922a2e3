//! SQLite-backed implementation of
//! [`StorageBackend`](coffer_storage::StorageBackend) for coffer.
//!
//! This crate provides [`SqlBackend`], the relational storage backend. It is a
//! drop-in substitute for the flat-file backend: same operations, same error
//! taxonomy, different layout.
//!
//! # Features
//!
//! - **One row per container**: keyed by `(owner, ordinal)`, upserted atomically
//! - **Transactional imports**: an owner's data is replaced in one transaction
//! - **All-or-nothing archives**: a failed archive write rolls back completely
//! - **WAL journal**: readers do not block the single writer
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              PlayerData │ ContextManager │ BackupEngine     │
//! ├─────────────────────────────────────────────────────────────┤
//! │                       SqlBackend                            │
//! │              (implements StorageBackend trait)              │
//! ├─────────────────────────────────────────────────────────────┤
//! │   spawn_blocking │ Mutex<Connection> │ schema migrations    │
//! ├─────────────────────────────────────────────────────────────┤
//! │                     SQLite (bundled)                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use coffer_storage::{ContainerRecord, OwnerId, StorageBackend};
//! use coffer_storage_sql::{SqlBackend, SqlBackendConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SqlBackendConfig::builder().path("data/coffer.db").build()?;
//!     let backend = SqlBackend::open(config)?;
//!
//!     let owner = OwnerId::new_v4();
//!     backend.save_container(owner, &ContainerRecord::empty(0, 3)).await?;
//!     let record = backend.get_container(owner, 0).await?;
//!     assert_eq!(record.map(|r| r.rows), Some(3));
//!
//!     Ok(())
//! }
//! ```
//!
//! # Error Handling
//!
//! Backend-specific failures are [`SqlStorageError`] values, converted into
//! [`StorageError`](coffer_storage::StorageError) at the trait boundary. A
//! busy database past the configured `busy_timeout` surfaces as
//! [`StorageError::Timeout`](coffer_storage::StorageError::Timeout).

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod config;
mod error;
pub mod schema;

pub use backend::SqlBackend;
pub use config::SqlBackendConfig;
pub use error::{Result, SqlStorageError};
