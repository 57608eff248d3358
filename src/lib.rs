//! # Lingosync
//!
//! Keeps translated content consistent with an evolving source. File payloads live in a
//! blob store, a SQLite index tracks them, and every submitted translation is stamped with
//! the hash of the source text it was written against so that source edits mark it stale.
//!
//! ## Library Usage
//!
//! ```toml
//! [dependencies]
//! lingosync = { version = "0.0.1", default-features = false }
//! ```
//!
//! ```rust,ignore
//! use lingosync::config::EngineConfig;
//! use lingosync::sync::{ImportRequest, SyncEngine};
//!
//! let engine = SyncEngine::open(&EngineConfig::default())?;
//! let report = engine.import(&request).await?;
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` (default): Builds the `lingosync` binary. Disable with `default-features = false`.

pub mod blob;
pub mod config;
pub mod error;
pub mod hash;
pub mod overlay;
pub mod reconcile;
pub mod server;
pub mod source;
pub mod staleness;
pub mod store;
pub mod sync;
pub mod types;
