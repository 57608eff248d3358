//! Stateless compute service for batch hashing and validation.
//!
//! [`crate::hash::RemoteHasher`] is its client. Both sides share one hash function, so
//! tokens produced here are interchangeable with local ones.

pub mod dto;
pub mod response;
mod router;

pub use router::{AppState, WORKER_NAME, create_router};
