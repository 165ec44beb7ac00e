//! Two-party chat core: message state machine plus the staff notification
//! feed. Transport, auth and push delivery live outside this crate; writes
//! return new state and [`service::ChatService`] publishes the matching event.

pub mod aggregator;
pub mod attachments;
pub mod blob;
pub mod config;
pub mod error;
pub mod guard;
pub mod router;
pub mod service;
pub mod store;

pub use error::{ChatError, ChatResult};
