//! Identifier types shared by every saga crate.

pub mod types;

pub use types::{EntityId, LockToken, SagaConfigId, SagaId};
