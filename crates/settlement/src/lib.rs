//! Settlement ledger for the exchange
//!
//! This crate records settlement instructions durably, applies each one
//! exactly once under concurrent and retried requests, and keeps account
//! data encrypted at field level while at rest.
//!
//! # Components
//!
//! - [`codec`] - AES-256-GCM field encryption and keyed content hashing
//! - [`store`] - `SettlementStore` trait with in-memory and PostgreSQL backends
//! - [`engine`] - instruction lifecycle, idempotency, reversals, netting
//! - `api` - axum HTTP surface over the engine
//!
//! # Feature Flags
//!
//! - `postgres` - Enable PostgreSQL storage
//! - `api` - Enable HTTP API

pub mod codec;
pub mod engine;
pub mod error;
pub mod netting;
pub mod retry;
pub mod store;
pub mod types;
pub mod validation;

#[cfg(feature = "api")]
pub mod api;

// Re-export commonly used types
pub use codec::{EncryptedPayload, EncryptionKey, FieldCodec};
pub use engine::{ResumeSummary, SettlementEngine};
pub use error::{Result, SettlementError};
pub use netting::NetPosition;
pub use retry::RetryPolicy;
pub use types::{
    Environment, ListFilter, ReversalOutcome, SensitiveDetails, SettlementId, SettlementInstruction,
    SettlementStatus, SettlementView, StatusView, Subject, SubmitOutcome, SubmitRequest,
};
pub use validation::{CurrencyRule, SettlementRules};

// Store exports
pub use store::memory::InMemorySettlementStore;
pub use store::traits::SettlementStore;

#[cfg(feature = "postgres")]
pub use store::postgres::PostgresSettlementStore;
