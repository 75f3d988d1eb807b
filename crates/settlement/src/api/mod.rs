//! HTTP API for the settlement engine

pub mod auth;
pub mod handlers;
pub mod models;
pub mod routes;

use axum::http::HeaderName;
use std::sync::Arc;

use crate::engine::SettlementEngine;

/// Header the auth gateway sets to the authenticated subject
pub const DEFAULT_SUBJECT_HEADER: &str = "x-authenticated-subject";

/// Shared state for the settlement router
pub struct SettlementApiState {
    pub engine: Arc<SettlementEngine>,
    pub subject_header: HeaderName,
}

impl SettlementApiState {
    pub fn new(engine: Arc<SettlementEngine>) -> Self {
        Self {
            engine,
            subject_header: HeaderName::from_static(DEFAULT_SUBJECT_HEADER),
        }
    }

    /// Read the subject from a different header
    pub fn with_subject_header(mut self, header: HeaderName) -> Self {
        self.subject_header = header;
        self
    }
}

pub use routes::create_router;
