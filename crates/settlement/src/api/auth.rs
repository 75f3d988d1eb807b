//! Subject extraction
//!
//! Token verification happens in the gateway in front of this service. The
//! gateway forwards the verified subject in a header; this extractor only
//! requires that header to be present and non-empty.

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    Json,
};
use std::sync::Arc;

use crate::api::models::ErrorResponse;
use crate::api::SettlementApiState;
use crate::types::Subject;

/// Subject of the current request
#[derive(Debug, Clone)]
pub struct AuthenticatedSubject(pub Subject);

#[axum::async_trait]
impl FromRequestParts<Arc<SettlementApiState>> for AuthenticatedSubject {
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<SettlementApiState>,
    ) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(&state.subject_header)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();

        Subject::new(raw).map(AuthenticatedSubject).map_err(|_| {
            (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse::new(
                    "UNAUTHENTICATED",
                    format!("missing {} header", state.subject_header),
                )),
            )
        })
    }
}
