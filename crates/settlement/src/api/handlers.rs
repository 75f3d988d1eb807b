//! API handlers for settlement HTTP endpoints
//!
//! Engine calls run on a spawned task so a client that disconnects mid-request
//! cannot cancel a commit half way.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use std::future::Future;
use std::sync::Arc;
use tracing::error;

use crate::api::auth::AuthenticatedSubject;
use crate::api::models::*;
use crate::api::SettlementApiState;
use crate::error::SettlementError;
use crate::types::{SettlementId, SettlementStatus};

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Map an engine error onto status code and body
///
/// Integrity and storage failures get a generic message so nothing about
/// stored payloads or the database leaks to callers.
pub fn error_response(err: &SettlementError) -> ApiError {
    let status = match err {
        SettlementError::Validation(_) => StatusCode::BAD_REQUEST,
        SettlementError::NotFound(_) => StatusCode::NOT_FOUND,
        SettlementError::IdempotencyConflict(_)
        | SettlementError::NotSettled { .. }
        | SettlementError::Conflict { .. } => StatusCode::CONFLICT,
        SettlementError::Forbidden(_) => StatusCode::FORBIDDEN,
        SettlementError::PersistenceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        SettlementError::InvalidTransition { .. }
        | SettlementError::Encryption(_)
        | SettlementError::Decryption(_)
        | SettlementError::Storage(_)
        | SettlementError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let message = match err {
        SettlementError::Encryption(_) | SettlementError::Decryption(_) => {
            "settlement payload could not be processed".to_string()
        }
        SettlementError::PersistenceUnavailable(_) => "settlement store is unavailable".to_string(),
        SettlementError::InvalidTransition { .. }
        | SettlementError::Storage(_)
        | SettlementError::Internal(_) => "internal error".to_string(),
        other => other.to_string(),
    };

    (status, Json(ErrorResponse::new(err.code(), message)))
}

fn rejection_response(rejection: JsonRejection) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse::new("VALIDATION_ERROR", rejection.body_text())),
    )
}

fn parse_id(raw: &str) -> Result<SettlementId, ApiError> {
    SettlementId::parse_lookup(raw).map_err(|e| error_response(&e))
}

/// Run an engine call to completion regardless of the client connection
async fn detached<F, T>(operation: &'static str, fut: F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, SettlementError>> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(fut).await {
        Ok(result) => result.map_err(|e| {
            if !matches!(
                e,
                SettlementError::Validation(_)
                    | SettlementError::NotFound(_)
                    | SettlementError::IdempotencyConflict(_)
                    | SettlementError::NotSettled { .. }
                    | SettlementError::Forbidden(_)
            ) {
                error!(operation, code = e.code(), error = %e, "Settlement operation failed");
            }
            error_response(&e)
        }),
        Err(join_error) => {
            error!(operation, error = %join_error, "Settlement task aborted");
            Err(error_response(&SettlementError::Internal(join_error.to_string())))
        }
    }
}

/// Submit settlement handler
///
/// 201 for a new settled instruction, 200 for a replay, 422 when the
/// instruction failed business validation.
pub async fn create_settlement(
    State(state): State<Arc<SettlementApiState>>,
    AuthenticatedSubject(subject): AuthenticatedSubject,
    payload: Result<Json<CreateSettlementRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitSettlementResponse>), ApiError> {
    let Json(req) = payload.map_err(rejection_response)?;
    let request = req.into_submit().map_err(|e| error_response(&e))?;

    let engine = state.engine.clone();
    let outcome = detached("submit", async move { engine.submit(request, &subject).await }).await?;

    let code = match (outcome.status, outcome.replayed) {
        (SettlementStatus::Failed, _) => StatusCode::UNPROCESSABLE_ENTITY,
        (_, true) => StatusCode::OK,
        (_, false) => StatusCode::CREATED,
    };

    Ok((
        code,
        Json(SubmitSettlementResponse {
            success: outcome.status != SettlementStatus::Failed,
            id: outcome.id,
            status: outcome.status,
            reason: outcome.reason,
            replayed: outcome.replayed,
        }),
    ))
}

/// Get settlement handler
pub async fn get_settlement(
    State(state): State<Arc<SettlementApiState>>,
    AuthenticatedSubject(_subject): AuthenticatedSubject,
    Path(id): Path<String>,
) -> Result<Json<SettlementResponse>, ApiError> {
    let id = parse_id(&id)?;
    let engine = state.engine.clone();
    let settlement = detached("get", async move { engine.get(&id).await }).await?;

    Ok(Json(SettlementResponse {
        success: true,
        settlement,
    }))
}

/// Get settlement status handler
pub async fn get_settlement_status(
    State(state): State<Arc<SettlementApiState>>,
    AuthenticatedSubject(_subject): AuthenticatedSubject,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let id = parse_id(&id)?;
    let engine = state.engine.clone();
    let status = detached("get_status", async move { engine.get_status(&id).await }).await?;

    Ok(Json(StatusResponse { success: true, status }))
}

/// Get decrypted details handler
pub async fn get_settlement_details(
    State(state): State<Arc<SettlementApiState>>,
    AuthenticatedSubject(subject): AuthenticatedSubject,
    Path(id): Path<String>,
) -> Result<Json<DetailsResponse>, ApiError> {
    let id = parse_id(&id)?;
    let engine = state.engine.clone();
    let lookup = id.clone();
    let details = detached("get_details", async move { engine.get_details(&lookup, &subject).await }).await?;

    Ok(Json(DetailsResponse {
        success: true,
        id,
        details,
    }))
}

/// List settlements handler
pub async fn list_settlements(
    State(state): State<Arc<SettlementApiState>>,
    AuthenticatedSubject(_subject): AuthenticatedSubject,
    Query(params): Query<ListSettlementsParams>,
) -> Result<Json<ListSettlementsResponse>, ApiError> {
    let filter = params.into_filter().map_err(|e| error_response(&e))?;
    let offset = filter.offset;

    let engine = state.engine.clone();
    let settlements = detached("list", async move { engine.list(filter).await }).await?;

    Ok(Json(ListSettlementsResponse {
        success: true,
        returned_count: settlements.len() as u32,
        offset,
        settlements,
    }))
}

/// Reverse settlement handler
pub async fn reverse_settlement(
    State(state): State<Arc<SettlementApiState>>,
    AuthenticatedSubject(subject): AuthenticatedSubject,
    Path(id): Path<String>,
    payload: Result<Json<ReversalRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ReversalResponse>), ApiError> {
    let id = parse_id(&id)?;
    let Json(req) = payload.map_err(rejection_response)?;

    let engine = state.engine.clone();
    let outcome = detached("reverse", async move { engine.reverse(&id, &req.reason, &subject).await }).await?;

    let code = if outcome.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };

    Ok((
        code,
        Json(ReversalResponse {
            success: true,
            id: outcome.id,
            reverses: outcome.reverses,
            status: SettlementStatus::Reversed,
            replayed: outcome.replayed,
        }),
    ))
}

/// Net obligations handler
pub async fn get_obligations(
    State(state): State<Arc<SettlementApiState>>,
    AuthenticatedSubject(_subject): AuthenticatedSubject,
    Path(currency): Path<String>,
) -> Result<Json<ObligationsResponse>, ApiError> {
    let currency = currency.trim().to_uppercase();
    let engine = state.engine.clone();
    let lookup = currency.clone();
    let positions = detached("net_obligations", async move { engine.net_obligations(&lookup).await }).await?;

    Ok(Json(ObligationsResponse {
        success: true,
        currency,
        positions,
    }))
}
