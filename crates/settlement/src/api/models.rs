//! API models for settlement HTTP endpoints

use chrono::{DateTime, Utc};
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::OnceLock;

use crate::error::SettlementError;
use crate::netting::NetPosition;
use crate::types::{
    ListFilter, SensitiveDetails, SettlementId, SettlementStatus, SettlementView, StatusView, SubmitRequest,
};

const CURRENCY_PATTERN: &str = r"^[A-Z0-9]{3,10}$";
const MAX_PARTY_LEN: usize = 128;
const MAX_MEMO_LEN: usize = 1024;

fn currency_regex() -> Result<&'static Regex, SettlementError> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    if let Some(re) = PATTERN.get() {
        return Ok(re);
    }
    let compiled = Regex::new(CURRENCY_PATTERN)
        .map_err(|e| SettlementError::Internal(format!("invalid currency pattern: {}", e)))?;
    Ok(PATTERN.get_or_init(|| compiled))
}

fn default_instrument() -> String {
    "CASH".to_string()
}

fn required(field: &str, value: String, max_len: usize) -> Result<String, SettlementError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(SettlementError::Validation(format!("{} is required", field)));
    }
    if trimmed.chars().count() > max_len {
        return Err(SettlementError::Validation(format!(
            "{} exceeds {} characters",
            field, max_len
        )));
    }
    Ok(trimmed.to_string())
}

/// Request to submit a settlement instruction
///
/// `amount` is a decimal string; JSON numbers are rejected so no value
/// ever passes through binary floating point.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateSettlementRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub buyer: String,
    pub seller: String,
    #[serde(default = "default_instrument")]
    pub instrument: String,
    pub amount: String,
    pub currency: String,
    #[serde(default)]
    pub requested_at: Option<DateTime<Utc>>,
    pub buyer_account: String,
    pub seller_account: String,
    #[serde(default)]
    pub routing_code: Option<String>,
    #[serde(default)]
    pub memo: Option<String>,
}

impl CreateSettlementRequest {
    /// Check the schema and build the engine request
    pub fn into_submit(self) -> Result<SubmitRequest, SettlementError> {
        let id = self.id.as_deref().map(SettlementId::parse).transpose()?;

        let amount = Decimal::from_str(self.amount.trim()).map_err(|_| {
            SettlementError::Validation(format!("amount '{}' is not a decimal string", self.amount))
        })?;

        let currency = self.currency.trim().to_uppercase();
        if !currency_regex()?.is_match(&currency) {
            return Err(SettlementError::Validation(format!(
                "currency '{}' must be 3 to 10 letters or digits",
                self.currency
            )));
        }

        let memo = match self.memo {
            Some(memo) if memo.chars().count() > MAX_MEMO_LEN => {
                return Err(SettlementError::Validation(format!(
                    "memo exceeds {} characters",
                    MAX_MEMO_LEN
                )))
            }
            other => other,
        };

        Ok(SubmitRequest {
            id,
            buyer: required("buyer", self.buyer, MAX_PARTY_LEN)?,
            seller: required("seller", self.seller, MAX_PARTY_LEN)?,
            instrument: required("instrument", self.instrument, MAX_PARTY_LEN)?,
            amount,
            currency,
            requested_at: self.requested_at,
            details: SensitiveDetails {
                buyer_account: required("buyer_account", self.buyer_account, MAX_PARTY_LEN)?,
                seller_account: required("seller_account", self.seller_account, MAX_PARTY_LEN)?,
                routing_code: self.routing_code.filter(|r| !r.trim().is_empty()),
                memo,
            },
        })
    }
}

/// Response after submitting an instruction
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitSettlementResponse {
    pub success: bool,
    pub id: SettlementId,
    pub status: SettlementStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub replayed: bool,
}

/// Single instruction in API response
#[derive(Debug, Serialize, Deserialize)]
pub struct SettlementResponse {
    pub success: bool,
    #[serde(flatten)]
    pub settlement: SettlementView,
}

/// Status-only response
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub success: bool,
    #[serde(flatten)]
    pub status: StatusView,
}

/// Decrypted sensitive fields
#[derive(Debug, Serialize, Deserialize)]
pub struct DetailsResponse {
    pub success: bool,
    pub id: SettlementId,
    pub details: SensitiveDetails,
}

/// List instructions request parameters
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct ListSettlementsParams {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub party: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

impl ListSettlementsParams {
    pub fn into_filter(self) -> Result<ListFilter, SettlementError> {
        let status = self
            .status
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(SettlementStatus::from_str)
            .transpose()?;

        Ok(ListFilter {
            status,
            currency: self.currency.filter(|c| !c.trim().is_empty()),
            party: self.party.filter(|p| !p.trim().is_empty()),
            limit: self.limit.unwrap_or(0),
            offset: self.offset.unwrap_or(0),
        })
    }
}

/// List instructions response
#[derive(Debug, Serialize, Deserialize)]
pub struct ListSettlementsResponse {
    pub success: bool,
    pub returned_count: u32,
    pub offset: u32,
    pub settlements: Vec<SettlementView>,
}

/// Request to reverse a settled instruction
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReversalRequest {
    pub reason: String,
}

/// Response after a reversal
#[derive(Debug, Serialize, Deserialize)]
pub struct ReversalResponse {
    pub success: bool,
    pub id: SettlementId,
    pub reverses: SettlementId,
    pub status: SettlementStatus,
    pub replayed: bool,
}

/// Net positions for one currency
#[derive(Debug, Serialize, Deserialize)]
pub struct ObligationsResponse {
    pub success: bool,
    pub currency: String,
    pub positions: Vec<NetPosition>,
}

/// Error detail
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}

/// Generic error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetail,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }
}
