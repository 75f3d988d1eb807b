//! Settlement domain types
//!
//! This module defines the instruction record, its lifecycle states and the
//! read-side views handed out by the engine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::codec::EncryptedPayload;
use crate::error::{Result, SettlementError};

/// Longest identifier accepted from callers
pub const MAX_ID_LEN: usize = 64;

/// Suffix appended to an identifier to name its reversal record
pub const REVERSAL_SUFFIX: &str = ".rev";

/// Unique settlement identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettlementId(String);

impl SettlementId {
    /// Parse a caller-supplied identifier for a new instruction
    ///
    /// Accepts 1 to 64 characters from `[A-Za-z0-9_.:-]`. The reversal
    /// suffix is reserved for records created by the engine.
    pub fn parse(raw: &str) -> Result<Self> {
        let id = Self::parse_lookup(raw)?;
        if id.is_reversal() {
            return Err(SettlementError::Validation(format!(
                "id suffix '{}' is reserved for reversals",
                REVERSAL_SUFFIX
            )));
        }
        Ok(id)
    }

    /// Parse an identifier naming an existing record, reversals included
    pub fn parse_lookup(raw: &str) -> Result<Self> {
        // Reversal ids carry the suffix on top of a full-length id
        let max_len = if raw.ends_with(REVERSAL_SUFFIX) {
            MAX_ID_LEN + REVERSAL_SUFFIX.len()
        } else {
            MAX_ID_LEN
        };
        if raw.is_empty() || raw.len() > max_len {
            return Err(SettlementError::Validation(format!(
                "id must be between 1 and {} characters",
                max_len
            )));
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-'))
        {
            return Err(SettlementError::Validation(
                "id may only contain letters, digits, '_', '.', ':' and '-'".to_string(),
            ));
        }
        Ok(Self(raw.to_string()))
    }

    /// Whether this names an engine-created reversal record
    pub fn is_reversal(&self) -> bool {
        self.0.ends_with(REVERSAL_SUFFIX)
    }

    /// Generate a fresh identifier for requests that did not supply one
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Identifier of the reversal record linked to this instruction
    pub fn reversal(&self) -> Self {
        Self(format!("{}{}", self.0, REVERSAL_SUFFIX))
    }

    /// Wrap a value read back from storage
    pub(crate) fn from_stored(raw: String) -> Self {
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SettlementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a settlement instruction
///
/// JSON carries the variant name (`"Settled"`); storage and metrics use the
/// lowercase [`as_str`](Self::as_str) form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SettlementStatus {
    /// Recorded, waiting for business validation
    Pending,
    /// Passed validation, waiting for commit
    Validated,
    /// Committed to the ledger
    Settled,
    /// Rejected by validation or at commit
    Failed,
    /// Compensating record for a settled instruction
    Reversed,
}

impl SettlementStatus {
    pub const ALL: [SettlementStatus; 5] = [
        SettlementStatus::Pending,
        SettlementStatus::Validated,
        SettlementStatus::Settled,
        SettlementStatus::Failed,
        SettlementStatus::Reversed,
    ];

    /// Whether `next` is a forward edge from this state
    pub fn can_transition_to(self, next: SettlementStatus) -> bool {
        use SettlementStatus::*;
        matches!(
            (self, next),
            (Pending, Validated) | (Pending, Failed) | (Validated, Settled) | (Validated, Failed)
        )
    }

    /// States from which `self` can be reached by a single transition
    pub fn predecessors(self) -> Vec<SettlementStatus> {
        Self::ALL
            .into_iter()
            .filter(|from| from.can_transition_to(self))
            .collect()
    }

    /// Still moving through the forward path
    pub fn is_in_flight(self) -> bool {
        matches!(self, SettlementStatus::Pending | SettlementStatus::Validated)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_in_flight()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SettlementStatus::Pending => "pending",
            SettlementStatus::Validated => "validated",
            SettlementStatus::Settled => "settled",
            SettlementStatus::Failed => "failed",
            SettlementStatus::Reversed => "reversed",
        }
    }
}

impl std::fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SettlementStatus {
    type Err = SettlementError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(SettlementStatus::Pending),
            "validated" => Ok(SettlementStatus::Validated),
            "settled" => Ok(SettlementStatus::Settled),
            "failed" => Ok(SettlementStatus::Failed),
            "reversed" => Ok(SettlementStatus::Reversed),
            other => Err(SettlementError::Validation(format!(
                "unknown settlement status '{}'",
                other
            ))),
        }
    }
}

/// Account and routing data that only ever leaves memory encrypted
///
/// Every field is wiped when the value is dropped.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct SensitiveDetails {
    pub buyer_account: String,
    pub seller_account: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
}

impl SensitiveDetails {
    /// Details for the compensating record: accounts swap sides
    pub fn mirrored(&self) -> Self {
        Self {
            buyer_account: self.seller_account.clone(),
            seller_account: self.buyer_account.clone(),
            routing_code: self.routing_code.clone(),
            memo: self.memo.clone(),
        }
    }
}

impl std::fmt::Debug for SensitiveDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SensitiveDetails(<redacted>)")
    }
}

/// Authenticated caller identity, resolved upstream of this service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Subject(String);

impl Subject {
    pub fn new(subject: impl Into<String>) -> Result<Self> {
        let subject = subject.into();
        let trimmed = subject.trim();
        if trimmed.is_empty() {
            return Err(SettlementError::Forbidden(
                "missing authenticated subject".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A schema-checked submission, ready for the engine
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    /// Caller-supplied identifier; generated when absent
    pub id: Option<SettlementId>,
    pub buyer: String,
    pub seller: String,
    pub instrument: String,
    pub amount: Decimal,
    pub currency: String,
    /// Caller-supplied request time; the submission time is used when absent
    pub requested_at: Option<DateTime<Utc>>,
    pub details: SensitiveDetails,
}

impl SubmitRequest {
    /// Canonical bytes that identify the content of this request under `id`
    ///
    /// Amounts are normalized so `100.00` and `100` describe the same
    /// instruction. The request time only participates when the caller sent one.
    pub fn fingerprint(&self, id: &SettlementId) -> Result<Vec<u8>> {
        let canonical = CanonicalContent {
            id: id.as_str(),
            buyer: &self.buyer,
            seller: &self.seller,
            instrument: &self.instrument,
            amount: self.amount.normalize().to_string(),
            currency: &self.currency,
            requested_at: self.requested_at.map(|t| t.to_rfc3339()),
            reverses: None,
            details: &self.details,
        };
        serde_json::to_vec(&canonical)
            .map_err(|e| SettlementError::Internal(format!("failed to encode fingerprint: {}", e)))
    }
}

/// Field order here is the hash order; do not reorder
#[derive(Serialize)]
pub(crate) struct CanonicalContent<'a> {
    pub id: &'a str,
    pub buyer: &'a str,
    pub seller: &'a str,
    pub instrument: &'a str,
    pub amount: String,
    pub currency: &'a str,
    pub requested_at: Option<String>,
    pub reverses: Option<&'a str>,
    pub details: &'a SensitiveDetails,
}

/// Settlement instruction as persisted
#[derive(Debug, Clone)]
pub struct SettlementInstruction {
    /// Unique, immutable identifier
    pub id: SettlementId,
    /// Paying counterparty
    pub buyer: String,
    /// Receiving counterparty
    pub seller: String,
    /// Instrument reference
    pub instrument: String,
    /// Gross amount
    pub amount: Decimal,
    /// Currency code
    pub currency: String,
    /// When the caller asked for settlement
    pub requested_at: DateTime<Utc>,
    /// Current lifecycle state
    pub status: SettlementStatus,
    /// Sealed [`SensitiveDetails`]
    pub payload: EncryptedPayload,
    /// Keyed hash of the submitted content
    pub content_hash: String,
    /// Optimistic concurrency sequence, starts at 1
    pub version: i64,
    /// Subject that submitted the instruction
    pub submitted_by: String,
    /// Instruction this record compensates, for reversal records
    pub reverses: Option<SettlementId>,
    /// Failure or reversal reason
    pub reason: Option<String>,
    /// Record creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl SettlementInstruction {
    /// Build a fresh `Pending` record from a submission
    pub fn pending(
        id: SettlementId,
        request: &SubmitRequest,
        payload: EncryptedPayload,
        content_hash: String,
        subject: &Subject,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            buyer: request.buyer.clone(),
            seller: request.seller.clone(),
            instrument: request.instrument.clone(),
            amount: request.amount,
            currency: request.currency.clone(),
            requested_at: request.requested_at.unwrap_or(now),
            status: SettlementStatus::Pending,
            payload,
            content_hash,
            version: 1,
            submitted_by: subject.as_str().to_string(),
            reverses: None,
            reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Copy of this record moved to `next`, one version ahead
    pub fn transitioned(&self, next: SettlementStatus, reason: Option<String>) -> Result<Self> {
        if !self.status.can_transition_to(next) {
            return Err(SettlementError::InvalidTransition {
                id: self.id.to_string(),
                from: self.status,
                to: next,
            });
        }
        let mut updated = self.clone();
        updated.status = next;
        updated.reason = reason.or_else(|| self.reason.clone());
        updated.version = self.version + 1;
        updated.updated_at = Utc::now();
        Ok(updated)
    }

    /// Canonical bytes of the compensating record for this instruction
    ///
    /// `details` are the mirrored sensitive fields the reversal carries.
    pub(crate) fn reversal_fingerprint(&self, details: &SensitiveDetails) -> Result<Vec<u8>> {
        let reversal_id = self.id.reversal();
        let canonical = CanonicalContent {
            id: reversal_id.as_str(),
            buyer: &self.seller,
            seller: &self.buyer,
            instrument: &self.instrument,
            amount: self.amount.normalize().to_string(),
            currency: &self.currency,
            requested_at: None,
            reverses: Some(self.id.as_str()),
            details,
        };
        serde_json::to_vec(&canonical)
            .map_err(|e| SettlementError::Internal(format!("failed to encode fingerprint: {}", e)))
    }

    /// Compensating record for this settled instruction
    ///
    /// Counterparties swap sides; amount, currency and instrument are kept.
    pub fn reversal(
        &self,
        payload: EncryptedPayload,
        content_hash: String,
        subject: &Subject,
        reason: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: self.id.reversal(),
            buyer: self.seller.clone(),
            seller: self.buyer.clone(),
            instrument: self.instrument.clone(),
            amount: self.amount,
            currency: self.currency.clone(),
            requested_at: now,
            status: SettlementStatus::Reversed,
            payload,
            content_hash,
            version: 1,
            submitted_by: subject.as_str().to_string(),
            reverses: Some(self.id.clone()),
            reason: Some(reason),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether `subject` submitted the instruction or is one of its counterparties
    pub fn involves(&self, subject: &Subject) -> bool {
        let who = subject.as_str();
        self.submitted_by == who || self.buyer == who || self.seller == who
    }
}

/// Non-sensitive projection of an instruction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SettlementView {
    pub id: SettlementId,
    pub buyer: String,
    pub seller: String,
    pub instrument: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: SettlementStatus,
    pub version: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverses: Option<SettlementId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&SettlementInstruction> for SettlementView {
    fn from(instruction: &SettlementInstruction) -> Self {
        Self {
            id: instruction.id.clone(),
            buyer: instruction.buyer.clone(),
            seller: instruction.seller.clone(),
            instrument: instruction.instrument.clone(),
            amount: instruction.amount,
            currency: instruction.currency.clone(),
            status: instruction.status,
            version: instruction.version,
            reverses: instruction.reverses.clone(),
            reason: instruction.reason.clone(),
            requested_at: instruction.requested_at,
            created_at: instruction.created_at,
            updated_at: instruction.updated_at,
        }
    }
}

/// Status-only projection returned by `get_status`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusView {
    pub id: SettlementId,
    pub status: SettlementStatus,
    pub version: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<&SettlementInstruction> for StatusView {
    fn from(instruction: &SettlementInstruction) -> Self {
        Self {
            id: instruction.id.clone(),
            status: instruction.status,
            version: instruction.version,
            reason: instruction.reason.clone(),
            updated_at: instruction.updated_at,
        }
    }
}

/// Result of a submission
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitOutcome {
    pub id: SettlementId,
    pub status: SettlementStatus,
    pub reason: Option<String>,
    /// True when the call matched an existing record instead of creating one
    pub replayed: bool,
}

impl SubmitOutcome {
    pub(crate) fn from_record(record: &SettlementInstruction, replayed: bool) -> Self {
        Self {
            id: record.id.clone(),
            status: record.status,
            reason: record.reason.clone(),
            replayed,
        }
    }
}

/// Result of a reversal
#[derive(Debug, Clone, PartialEq)]
pub struct ReversalOutcome {
    /// Identifier of the new compensating record
    pub id: SettlementId,
    /// Instruction that was reversed
    pub reverses: SettlementId,
    /// True when the reversal already existed
    pub replayed: bool,
}

/// Filters for listing instructions
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub status: Option<SettlementStatus>,
    pub currency: Option<String>,
    /// Matches either counterparty
    pub party: Option<String>,
    pub limit: u32,
    pub offset: u32,
}

/// Environment for table isolation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Prod,
    Virtual,
    Static,
}

impl Environment {
    /// Settlement table for this environment
    pub fn table_name(&self) -> &'static str {
        match self {
            Environment::Prod => "settlements_prod",
            Environment::Virtual => "settlements_virtual",
            Environment::Static => "settlements_static",
        }
    }

    /// Parse a configured environment name
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "prod" | "production" => Some(Environment::Prod),
            "virtual" | "paper" => Some(Environment::Virtual),
            "static" | "test" | "dev" | "development" => Some(Environment::Static),
            _ => None,
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Prod => write!(f, "prod"),
            Environment::Virtual => write!(f, "virtual"),
            Environment::Static => write!(f, "static"),
        }
    }
}
