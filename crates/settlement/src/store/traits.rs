//! SettlementStore trait definition

use async_trait::async_trait;

use crate::error::SettlementError;
use crate::types::{ListFilter, SettlementId, SettlementInstruction, SettlementStatus};

/// SettlementStore trait - durable home of settlement instructions
///
/// Every write is a conditional write executed in a single transaction:
/// either the whole row changes or nothing does. Implementations never
/// delete records.
#[async_trait]
pub trait SettlementStore: Send + Sync {
    /// Create the backing table if it does not exist
    ///
    /// Safe to call on every startup. Fails with
    /// [`SettlementError::PersistenceUnavailable`] when the store cannot be reached.
    async fn init_schema(&self) -> StoreResult<()>;

    /// Insert a new instruction
    ///
    /// # Arguments
    /// * `instruction` - The record to create, normally at version 1
    ///
    /// # Returns
    /// The committed record, or [`SettlementError::Conflict`] if the identifier exists
    async fn insert(&self, instruction: SettlementInstruction) -> StoreResult<SettlementInstruction>;

    /// Replace the mutable state of an instruction if its version still matches
    ///
    /// # Arguments
    /// * `instruction` - The new state (status, reason, payload, version, updated_at)
    /// * `expected_version` - The version the caller read
    ///
    /// # Returns
    /// The committed record. Fails with [`SettlementError::Conflict`] on a version
    /// mismatch, [`SettlementError::NotFound`] if absent and
    /// [`SettlementError::InvalidTransition`] if the stored status cannot move
    /// to the new one.
    async fn update(
        &self,
        instruction: &SettlementInstruction,
        expected_version: i64,
    ) -> StoreResult<SettlementInstruction>;

    /// Insert a reversal record, checking in the same transaction that the
    /// instruction it reverses is still settled
    ///
    /// # Arguments
    /// * `reversal` - Record with `reverses` set
    async fn insert_linked(&self, reversal: SettlementInstruction) -> StoreResult<SettlementInstruction>;

    /// Get an instruction by identifier
    ///
    /// # Returns
    /// The instruction if found, None otherwise
    async fn get(&self, id: &SettlementId) -> StoreResult<Option<SettlementInstruction>>;

    /// List instructions, newest first
    ///
    /// # Arguments
    /// * `filter` - Status, currency and counterparty filters plus pagination
    async fn list(&self, filter: &ListFilter) -> StoreResult<Vec<SettlementInstruction>>;

    /// Instructions still in `Pending` or `Validated`, oldest first
    async fn list_in_flight(&self) -> StoreResult<Vec<SettlementInstruction>>;

    /// All instructions in one of `statuses` for `currency`
    ///
    /// # Arguments
    /// * `statuses` - Accepted statuses
    /// * `currency` - Currency code, case-insensitive
    async fn list_by_status(
        &self,
        statuses: &[SettlementStatus],
        currency: &str,
    ) -> StoreResult<Vec<SettlementInstruction>>;

    /// Cheap connectivity check for health reporting
    async fn ping(&self) -> StoreResult<()>;
}

/// Result type for SettlementStore operations
pub type StoreResult<T> = std::result::Result<T, SettlementError>;
