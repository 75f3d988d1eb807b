//! In-memory settlement store implementation

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::SettlementError;
use crate::store::traits::{SettlementStore, StoreResult};
use crate::types::{ListFilter, SettlementId, SettlementInstruction, SettlementStatus};

/// In-memory settlement store for testing and development
///
/// Each conditional write takes the write lock for the duration of one
/// compare-and-swap; the lock is never held across an `.await`.
pub struct InMemorySettlementStore {
    records: RwLock<HashMap<SettlementId, SettlementInstruction>>,
}

impl InMemorySettlementStore {
    /// Create a new in-memory settlement store
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored records
    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.read()?.is_empty())
    }

    fn read(
        &self,
    ) -> StoreResult<std::sync::RwLockReadGuard<'_, HashMap<SettlementId, SettlementInstruction>>> {
        self.records
            .read()
            .map_err(|_| SettlementError::Storage("settlement map lock poisoned".into()))
    }

    fn write(
        &self,
    ) -> StoreResult<std::sync::RwLockWriteGuard<'_, HashMap<SettlementId, SettlementInstruction>>> {
        self.records
            .write()
            .map_err(|_| SettlementError::Storage("settlement map lock poisoned".into()))
    }
}

impl Default for InMemorySettlementStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SettlementStore for InMemorySettlementStore {
    async fn init_schema(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn insert(&self, instruction: SettlementInstruction) -> StoreResult<SettlementInstruction> {
        let mut records = self.write()?;
        if records.contains_key(&instruction.id) {
            return Err(SettlementError::Conflict {
                id: instruction.id.to_string(),
                expected: 0,
            });
        }
        records.insert(instruction.id.clone(), instruction.clone());
        Ok(instruction)
    }

    async fn update(
        &self,
        instruction: &SettlementInstruction,
        expected_version: i64,
    ) -> StoreResult<SettlementInstruction> {
        let mut records = self.write()?;
        let stored = records
            .get_mut(&instruction.id)
            .ok_or_else(|| SettlementError::NotFound(instruction.id.to_string()))?;

        if stored.version != expected_version {
            return Err(SettlementError::Conflict {
                id: instruction.id.to_string(),
                expected: expected_version,
            });
        }
        if !stored.status.can_transition_to(instruction.status) {
            return Err(SettlementError::InvalidTransition {
                id: instruction.id.to_string(),
                from: stored.status,
                to: instruction.status,
            });
        }

        stored.status = instruction.status;
        stored.reason = instruction.reason.clone();
        stored.payload = instruction.payload.clone();
        stored.version = instruction.version;
        stored.updated_at = instruction.updated_at;
        Ok(stored.clone())
    }

    async fn insert_linked(&self, reversal: SettlementInstruction) -> StoreResult<SettlementInstruction> {
        let original_id = reversal
            .reverses
            .clone()
            .ok_or_else(|| SettlementError::Internal("reversal record without link".into()))?;

        let mut records = self.write()?;
        let original = records
            .get(&original_id)
            .ok_or_else(|| SettlementError::NotFound(original_id.to_string()))?;
        if original.status != SettlementStatus::Settled {
            return Err(SettlementError::NotSettled {
                id: original_id.to_string(),
                status: original.status,
            });
        }
        if records.contains_key(&reversal.id) {
            return Err(SettlementError::Conflict {
                id: reversal.id.to_string(),
                expected: 0,
            });
        }

        records.insert(reversal.id.clone(), reversal.clone());
        Ok(reversal)
    }

    async fn get(&self, id: &SettlementId) -> StoreResult<Option<SettlementInstruction>> {
        Ok(self.read()?.get(id).cloned())
    }

    async fn list(&self, filter: &ListFilter) -> StoreResult<Vec<SettlementInstruction>> {
        let records = self.read()?;
        let mut matched: Vec<SettlementInstruction> = records
            .values()
            .filter(|r| filter.status.map_or(true, |s| r.status == s))
            .filter(|r| {
                filter
                    .currency
                    .as_deref()
                    .map_or(true, |c| r.currency.eq_ignore_ascii_case(c))
            })
            .filter(|r| {
                filter
                    .party
                    .as_deref()
                    .map_or(true, |p| r.buyer == p || r.seller == p)
            })
            .cloned()
            .collect();

        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

        Ok(matched
            .into_iter()
            .skip(filter.offset as usize)
            .take(filter.limit as usize)
            .collect())
    }

    async fn list_in_flight(&self) -> StoreResult<Vec<SettlementInstruction>> {
        let records = self.read()?;
        let mut in_flight: Vec<SettlementInstruction> = records
            .values()
            .filter(|r| r.status.is_in_flight())
            .cloned()
            .collect();
        in_flight.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(in_flight)
    }

    async fn list_by_status(
        &self,
        statuses: &[SettlementStatus],
        currency: &str,
    ) -> StoreResult<Vec<SettlementInstruction>> {
        let records = self.read()?;
        Ok(records
            .values()
            .filter(|r| statuses.contains(&r.status) && r.currency.eq_ignore_ascii_case(currency))
            .cloned()
            .collect())
    }

    async fn ping(&self) -> StoreResult<()> {
        self.read().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::EncryptedPayload;
    use assert_matches::assert_matches;
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn create_test_instruction(id: &str) -> SettlementInstruction {
        let now = Utc::now();
        SettlementInstruction {
            id: SettlementId::parse(id).unwrap(),
            buyer: "A".into(),
            seller: "B".into(),
            instrument: "CASH".into(),
            amount: Decimal::new(10000, 2),
            currency: "USD".into(),
            requested_at: now,
            status: SettlementStatus::Pending,
            payload: EncryptedPayload {
                nonce: [1u8; 12],
                ciphertext: vec![2u8; 32],
            },
            content_hash: "hash".into(),
            version: 1,
            submitted_by: "desk-1".into(),
            reverses: None,
            reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = InMemorySettlementStore::new();
        let instruction = create_test_instruction("S1");

        store.insert(instruction.clone()).await.unwrap();

        let retrieved = store.get(&instruction.id).await.unwrap().unwrap();
        assert_eq!(retrieved.status, SettlementStatus::Pending);
        assert_eq!(retrieved.version, 1);
        assert!(store.get(&SettlementId::parse("S2").unwrap()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_poisoned_lock_is_a_storage_error() {
        let store = std::sync::Arc::new(InMemorySettlementStore::new());
        let poisoner = store.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.records.write().unwrap();
            panic!("writer died holding the lock");
        })
        .join();

        assert_matches!(store.ping().await, Err(SettlementError::Storage(_)));
        assert_matches!(
            store.insert(create_test_instruction("S1")).await,
            Err(SettlementError::Storage(_))
        );
    }

    #[tokio::test]
    async fn test_duplicate_insert_conflicts() {
        let store = InMemorySettlementStore::new();
        store.insert(create_test_instruction("S1")).await.unwrap();

        let result = store.insert(create_test_instruction("S1")).await;
        assert_matches!(result, Err(SettlementError::Conflict { expected: 0, .. }));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_is_compare_and_swap() {
        let store = InMemorySettlementStore::new();
        let pending = store.insert(create_test_instruction("S1")).await.unwrap();

        let validated = pending.transitioned(SettlementStatus::Validated, None).unwrap();
        let committed = store.update(&validated, 1).await.unwrap();
        assert_eq!(committed.version, 2);

        // A second writer that read version 1 loses
        let stale = pending.transitioned(SettlementStatus::Failed, Some("late".into())).unwrap();
        assert_matches!(store.update(&stale, 1).await, Err(SettlementError::Conflict { expected: 1, .. }));

        let stored = store.get(&pending.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SettlementStatus::Validated);
        assert_eq!(stored.reason, None);
    }

    #[tokio::test]
    async fn test_update_rejects_regression() {
        let store = InMemorySettlementStore::new();
        let mut settled = create_test_instruction("S1");
        settled.status = SettlementStatus::Settled;
        store.insert(settled.clone()).await.unwrap();

        let mut regressed = settled.clone();
        regressed.status = SettlementStatus::Pending;
        regressed.version = 2;

        assert_matches!(
            store.update(&regressed, 1).await,
            Err(SettlementError::InvalidTransition { from: SettlementStatus::Settled, .. })
        );
    }

    #[tokio::test]
    async fn test_update_missing_record() {
        let store = InMemorySettlementStore::new();
        let instruction = create_test_instruction("S1");
        let next = instruction.transitioned(SettlementStatus::Validated, None).unwrap();
        assert_matches!(store.update(&next, 1).await, Err(SettlementError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_insert_linked_requires_settled_original() {
        let store = InMemorySettlementStore::new();
        let original = store.insert(create_test_instruction("S1")).await.unwrap();

        let mut reversal = create_test_instruction("R1");
        reversal.status = SettlementStatus::Reversed;
        reversal.reverses = Some(original.id.clone());

        assert_matches!(
            store.insert_linked(reversal.clone()).await,
            Err(SettlementError::NotSettled { status: SettlementStatus::Pending, .. })
        );

        let validated = original.transitioned(SettlementStatus::Validated, None).unwrap();
        let validated = store.update(&validated, 1).await.unwrap();
        let settled = validated.transitioned(SettlementStatus::Settled, None).unwrap();
        store.update(&settled, 2).await.unwrap();

        store.insert_linked(reversal.clone()).await.unwrap();
        assert_matches!(
            store.insert_linked(reversal).await,
            Err(SettlementError::Conflict { .. })
        );
    }

    #[tokio::test]
    async fn test_list_filters_and_paginates() {
        let store = InMemorySettlementStore::new();

        for i in 0..5 {
            let mut instruction = create_test_instruction(&format!("S{}", i));
            if i % 2 == 0 {
                instruction.currency = "EUR".into();
            }
            instruction.seller = format!("seller-{}", i);
            store.insert(instruction).await.unwrap();
        }

        let all = store
            .list(&ListFilter { limit: 10, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(all.len(), 5);

        let eur = store
            .list(&ListFilter {
                currency: Some("eur".into()),
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(eur.len(), 3);

        let party = store
            .list(&ListFilter {
                party: Some("seller-3".into()),
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(party.len(), 1);

        let page = store
            .list(&ListFilter { limit: 2, offset: 4, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
    }

    #[tokio::test]
    async fn test_list_in_flight() {
        let store = InMemorySettlementStore::new();
        store.insert(create_test_instruction("S1")).await.unwrap();

        let mut settled = create_test_instruction("S2");
        settled.status = SettlementStatus::Settled;
        store.insert(settled).await.unwrap();

        let mut validated = create_test_instruction("S3");
        validated.status = SettlementStatus::Validated;
        store.insert(validated).await.unwrap();

        let in_flight = store.list_in_flight().await.unwrap();
        assert_eq!(in_flight.len(), 2);
        assert!(in_flight.iter().all(|r| r.status.is_in_flight()));
    }
}
