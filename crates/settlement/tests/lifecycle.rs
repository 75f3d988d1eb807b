//! End-to-end engine behaviour against the in-memory store

mod common;

use assert_matches::assert_matches;
use async_trait::async_trait;
use common::*;
use futures::future::join_all;
use rust_decimal::Decimal;
use settlement::{
    EncryptionKey, FieldCodec, InMemorySettlementStore, ListFilter, SettlementError, SettlementId,
    SettlementInstruction, SettlementStatus, SettlementStore,
};
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[tokio::test]
async fn test_scenario_s1_settle_replay_conflict() {
    let h = harness();
    let desk = subject("desk-1");

    let first = h
        .engine
        .submit(submit_request("S1", "A", "B", "100.00"), &desk)
        .await
        .unwrap();
    assert_eq!(first.status, SettlementStatus::Settled);
    assert!(!first.replayed);

    let replay = h
        .engine
        .submit(submit_request("S1", "A", "B", "100.00"), &desk)
        .await
        .unwrap();
    assert_eq!(replay.status, SettlementStatus::Settled);
    assert!(replay.replayed);
    assert_eq!(h.store.len().unwrap(), 1);

    let before = h.store.get(&first.id).await.unwrap().unwrap();
    let conflict = h
        .engine
        .submit(submit_request("S1", "A", "B", "-5.00"), &desk)
        .await;
    assert_matches!(conflict, Err(SettlementError::IdempotencyConflict(id)) if id == "S1");

    let after = h.store.get(&first.id).await.unwrap().unwrap();
    assert_eq!(after.version, before.version);
    assert_eq!(after.amount, Decimal::from_str("100.00").unwrap());
    assert_eq!(after.status, SettlementStatus::Settled);
}

#[tokio::test]
async fn test_status_after_submit_is_terminal() {
    let h = harness();
    let desk = subject("desk-1");

    let settled = h
        .engine
        .submit(submit_request("S1", "A", "B", "10.00"), &desk)
        .await
        .unwrap();
    let failed = h
        .engine
        .submit(submit_request("S2", "A", "A", "10.00"), &desk)
        .await
        .unwrap();

    for id in [settled.id, failed.id] {
        let status = h.engine.get_status(&id).await.unwrap();
        assert!(status.status.is_terminal(), "{} is {}", id, status.status);
    }
}

#[tokio::test]
async fn test_scale_and_currency_rules() {
    let h = harness();
    let desk = subject("desk-1");

    let too_precise = h
        .engine
        .submit(submit_request("S1", "A", "B", "1.005"), &desk)
        .await
        .unwrap();
    assert_eq!(too_precise.status, SettlementStatus::Failed);

    let mut unknown = submit_request("S2", "A", "B", "1.00");
    unknown.currency = "XAU".into();
    let unknown = h.engine.submit(unknown, &desk).await.unwrap();
    assert_eq!(unknown.status, SettlementStatus::Failed);
    assert!(unknown.reason.unwrap().contains("XAU"));

    // Trailing zeros beyond the currency scale are not extra precision
    let padded = h
        .engine
        .submit(submit_request("S3", "A", "B", "1.5000"), &desk)
        .await
        .unwrap();
    assert_eq!(padded.status, SettlementStatus::Settled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submissions_apply_once() {
    let h = harness();

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let engine = h.engine.clone();
            tokio::spawn(async move {
                engine
                    .submit(submit_request("RACE-1", "A", "B", "250.00"), &subject("desk-1"))
                    .await
            })
        })
        .collect();

    let outcomes: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert_eq!(h.store.len().unwrap(), 1);
    assert_eq!(outcomes.iter().filter(|o| !o.replayed).count(), 1);
    assert!(outcomes.iter().all(|o| o.status == SettlementStatus::Settled));

    let stored = h.store.get(&SettlementId::parse("RACE-1").unwrap()).await.unwrap().unwrap();
    assert_eq!(stored.version, 3);
}

#[tokio::test]
async fn test_reversal_links_and_keeps_original() {
    let h = harness();
    let desk = subject("desk-1");

    let original = h
        .engine
        .submit(submit_request("S1", "A", "B", "100.00"), &desk)
        .await
        .unwrap();

    let reversal = h.engine.reverse(&original.id, "trade busted", &desk).await.unwrap();
    assert_eq!(reversal.id.as_str(), "S1.rev");
    assert_eq!(reversal.reverses, original.id);
    assert!(!reversal.replayed);

    let view = h.engine.get(&reversal.id).await.unwrap();
    assert_eq!(view.status, SettlementStatus::Reversed);
    assert_eq!(view.buyer, "B");
    assert_eq!(view.seller, "A");
    assert_eq!(view.reverses, Some(original.id.clone()));
    assert_eq!(view.reason.as_deref(), Some("trade busted"));

    let status = h.engine.get_status(&original.id).await.unwrap();
    assert_eq!(status.status, SettlementStatus::Settled);

    // Details follow the swapped counterparties and open under the new id
    let details = h.engine.get_details(&reversal.id, &desk).await.unwrap();
    assert_eq!(details.buyer_account, "ACC-B");
    assert_eq!(details.seller_account, "ACC-A");

    let again = h.engine.reverse(&original.id, "trade busted", &desk).await.unwrap();
    assert!(again.replayed);
    assert_eq!(again.id, reversal.id);
    assert_eq!(h.store.len().unwrap(), 2);
}

#[tokio::test]
async fn test_reverse_requires_settled() {
    let h = harness();
    let desk = subject("desk-1");

    let failed = h
        .engine
        .submit(submit_request("S1", "A", "B", "0.00"), &desk)
        .await
        .unwrap();
    assert_eq!(failed.status, SettlementStatus::Failed);

    assert_matches!(
        h.engine.reverse(&failed.id, "oops", &desk).await,
        Err(SettlementError::NotSettled { status: SettlementStatus::Failed, .. })
    );
    assert_matches!(
        h.engine
            .reverse(&SettlementId::parse("missing").unwrap(), "oops", &desk)
            .await,
        Err(SettlementError::NotFound(_))
    );

    let settled = h
        .engine
        .submit(submit_request("S2", "A", "B", "5.00"), &desk)
        .await
        .unwrap();
    let reversal = h.engine.reverse(&settled.id, "dup", &desk).await.unwrap();

    // A reversal record is itself not reversible
    assert_matches!(
        h.engine.reverse(&reversal.id, "again", &desk).await,
        Err(SettlementError::NotSettled { status: SettlementStatus::Reversed, .. })
    );
}

#[tokio::test]
async fn test_reverse_is_restricted_to_involved_subjects() {
    let h = harness();
    let original = h
        .engine
        .submit(submit_request("S1", "A", "B", "1.00"), &subject("desk-1"))
        .await
        .unwrap();

    assert_matches!(
        h.engine.reverse(&original.id, "not mine", &subject("mallory")).await,
        Err(SettlementError::Forbidden(_))
    );
    assert!(h.engine.reverse(&original.id, "counterparty", &subject("B")).await.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reversals_create_one_record() {
    let h = harness();
    let desk = subject("desk-1");
    let original = h
        .engine
        .submit(submit_request("S1", "A", "B", "75.00"), &desk)
        .await
        .unwrap();

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let engine = h.engine.clone();
            let id = original.id.clone();
            tokio::spawn(async move { engine.reverse(&id, "busted", &subject("desk-1")).await })
        })
        .collect();

    let outcomes: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert_eq!(outcomes.iter().filter(|o| !o.replayed).count(), 1);
    assert!(outcomes.iter().all(|o| o.id.as_str() == "S1.rev"));
    assert_eq!(h.store.len().unwrap(), 2);
}

#[tokio::test]
async fn test_net_obligations_cancel_after_reversal() {
    let h = harness();
    let desk = subject("desk-1");

    h.engine.submit(submit_request("S1", "A", "B", "100.00"), &desk).await.unwrap();
    h.engine.submit(submit_request("S2", "B", "C", "30.00"), &desk).await.unwrap();
    h.engine.submit(submit_request("S3", "A", "C", "0"), &desk).await.unwrap();

    let positions = h.engine.net_obligations("usd").await.unwrap();
    let total: Decimal = positions.iter().map(|p| p.net).sum();
    assert_eq!(total, Decimal::ZERO);

    let a = positions.iter().find(|p| p.party == "A").unwrap();
    assert_eq!(a.net, Decimal::from_str("-100.00").unwrap());
    let c = positions.iter().find(|p| p.party == "C").unwrap();
    assert_eq!(c.net, Decimal::from_str("30.00").unwrap());

    h.engine
        .reverse(&SettlementId::parse("S1").unwrap(), "busted", &desk)
        .await
        .unwrap();

    let positions = h.engine.net_obligations("USD").await.unwrap();
    let a = positions.iter().find(|p| p.party == "A").unwrap();
    assert_eq!(a.net, Decimal::ZERO);
    let b = positions.iter().find(|p| p.party == "B").unwrap();
    assert_eq!(b.net, Decimal::from_str("-30.00").unwrap());
}

#[tokio::test]
async fn test_list_by_status_and_party() {
    let h = harness();
    let desk = subject("desk-1");

    h.engine.submit(submit_request("S1", "A", "B", "1.00"), &desk).await.unwrap();
    h.engine.submit(submit_request("S2", "C", "D", "1.00"), &desk).await.unwrap();
    h.engine.submit(submit_request("S3", "A", "A", "1.00"), &desk).await.unwrap();

    let failed = h
        .engine
        .list(ListFilter {
            status: Some(SettlementStatus::Failed),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id.as_str(), "S3");

    let with_a = h
        .engine
        .list(ListFilter {
            party: Some("A".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(with_a.len(), 2);
}

#[tokio::test]
async fn test_tampered_payload_is_detected() {
    let h = harness();
    let desk = subject("desk-1");
    let outcome = h
        .engine
        .submit(submit_request("S1", "A", "B", "10.00"), &desk)
        .await
        .unwrap();
    let stored = h.store.get(&outcome.id).await.unwrap().unwrap();

    // Flipped ciphertext bit
    let mut flipped = stored.clone();
    flipped.id = SettlementId::parse("S1").unwrap();
    flipped.payload.ciphertext[0] ^= 0x01;

    // Valid payload copied onto a different record
    let mut copied = stored.clone();
    copied.id = SettlementId::parse("S2").unwrap();

    let other = Arc::new(InMemorySettlementStore::new());
    other.insert(flipped).await.unwrap();
    other.insert(copied).await.unwrap();
    let engine = engine_over(other, h.codec.clone());

    assert_matches!(
        engine.get_details(&outcome.id, &desk).await,
        Err(SettlementError::Decryption(_))
    );
    assert_matches!(
        engine.get_details(&SettlementId::parse("S2").unwrap(), &desk).await,
        Err(SettlementError::Decryption(_))
    );

    // Same record under a different master key
    let rekeyed = engine_over(h.store.clone(), Arc::new(FieldCodec::new(&EncryptionKey::generate())));
    assert_matches!(
        rekeyed.get_details(&outcome.id, &desk).await,
        Err(SettlementError::Decryption(_))
    );
}

#[tokio::test]
async fn test_payload_never_holds_plaintext() {
    let h = harness();
    let outcome = h
        .engine
        .submit(submit_request("S1", "A", "B", "10.00"), &subject("desk-1"))
        .await
        .unwrap();
    let stored = h.store.get(&outcome.id).await.unwrap().unwrap();

    let bytes = stored.payload.to_bytes();
    let needle = b"ACC-A";
    assert!(!bytes.windows(needle.len()).any(|w| w == needle));
}

/// Store that reports itself unreachable for the first few calls
struct FlakyStore {
    inner: InMemorySettlementStore,
    failures_left: AtomicU32,
}

impl FlakyStore {
    fn new(failures: u32) -> Self {
        Self {
            inner: InMemorySettlementStore::new(),
            failures_left: AtomicU32::new(failures),
        }
    }

    fn trip(&self) -> Result<(), SettlementError> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(SettlementError::PersistenceUnavailable("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SettlementStore for FlakyStore {
    async fn init_schema(&self) -> Result<(), SettlementError> {
        self.trip()?;
        self.inner.init_schema().await
    }

    async fn insert(&self, instruction: SettlementInstruction) -> Result<SettlementInstruction, SettlementError> {
        self.trip()?;
        self.inner.insert(instruction).await
    }

    async fn update(
        &self,
        instruction: &SettlementInstruction,
        expected_version: i64,
    ) -> Result<SettlementInstruction, SettlementError> {
        self.trip()?;
        self.inner.update(instruction, expected_version).await
    }

    async fn insert_linked(&self, reversal: SettlementInstruction) -> Result<SettlementInstruction, SettlementError> {
        self.trip()?;
        self.inner.insert_linked(reversal).await
    }

    async fn get(&self, id: &SettlementId) -> Result<Option<SettlementInstruction>, SettlementError> {
        self.trip()?;
        self.inner.get(id).await
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<SettlementInstruction>, SettlementError> {
        self.trip()?;
        self.inner.list(filter).await
    }

    async fn list_in_flight(&self) -> Result<Vec<SettlementInstruction>, SettlementError> {
        self.trip()?;
        self.inner.list_in_flight().await
    }

    async fn list_by_status(
        &self,
        statuses: &[SettlementStatus],
        currency: &str,
    ) -> Result<Vec<SettlementInstruction>, SettlementError> {
        self.trip()?;
        self.inner.list_by_status(statuses, currency).await
    }

    async fn ping(&self) -> Result<(), SettlementError> {
        self.trip()
    }
}

#[tokio::test]
async fn test_transient_store_failures_are_retried() {
    let store = Arc::new(FlakyStore::new(2));
    let engine = engine_over(store.clone(), Arc::new(FieldCodec::new(&EncryptionKey::generate())));

    let outcome = engine
        .submit(submit_request("S1", "A", "B", "10.00"), &subject("desk-1"))
        .await
        .unwrap();
    assert_eq!(outcome.status, SettlementStatus::Settled);
}

#[tokio::test]
async fn test_resume_fails_fast_when_store_is_down() {
    let store = Arc::new(FlakyStore::new(100));
    let engine = engine_over(store, Arc::new(FieldCodec::new(&EncryptionKey::generate())));

    assert_matches!(
        engine.resume_in_flight().await,
        Err(SettlementError::PersistenceUnavailable(_))
    );
}
