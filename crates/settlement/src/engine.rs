//! Settlement Engine - instruction lifecycle and exactly-once application

use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn, Span};

use observability::{SettlementMetrics, SubmitMetricsGuard, SubmitOutcomeLabel};

use crate::codec::FieldCodec;
use crate::error::{Result, SettlementError};
use crate::netting::{net_positions, NetPosition};
use crate::retry::RetryPolicy;
use crate::store::traits::SettlementStore;
use crate::types::{
    ListFilter, ReversalOutcome, SensitiveDetails, SettlementId, SettlementInstruction, SettlementStatus,
    SettlementView, StatusView, Subject, SubmitOutcome, SubmitRequest,
};
use crate::validation::SettlementRules;

/// Upper bound on re-reads after lost compare-and-swap writes for one call
const MAX_CAS_ATTEMPTS: u32 = 16;

/// Longest accepted reversal reason, in characters
pub const MAX_REASON_LEN: usize = 512;

/// Page size used when a list request does not set one
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Largest page a list request may ask for
pub const MAX_PAGE_SIZE: u32 = 500;

/// Counts from a startup recovery pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumeSummary {
    pub scanned: usize,
    pub settled: usize,
    pub failed: usize,
    pub errors: usize,
}

/// Settlement Engine - drives instructions through their lifecycle
pub struct SettlementEngine {
    store: Arc<dyn SettlementStore>,
    codec: Arc<FieldCodec>,
    rules: SettlementRules,
    retry: RetryPolicy,
    metrics: SettlementMetrics,
}

impl SettlementEngine {
    /// Create a new SettlementEngine
    pub fn new(store: Arc<dyn SettlementStore>, codec: Arc<FieldCodec>, rules: SettlementRules) -> Self {
        Self {
            store,
            codec,
            rules,
            retry: RetryPolicy::default(),
            metrics: SettlementMetrics::new("settlement"),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_metrics(mut self, metrics: SettlementMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn store(&self) -> &Arc<dyn SettlementStore> {
        &self.store
    }

    /// Submit an instruction
    ///
    /// Flow:
    /// 1. Fingerprint the content under its identifier
    /// 2. If the identifier exists: same content replays, different content conflicts
    /// 3. Otherwise seal the details and insert as `Pending`
    /// 4. Drive `Pending -> Validated -> Settled`, or to `Failed`
    ///
    /// A lost insert race re-reads the winner and goes back to step 2.
    #[instrument(skip_all, fields(settlement_id = tracing::field::Empty, subject = %subject))]
    pub async fn submit(&self, request: SubmitRequest, subject: &Subject) -> Result<SubmitOutcome> {
        let mut guard = SubmitMetricsGuard::new(&self.metrics);
        let result = self.submit_inner(request, subject).await;

        guard.set_outcome(match &result {
            Ok(outcome) if outcome.replayed => SubmitOutcomeLabel::Replayed,
            Ok(outcome) if outcome.status == SettlementStatus::Settled => SubmitOutcomeLabel::Settled,
            Ok(_) => SubmitOutcomeLabel::Failed,
            Err(SettlementError::Validation(_)) | Err(SettlementError::IdempotencyConflict(_)) => {
                SubmitOutcomeLabel::Rejected
            }
            Err(_) => SubmitOutcomeLabel::Error,
        });

        if let Err(e) = &result {
            warn!(operation = "submit", code = e.code(), error = %e, "Submission failed");
        }
        result
    }

    async fn submit_inner(&self, request: SubmitRequest, subject: &Subject) -> Result<SubmitOutcome> {
        let id = request.id.clone().unwrap_or_else(SettlementId::generate);
        Span::current().record("settlement_id", id.as_str());

        // Step 1: content identity
        let fingerprint = request.fingerprint(&id)?;
        let content_hash = self.codec.content_hash(&fingerprint);

        for _ in 0..MAX_CAS_ATTEMPTS {
            // Step 2: replay or conflict
            if let Some(existing) = self.load(&id).await? {
                if existing.content_hash != content_hash {
                    return Err(SettlementError::IdempotencyConflict(id.to_string()));
                }
                debug!(status = %existing.status, "Replaying existing settlement");
                let record = self.drive(existing).await?;
                return Ok(SubmitOutcome::from_record(&record, true));
            }

            // Step 3: create
            let payload = self.codec.seal_details(&request.details, &id)?;
            let pending = SettlementInstruction::pending(id.clone(), &request, payload, content_hash.clone(), subject);

            match self
                .retry
                .run("insert", id.as_str(), || self.store.insert(pending.clone()))
                .await
            {
                Ok(record) => {
                    info!(
                        amount = %record.amount,
                        currency = %record.currency,
                        "Settlement recorded"
                    );
                    // Step 4: drive to a terminal state
                    let record = self.drive(record).await?;
                    return Ok(SubmitOutcome::from_record(&record, false));
                }
                Err(SettlementError::Conflict { .. }) => {
                    self.metrics.record_conflict();
                    debug!("Lost insert race, re-reading winner");
                }
                Err(e) => return Err(e),
            }
        }

        Err(SettlementError::Internal(format!(
            "settlement {} did not converge after {} attempts",
            id, MAX_CAS_ATTEMPTS
        )))
    }

    /// Move a record forward until it is terminal
    ///
    /// Each step is one conditional write. When another writer got there
    /// first the record is re-read and driving continues from its state.
    async fn drive(&self, mut record: SettlementInstruction) -> Result<SettlementInstruction> {
        let mut attempts = 0;

        while record.status.is_in_flight() {
            attempts += 1;
            if attempts > MAX_CAS_ATTEMPTS * 2 {
                return Err(SettlementError::Internal(format!(
                    "settlement {} stuck in {}",
                    record.id, record.status
                )));
            }

            let next = self.next_step(&record)?;
            let expected = record.version;

            match self
                .retry
                .run("update", record.id.as_str(), || self.store.update(&next, expected))
                .await
            {
                Ok(committed) => {
                    match committed.status {
                        SettlementStatus::Failed => warn!(
                            settlement_id = %committed.id,
                            from = %record.status,
                            reason = committed.reason.as_deref().unwrap_or_default(),
                            "Settlement failed"
                        ),
                        _ => info!(
                            settlement_id = %committed.id,
                            from = %record.status,
                            to = %committed.status,
                            version = committed.version,
                            "Settlement transitioned"
                        ),
                    }
                    record = committed;
                }
                Err(SettlementError::Conflict { .. }) | Err(SettlementError::InvalidTransition { .. }) => {
                    self.metrics.record_conflict();
                    debug!(settlement_id = %record.id, "Lost transition race, re-reading");
                    record = self
                        .load(&record.id)
                        .await?
                        .ok_or_else(|| SettlementError::NotFound(record.id.to_string()))?;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(record)
    }

    fn next_step(&self, record: &SettlementInstruction) -> Result<SettlementInstruction> {
        match (record.status, self.rules.check(record)) {
            (SettlementStatus::Pending, Ok(())) => record.transitioned(SettlementStatus::Validated, None),
            (SettlementStatus::Pending, Err(reason)) => record.transitioned(SettlementStatus::Failed, Some(reason)),
            (SettlementStatus::Validated, Ok(())) => record.transitioned(SettlementStatus::Settled, None),
            (SettlementStatus::Validated, Err(reason)) => {
                record.transitioned(SettlementStatus::Failed, Some(format!("commit rejected: {}", reason)))
            }
            (status, _) => Err(SettlementError::InvalidTransition {
                id: record.id.to_string(),
                from: status,
                to: status,
            }),
        }
    }

    async fn load(&self, id: &SettlementId) -> Result<Option<SettlementInstruction>> {
        self.retry.run("get", id.as_str(), || self.store.get(id)).await
    }

    async fn require(&self, id: &SettlementId) -> Result<SettlementInstruction> {
        self.load(id)
            .await?
            .ok_or_else(|| SettlementError::NotFound(id.to_string()))
    }

    /// Current status of an instruction
    pub async fn get_status(&self, id: &SettlementId) -> Result<StatusView> {
        Ok(StatusView::from(&self.require(id).await?))
    }

    /// Non-sensitive view of an instruction
    pub async fn get(&self, id: &SettlementId) -> Result<SettlementView> {
        Ok(SettlementView::from(&self.require(id).await?))
    }

    /// List instructions, newest first
    ///
    /// A zero limit means [`DEFAULT_PAGE_SIZE`]; larger limits are capped at
    /// [`MAX_PAGE_SIZE`].
    pub async fn list(&self, mut filter: ListFilter) -> Result<Vec<SettlementView>> {
        filter.limit = match filter.limit {
            0 => DEFAULT_PAGE_SIZE,
            n => n.min(MAX_PAGE_SIZE),
        };
        let records = self.retry.run("list", "*", || self.store.list(&filter)).await?;
        Ok(records.iter().map(SettlementView::from).collect())
    }

    /// Decrypt the sensitive fields of an instruction for an involved subject
    #[instrument(skip_all, fields(settlement_id = %id, subject = %subject))]
    pub async fn get_details(&self, id: &SettlementId, subject: &Subject) -> Result<SensitiveDetails> {
        let record = self.require(id).await?;
        if !record.involves(subject) {
            warn!(operation = "get_details", "Subject is not party to settlement");
            return Err(SettlementError::Forbidden(format!(
                "subject may not read details of settlement {}",
                id
            )));
        }

        self.codec.open_details(&record.payload, &record.id).map_err(|e| {
            error!(operation = "get_details", "Stored payload failed authentication");
            SettlementError::from(e)
        })
    }

    /// Reverse a settled instruction with a linked compensating record
    ///
    /// The original keeps its `Settled` status. Repeating the call returns the
    /// existing reversal.
    #[instrument(skip_all, fields(settlement_id = %id, subject = %subject))]
    pub async fn reverse(&self, id: &SettlementId, reason: &str, subject: &Subject) -> Result<ReversalOutcome> {
        let original = self.require(id).await?;

        if !original.involves(subject) {
            return Err(SettlementError::Forbidden(format!(
                "subject may not reverse settlement {}",
                id
            )));
        }

        let reason = reason.trim();
        if reason.is_empty() {
            return Err(SettlementError::Validation("reversal reason is required".to_string()));
        }
        if reason.chars().count() > MAX_REASON_LEN {
            return Err(SettlementError::Validation(format!(
                "reversal reason exceeds {} characters",
                MAX_REASON_LEN
            )));
        }

        if original.status != SettlementStatus::Settled {
            return Err(SettlementError::NotSettled {
                id: id.to_string(),
                status: original.status,
            });
        }

        let reversal_id = id.reversal();
        if let Some(existing) = self.load(&reversal_id).await? {
            return linked_reversal(existing, id);
        }

        let details = self.codec.open_details(&original.payload, &original.id).map_err(|e| {
            error!(operation = "reverse", "Stored payload failed authentication");
            SettlementError::from(e)
        })?;
        let mirrored = details.mirrored();
        drop(details);

        let content_hash = self.codec.content_hash(&original.reversal_fingerprint(&mirrored)?);
        let payload = self.codec.seal_details(&mirrored, &reversal_id)?;
        let reversal = original.reversal(payload, content_hash, subject, reason.to_string());

        match self
            .retry
            .run("insert_linked", reversal_id.as_str(), || self.store.insert_linked(reversal.clone()))
            .await
        {
            Ok(record) => {
                self.metrics.record_reversal();
                info!(reversal_id = %record.id, "Settlement reversed");
                Ok(ReversalOutcome {
                    id: record.id,
                    reverses: id.clone(),
                    replayed: false,
                })
            }
            Err(SettlementError::Conflict { .. }) => {
                self.metrics.record_conflict();
                debug!("Lost reversal race, re-reading winner");
                linked_reversal(self.require(&reversal_id).await?, id)
            }
            Err(e) => Err(e),
        }
    }

    /// Net settled obligations per counterparty in one currency
    pub async fn net_obligations(&self, currency: &str) -> Result<Vec<NetPosition>> {
        let currency = currency.trim().to_uppercase();
        if currency.is_empty() {
            return Err(SettlementError::Validation("currency is required".to_string()));
        }

        let statuses = [SettlementStatus::Settled, SettlementStatus::Reversed];
        let records = self
            .retry
            .run("list_by_status", "*", || self.store.list_by_status(&statuses, &currency))
            .await?;

        Ok(net_positions(&currency, &records))
    }

    /// Drive every in-flight instruction to a terminal state
    ///
    /// Run once at startup before the listener is bound. An unreachable store
    /// aborts the pass; any other per-record failure is logged and skipped.
    #[instrument(skip(self))]
    pub async fn resume_in_flight(&self) -> Result<ResumeSummary> {
        let in_flight = self
            .retry
            .run("list_in_flight", "*", || self.store.list_in_flight())
            .await?;

        let mut summary = ResumeSummary {
            scanned: in_flight.len(),
            ..Default::default()
        };

        for record in in_flight {
            let id = record.id.clone();
            match self.drive(record).await {
                Ok(done) if done.status == SettlementStatus::Settled => summary.settled += 1,
                Ok(_) => summary.failed += 1,
                Err(e) if e.is_transient() => return Err(e),
                Err(e) => {
                    error!(settlement_id = %id, operation = "resume", error = %e, "Failed to resume settlement");
                    summary.errors += 1;
                }
            }
        }

        if summary.scanned > 0 {
            info!(
                scanned = summary.scanned,
                settled = summary.settled,
                failed = summary.failed,
                errors = summary.errors,
                "Resumed in-flight settlements"
            );
        }
        Ok(summary)
    }

    /// Store connectivity check
    pub async fn ping(&self) -> Result<()> {
        self.store.ping().await
    }
}

fn linked_reversal(existing: SettlementInstruction, original: &SettlementId) -> Result<ReversalOutcome> {
    match existing.reverses {
        Some(ref target) if target == original => Ok(ReversalOutcome {
            id: existing.id,
            reverses: original.clone(),
            replayed: true,
        }),
        _ => Err(SettlementError::IdempotencyConflict(existing.id.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::EncryptionKey;
    use crate::store::memory::InMemorySettlementStore;
    use crate::validation::CurrencyRule;
    use assert_matches::assert_matches;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn engine_with(store: Arc<InMemorySettlementStore>, rules: SettlementRules) -> SettlementEngine {
        let codec = Arc::new(FieldCodec::new(&EncryptionKey::generate()));
        SettlementEngine::new(store, codec, rules).with_retry(RetryPolicy::none())
    }

    fn request(id: &str, amount: &str) -> SubmitRequest {
        SubmitRequest {
            id: Some(SettlementId::parse(id).unwrap()),
            buyer: "A".into(),
            seller: "B".into(),
            instrument: "CASH".into(),
            amount: Decimal::from_str(amount).unwrap(),
            currency: "USD".into(),
            requested_at: None,
            details: SensitiveDetails {
                buyer_account: "ACC-A".into(),
                seller_account: "ACC-B".into(),
                routing_code: None,
                memo: None,
            },
        }
    }

    fn desk() -> Subject {
        Subject::new("desk-1").unwrap()
    }

    #[tokio::test]
    async fn test_submit_settles_valid_instruction() {
        let store = Arc::new(InMemorySettlementStore::new());
        let engine = engine_with(store.clone(), SettlementRules::default());

        let outcome = engine.submit(request("S1", "100.00"), &desk()).await.unwrap();
        assert_eq!(outcome.status, SettlementStatus::Settled);
        assert!(!outcome.replayed);

        let stored = store.get(&outcome.id).await.unwrap().unwrap();
        assert_eq!(stored.version, 3);
        assert_eq!(stored.submitted_by, "desk-1");
    }

    #[tokio::test]
    async fn test_submit_fails_business_validation() {
        let store = Arc::new(InMemorySettlementStore::new());
        let engine = engine_with(store, SettlementRules::default());

        let outcome = engine.submit(request("S1", "0"), &desk()).await.unwrap();
        assert_eq!(outcome.status, SettlementStatus::Failed);
        assert!(outcome.reason.unwrap().contains("positive"));
    }

    #[tokio::test]
    async fn test_generated_id_when_absent() {
        let store = Arc::new(InMemorySettlementStore::new());
        let engine = engine_with(store, SettlementRules::default());

        let mut req = request("S1", "1.00");
        req.id = None;
        let outcome = engine.submit(req, &desk()).await.unwrap();
        assert_eq!(outcome.id.as_str().len(), 36);
    }

    #[tokio::test]
    async fn test_replay_resumes_in_flight_record() {
        let store = Arc::new(InMemorySettlementStore::new());
        let engine = engine_with(store.clone(), SettlementRules::default());
        let req = request("S1", "100.00");

        // Simulate a crash right after the insert
        let id = req.id.clone().unwrap();
        let hash = engine.codec.content_hash(&req.fingerprint(&id).unwrap());
        let payload = engine.codec.seal_details(&req.details, &id).unwrap();
        store
            .insert(SettlementInstruction::pending(id.clone(), &req, payload, hash, &desk()))
            .await
            .unwrap();

        let outcome = engine.submit(req, &desk()).await.unwrap();
        assert!(outcome.replayed);
        assert_eq!(outcome.status, SettlementStatus::Settled);
    }

    #[tokio::test]
    async fn test_commit_rejected_after_rules_change() {
        let store = Arc::new(InMemorySettlementStore::new());
        let engine = engine_with(store.clone(), SettlementRules::default());

        let outcome = engine.submit(request("S1", "50.00"), &desk()).await.unwrap();
        assert_eq!(outcome.status, SettlementStatus::Settled);

        // A validated record left behind by a previous process
        let mut validated = store.get(&outcome.id).await.unwrap().unwrap();
        validated.id = SettlementId::parse("S2").unwrap();
        validated.status = SettlementStatus::Validated;
        validated.version = 2;
        store.insert(validated).await.unwrap();

        let strict = engine_with(
            store.clone(),
            SettlementRules::new([CurrencyRule::new("USD", 2)]).with_max_amount(Decimal::from(10)),
        );
        let summary = strict.resume_in_flight().await.unwrap();
        assert_eq!(summary, ResumeSummary { scanned: 1, settled: 0, failed: 1, errors: 0 });

        let failed = store.get(&SettlementId::parse("S2").unwrap()).await.unwrap().unwrap();
        assert_eq!(failed.status, SettlementStatus::Failed);
        assert!(failed.reason.unwrap().starts_with("commit rejected"));
    }

    #[tokio::test]
    async fn test_get_details_requires_involvement() {
        let store = Arc::new(InMemorySettlementStore::new());
        let engine = engine_with(store, SettlementRules::default());
        let outcome = engine.submit(request("S1", "10.00"), &desk()).await.unwrap();

        let details = engine.get_details(&outcome.id, &desk()).await.unwrap();
        assert_eq!(details.buyer_account, "ACC-A");

        let buyer = Subject::new("A").unwrap();
        assert!(engine.get_details(&outcome.id, &buyer).await.is_ok());

        let stranger = Subject::new("mallory").unwrap();
        assert_matches!(
            engine.get_details(&outcome.id, &stranger).await,
            Err(SettlementError::Forbidden(_))
        );
    }

    #[tokio::test]
    async fn test_reverse_validates_reason() {
        let store = Arc::new(InMemorySettlementStore::new());
        let engine = engine_with(store, SettlementRules::default());
        let outcome = engine.submit(request("S1", "10.00"), &desk()).await.unwrap();

        assert_matches!(
            engine.reverse(&outcome.id, "   ", &desk()).await,
            Err(SettlementError::Validation(_))
        );
        assert_matches!(
            engine.reverse(&outcome.id, &"x".repeat(MAX_REASON_LEN + 1), &desk()).await,
            Err(SettlementError::Validation(_))
        );
    }

    #[tokio::test]
    async fn test_list_clamps_limit() {
        let store = Arc::new(InMemorySettlementStore::new());
        let engine = engine_with(store, SettlementRules::default());
        for i in 0..3 {
            engine.submit(request(&format!("S{}", i), "1.00"), &desk()).await.unwrap();
        }

        let all = engine.list(ListFilter::default()).await.unwrap();
        assert_eq!(all.len(), 3);

        let capped = engine
            .list(ListFilter { limit: 10_000, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(capped.len(), 3);
    }

    #[tokio::test]
    async fn test_net_obligations_rejects_blank_currency() {
        let store = Arc::new(InMemorySettlementStore::new());
        let engine = engine_with(store, SettlementRules::default());
        assert_matches!(engine.net_obligations(" ").await, Err(SettlementError::Validation(_)));
    }
}
