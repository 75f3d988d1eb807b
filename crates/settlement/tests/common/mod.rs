//! Shared fixtures for settlement integration tests

#![allow(dead_code)]

use rust_decimal::Decimal;
use settlement::{
    EncryptionKey, FieldCodec, InMemorySettlementStore, RetryPolicy, SensitiveDetails, SettlementEngine,
    SettlementId, SettlementRules, SettlementStore, Subject, SubmitRequest,
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub struct Harness {
    pub store: Arc<InMemorySettlementStore>,
    pub codec: Arc<FieldCodec>,
    pub engine: Arc<SettlementEngine>,
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        backoff_multiplier: 2.0,
        jitter_factor: 0.0,
    }
}

pub fn harness() -> Harness {
    let store = Arc::new(InMemorySettlementStore::new());
    let codec = Arc::new(FieldCodec::new(&EncryptionKey::generate()));
    let engine = engine_over(store.clone(), codec.clone());
    Harness { store, codec, engine }
}

pub fn engine_over(store: Arc<dyn SettlementStore>, codec: Arc<FieldCodec>) -> Arc<SettlementEngine> {
    Arc::new(SettlementEngine::new(store, codec, SettlementRules::default()).with_retry(fast_retry()))
}

pub fn subject(name: &str) -> Subject {
    Subject::new(name).unwrap()
}

pub fn submit_request(id: &str, buyer: &str, seller: &str, amount: &str) -> SubmitRequest {
    SubmitRequest {
        id: Some(SettlementId::parse(id).unwrap()),
        buyer: buyer.into(),
        seller: seller.into(),
        instrument: "CASH".into(),
        amount: Decimal::from_str(amount).unwrap(),
        currency: "USD".into(),
        requested_at: None,
        details: SensitiveDetails {
            buyer_account: format!("ACC-{}", buyer),
            seller_account: format!("ACC-{}", seller),
            routing_code: Some("ROUTE-1".into()),
            memo: None,
        },
    }
}
