//! Net obligations per counterparty
//!
//! Every settled instruction moves `amount` from buyer to seller. Reversal
//! records carry the counterparties swapped, so netting them with the same
//! rule cancels the original.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{SettlementInstruction, SettlementStatus};

/// Net position of one counterparty in one currency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetPosition {
    pub party: String,
    pub currency: String,
    /// Positive: net receivable. Negative: net payable.
    pub net: Decimal,
    pub gross_payable: Decimal,
    pub gross_receivable: Decimal,
    pub instruction_count: u64,
}

impl NetPosition {
    fn empty(party: &str, currency: &str) -> Self {
        Self {
            party: party.to_string(),
            currency: currency.to_string(),
            net: Decimal::ZERO,
            gross_payable: Decimal::ZERO,
            gross_receivable: Decimal::ZERO,
            instruction_count: 0,
        }
    }
}

/// Net the given records for `currency`, ordered by party
///
/// Only `Settled` and `Reversed` records count; anything else is ignored.
pub fn net_positions<'a>(
    currency: &str,
    records: impl IntoIterator<Item = &'a SettlementInstruction>,
) -> Vec<NetPosition> {
    let mut positions: BTreeMap<String, NetPosition> = BTreeMap::new();

    for record in records {
        if !matches!(record.status, SettlementStatus::Settled | SettlementStatus::Reversed) {
            continue;
        }
        if !record.currency.eq_ignore_ascii_case(currency) {
            continue;
        }

        let payer = positions
            .entry(record.buyer.clone())
            .or_insert_with(|| NetPosition::empty(&record.buyer, currency));
        payer.net -= record.amount;
        payer.gross_payable += record.amount;
        payer.instruction_count += 1;

        let payee = positions
            .entry(record.seller.clone())
            .or_insert_with(|| NetPosition::empty(&record.seller, currency));
        payee.net += record.amount;
        payee.gross_receivable += record.amount;
        payee.instruction_count += 1;
    }

    positions.into_values().collect()
}
