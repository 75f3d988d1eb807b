//! Business rules checked before an instruction may settle

use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::types::SettlementInstruction;

/// A currency the ledger settles in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrencyRule {
    pub code: String,
    /// Maximum number of fractional digits an amount may carry
    pub decimals: u32,
}

impl CurrencyRule {
    pub fn new(code: impl Into<String>, decimals: u32) -> Self {
        Self {
            code: code.into().to_uppercase(),
            decimals,
        }
    }
}

/// Rules applied on the `Pending -> Validated` and `Validated -> Settled` edges
#[derive(Debug, Clone)]
pub struct SettlementRules {
    currencies: HashMap<String, CurrencyRule>,
    max_amount: Option<Decimal>,
}

impl SettlementRules {
    pub fn new(currencies: impl IntoIterator<Item = CurrencyRule>) -> Self {
        Self {
            currencies: currencies
                .into_iter()
                .map(|rule| (rule.code.clone(), rule))
                .collect(),
            max_amount: None,
        }
    }

    /// Cap the gross amount of a single instruction
    pub fn with_max_amount(mut self, max_amount: Decimal) -> Self {
        self.max_amount = Some(max_amount);
        self
    }

    pub fn is_known_currency(&self, code: &str) -> bool {
        self.currencies.contains_key(&code.to_uppercase())
    }

    /// Check an instruction, returning the rejection reason on failure
    pub fn check(&self, instruction: &SettlementInstruction) -> Result<(), String> {
        if instruction.amount <= Decimal::ZERO {
            return Err(format!("amount must be positive, got {}", instruction.amount));
        }

        let rule = self
            .currencies
            .get(&instruction.currency.to_uppercase())
            .ok_or_else(|| format!("unknown currency {}", instruction.currency))?;

        if instruction.amount.normalize().scale() > rule.decimals {
            return Err(format!(
                "amount {} has more than {} decimal places allowed for {}",
                instruction.amount, rule.decimals, rule.code
            ));
        }

        if let Some(max) = self.max_amount {
            if instruction.amount > max {
                return Err(format!("amount {} exceeds limit {}", instruction.amount, max));
            }
        }

        if same_party(&instruction.buyer, &instruction.seller) {
            return Err("buyer and seller must be different counterparties".to_string());
        }

        Ok(())
    }
}

impl Default for SettlementRules {
    fn default() -> Self {
        Self::new([
            CurrencyRule::new("USD", 2),
            CurrencyRule::new("EUR", 2),
            CurrencyRule::new("GBP", 2),
            CurrencyRule::new("JPY", 0),
            CurrencyRule::new("USDT", 6),
        ])
    }
}

fn same_party(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}
