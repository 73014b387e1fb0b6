//! Multi-commodity running totals.

use crate::amount::Amount;
use compact_str::CompactString;
use rust_decimal::Decimal;
use std::fmt;
use std::ops::AddAssign;

/// Map key used for amounts that carry no commodity symbol.
const NO_COMMODITY: &str = "";

/// A sum of amounts, kept separately per commodity.
///
/// Entries whose quantity reaches zero are dropped, so two balances
/// built from different posting orders compare equal. Iteration is in
/// commodity order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Balance {
    amounts: std::collections::BTreeMap<CompactString, Decimal>,
}

impl Balance {
    /// Creates an empty balance.
    pub fn new() -> Self {
        Balance::default()
    }

    /// Creates a balance holding a single amount.
    pub fn from_amount(amount: &Amount) -> Self {
        let mut balance = Balance::new();
        balance.add_amount(amount);
        balance
    }

    /// Adds one amount into the per-commodity totals.
    pub fn add_amount(&mut self, amount: &Amount) {
        let key = amount.commodity().unwrap_or(NO_COMMODITY);
        let total = self.amounts.entry(CompactString::from(key)).or_default();
        *total += amount.quantity();
        if total.is_zero() {
            self.amounts.remove(key);
        }
    }

    /// True when the balance holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.amounts.is_empty()
    }

    /// True when every commodity sums to zero.
    pub fn is_zero(&self) -> bool {
        self.amounts.values().all(Decimal::is_zero)
    }

    /// Number of commodities with a nonzero total.
    pub fn commodity_count(&self) -> usize {
        self.amounts.len()
    }

    /// Total for one commodity. Use `""` for commodity-less amounts.
    pub fn amount_for(&self, commodity: &str) -> Option<Decimal> {
        self.amounts.get(commodity).copied()
    }

    /// Iterates totals in commodity order.
    pub fn amounts(&self) -> impl Iterator<Item = (&str, Decimal)> {
        self.amounts.iter().map(|(symbol, qty)| (symbol.as_str(), *qty))
    }

    /// Returns the balance with every quantity's sign flipped.
    pub fn negated(&self) -> Balance {
        Balance {
            amounts: self
                .amounts
                .iter()
                .map(|(symbol, qty)| (symbol.clone(), -*qty))
                .collect(),
        }
    }
}

impl AddAssign<&Balance> for Balance {
    fn add_assign(&mut self, other: &Balance) {
        for (symbol, qty) in &other.amounts {
            let total = self.amounts.entry(symbol.clone()).or_default();
            *total += qty;
            if total.is_zero() {
                self.amounts.remove(symbol.as_str());
            }
        }
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.amounts.is_empty() {
            return write!(f, "0");
        }
        let mut first = true;
        for (symbol, qty) in &self.amounts {
            if !first {
                write!(f, ", ")?;
            }
            if symbol.is_empty() {
                write!(f, "{qty}")?;
            } else {
                write!(f, "{symbol} {qty}")?;
            }
            first = false;
        }
        Ok(())
    }
}
