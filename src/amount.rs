//! A single quantity of one commodity.

use compact_str::CompactString;
use rust_decimal::Decimal;
use std::fmt;
use std::ops::Neg;

/// An exact decimal quantity paired with an optional commodity symbol.
///
/// Amounts with no commodity behave as plain numbers. Arithmetic across
/// commodities is not defined on `Amount` itself; multi-commodity sums
/// are accumulated through [`Balance`](crate::balance::Balance).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Amount {
    quantity: Decimal,
    commodity: Option<CompactString>,
}

impl Amount {
    /// Creates a commodity-less amount.
    pub fn new(quantity: Decimal) -> Self {
        Amount {
            quantity,
            commodity: None,
        }
    }

    /// Creates an amount denominated in `commodity`.
    pub fn with_commodity(quantity: Decimal, commodity: impl Into<CompactString>) -> Self {
        Amount {
            quantity,
            commodity: Some(commodity.into()),
        }
    }

    /// The numeric quantity.
    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    /// The commodity symbol, if any.
    pub fn commodity(&self) -> Option<&str> {
        self.commodity.as_deref()
    }

    /// True when the quantity is exactly zero.
    pub fn is_zero(&self) -> bool {
        self.quantity.is_zero()
    }

    /// Returns this amount with the quantity sign flipped.
    pub fn negated(&self) -> Amount {
        Amount {
            quantity: -self.quantity,
            commodity: self.commodity.clone(),
        }
    }
}

impl Neg for Amount {
    type Output = Amount;

    fn neg(self) -> Amount {
        Amount {
            quantity: -self.quantity,
            commodity: self.commodity,
        }
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.commodity {
            Some(symbol) => write!(f, "{} {}", symbol, self.quantity),
            None => write!(f, "{}", self.quantity),
        }
    }
}
