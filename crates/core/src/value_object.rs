//! Value object trait: equality by value, not identity.
//!
//! Value objects are domain objects that have **no identity** - they are defined entirely
//! by their attribute values. Two value objects with the same values are considered equal.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**. To "modify" one,
/// create a new one with the new values.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}

/// An amount of money as a whole number of currency units.
///
/// This is the same integer the HTTP API accepts in `amount` and returns in
/// `balance`, and the number timeline summaries print.
///
/// Balances may go through zero but never below it under correct operation;
/// the type itself allows negative values so that projections can represent
/// whatever the event history says without panicking.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl ValueObject for Money {}

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn new(units: i64) -> Self {
        Self(units)
    }

    /// A strictly positive amount, as required for deposits and withdrawals.
    pub fn positive(units: i64) -> Result<Self, DomainError> {
        if units <= 0 {
            return Err(DomainError::validation("amount must be greater than zero"));
        }
        Ok(Self(units))
    }

    pub fn units(self) -> i64 {
        self.0
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    pub fn saturating_add(self, other: Money) -> Money {
        Money(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(self, other: Money) -> Money {
        Money(self.0.saturating_sub(other.0))
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn positive_rejects_zero_and_negative_amounts() {
        assert!(Money::positive(0).is_err());
        assert!(Money::positive(-5).is_err());
        assert_eq!(Money::positive(5).unwrap().units(), 5);
    }

    #[test]
    fn display_prints_the_plain_unit_count() {
        assert_eq!(Money::new(60).to_string(), "60");
        assert_eq!(Money::new(-150).to_string(), "-150");
        assert_eq!(serde_json::to_string(&Money::new(100)).unwrap(), "100");
    }

    #[test]
    fn checked_add_reports_overflow() {
        assert_eq!(Money::new(1).checked_add(Money::new(2)), Some(Money::new(3)));
        assert_eq!(Money::new(i64::MAX).checked_add(Money::new(1)), None);
    }

    proptest! {
        #[test]
        fn deposit_then_withdraw_restores_balance(a in -1_000_000_000i64..1_000_000_000, b in 1i64..1_000_000_000) {
            let a = Money::new(a);
            let b = Money::new(b);
            prop_assert_eq!(a.saturating_add(b).saturating_sub(b), a);
        }
    }
}
