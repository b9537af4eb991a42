use {
    super::error::PaymentError,
    derive_more::Display,
    rust_decimal::{Decimal, prelude::ToPrimitive},
    serde::{Deserialize, Serialize},
};

/// A strictly positive amount in the service's single currency, with at
/// most two fractional digits. Always carried at scale 2 ("12.50").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct MoneyAmount(Decimal);

impl MoneyAmount {
    pub const CURRENCY: &'static str = "USD";

    pub fn new(value: Decimal) -> Result<Self, PaymentError> {
        if value <= Decimal::ZERO {
            return Err(PaymentError::Validation(format!(
                "amount must be positive, got: {value}"
            )));
        }
        let mut value = value.normalize();
        if value.scale() > 2 {
            return Err(PaymentError::Validation(format!(
                "amount has more than two decimal places: {value}"
            )));
        }
        value.rescale(2);
        Ok(Self(value))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Amount in cents, as most gateways expect it.
    pub fn minor_units(&self) -> Result<i64, PaymentError> {
        (self.0 * Decimal::ONE_HUNDRED)
            .to_i64()
            .ok_or_else(|| PaymentError::Validation(format!("amount out of range: {}", self.0)))
    }
}

impl TryFrom<Decimal> for MoneyAmount {
    type Error = PaymentError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<MoneyAmount> for Decimal {
    fn from(amount: MoneyAmount) -> Self {
        amount.0
    }
}

/// Inclusive bounds a new payment's amount must fall within.
#[derive(Debug, Clone, Copy)]
pub struct AmountLimits {
    pub min: Decimal,
    pub max: Decimal,
}

impl Default for AmountLimits {
    fn default() -> Self {
        Self {
            min: Decimal::new(50, 2),
            max: Decimal::new(1_000_000, 2),
        }
    }
}

impl AmountLimits {
    pub fn check(&self, amount: MoneyAmount) -> Result<(), PaymentError> {
        if amount.value() < self.min {
            return Err(PaymentError::Validation(format!(
                "payment amount is below minimum: {}",
                self.min
            )));
        }
        if amount.value() > self.max {
            return Err(PaymentError::Validation(format!(
                "payment amount exceeds maximum: {}",
                self.max
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn amount_is_rescaled_to_cents() {
        let amount = MoneyAmount::new(dec!(12.5)).unwrap();
        assert_eq!(amount.to_string(), "12.50");
        assert_eq!(amount.minor_units().unwrap(), 1250);
    }

    #[test]
    fn trailing_zeros_beyond_cents_are_accepted() {
        let amount = MoneyAmount::new(dec!(3.1000)).unwrap();
        assert_eq!(amount.to_string(), "3.10");
    }

    #[test]
    fn zero_and_negative_amounts_are_rejected() {
        assert!(MoneyAmount::new(Decimal::ZERO).is_err());
        assert!(MoneyAmount::new(dec!(-1.00)).is_err());
    }

    #[test]
    fn sub_cent_precision_is_rejected() {
        assert!(MoneyAmount::new(dec!(1.005)).is_err());
    }

    #[test]
    fn amount_serializes_as_string() {
        let amount = MoneyAmount::new(dec!(12.50)).unwrap();
        assert_eq!(serde_json::to_value(amount).unwrap(), serde_json::json!("12.50"));
        let parsed: MoneyAmount = serde_json::from_value(serde_json::json!("12.5")).unwrap();
        assert_eq!(parsed, amount);
    }

    #[test]
    fn limits_bound_both_sides() {
        let limits = AmountLimits::default();
        assert!(limits.check(MoneyAmount::new(dec!(0.49)).unwrap()).is_err());
        assert!(limits.check(MoneyAmount::new(dec!(0.50)).unwrap()).is_ok());
        assert!(limits.check(MoneyAmount::new(dec!(10000.00)).unwrap()).is_ok());
        assert!(limits.check(MoneyAmount::new(dec!(10000.01)).unwrap()).is_err());
    }
}
