use crate::error::SettlementError;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Sub;
use std::str::FromStr;

/// Number of decimal places every persisted monetary value carries.
pub const MONEY_SCALE: u32 = 2;

/// Rounds to two decimal places, ties away from zero (half-up for the
/// non-negative values this crate handles).
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// A non-negative monetary value, at most [`Money::MAX`].
///
/// Wraps `rust_decimal::Decimal` so fee, tax and settlement arithmetic cannot
/// accidentally mix in negative amounts or unrounded intermediates. Sums go
/// through [`Money::checked_add`], which keeps every result inside the bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Self = Self(Decimal::from_parts(0, 0, 0, false, MONEY_SCALE));

    /// 10^20, eight orders of magnitude below `Decimal::MAX`.
    pub const MAX: Decimal = Decimal::from_parts(1_661_992_960, 1_808_227_885, 5, false, 0);

    pub fn new(value: Decimal) -> Result<Self, SettlementError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(SettlementError::Validation(
                "Amount must not be negative".to_string(),
            ));
        }
        if value > Self::MAX {
            return Err(out_of_range());
        }
        let mut value = round_money(value);
        value.rescale(MONEY_SCALE);
        Ok(Self(value))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Value in the currency's minor unit (paise, cents), as providers expect.
    pub fn to_minor_units(&self) -> Result<i64, SettlementError> {
        (self.0 * Decimal::ONE_HUNDRED)
            .round()
            .to_i64()
            .ok_or_else(|| SettlementError::Validation("Amount out of range".to_string()))
    }

    pub fn checked_add(self, rhs: Self) -> Result<Self, SettlementError> {
        self.0
            .checked_add(rhs.0)
            .ok_or_else(out_of_range)
            .and_then(Self::new)
    }

    /// `self * rate / divisor`, rounded to two places.
    pub fn checked_scale(self, rate: Decimal, divisor: Decimal) -> Result<Self, SettlementError> {
        self.0
            .checked_mul(rate)
            .and_then(|product| product.checked_div(divisor))
            .ok_or_else(out_of_range)
            .and_then(|value| Self::new(round_money(value)))
    }

    /// Difference clamped at zero.
    pub fn saturating_sub(self, rhs: Self) -> Self {
        if rhs.0 >= self.0 {
            Self::ZERO
        } else {
            Self(self.0 - rhs.0)
        }
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::ZERO
    }
}

impl TryFrom<Decimal> for Money {
    type Error = SettlementError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Money> for Decimal {
    fn from(money: Money) -> Self {
        money.0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

// Signed on purpose: settlement maths may go below zero and is validated by the caller.
impl Sub for Money {
    type Output = Decimal;
    fn sub(self, rhs: Self) -> Self::Output {
        self.0 - rhs.0
    }
}

fn out_of_range() -> SettlementError {
    SettlementError::Validation(format!("Amount must not exceed {}", Money::MAX))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Eur,
    Gbp,
    #[default]
    Inr,
    Cad,
    Aud,
}

impl Currency {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Usd => "USD",
            Self::Eur => "EUR",
            Self::Gbp => "GBP",
            Self::Inr => "INR",
            Self::Cad => "CAD",
            Self::Aud => "AUD",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = SettlementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "USD" => Ok(Self::Usd),
            "EUR" => Ok(Self::Eur),
            "GBP" => Ok(Self::Gbp),
            "INR" => Ok(Self::Inr),
            "CAD" => Ok(Self::Cad),
            "AUD" => Ok(Self::Aud),
            other => Err(SettlementError::Validation(format!(
                "Unsupported currency: {}",
                other
            ))),
        }
    }
}
