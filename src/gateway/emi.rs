use crate::config::EmiConfig;
use crate::domain::money::Money;
use crate::error::{Result, SettlementError};
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmiQuote {
    pub principal: Money,
    pub months: u32,
    pub interest_rate: Decimal,
    pub total_interest: Money,
    pub total_amount: Money,
    pub monthly_amount: Money,
}

/// Installment quotes for amounts at or above the configured threshold.
#[derive(Debug, Clone, Default)]
pub struct EmiCalculator {
    config: EmiConfig,
}

impl EmiCalculator {
    pub fn new(config: EmiConfig) -> Self {
        Self { config }
    }

    pub fn threshold(&self) -> Money {
        Money::new(self.config.threshold).unwrap_or_default()
    }

    pub fn is_eligible(&self, amount: Money) -> bool {
        amount.value() >= self.config.threshold
    }

    pub fn quote(&self, amount: Money, months: u32) -> Result<EmiQuote> {
        if !self.is_eligible(amount) {
            return Err(SettlementError::Validation(format!(
                "EMI not available for amounts below {}",
                self.threshold()
            )));
        }
        let tenor = self
            .config
            .tenors
            .iter()
            .find(|t| t.months == months)
            .ok_or_else(|| {
                SettlementError::Validation(format!("No EMI plan for {} months", months))
            })?;

        let total_interest = amount.checked_scale(tenor.interest_percent, Decimal::ONE_HUNDRED)?;
        let total_amount = amount.checked_add(total_interest)?;
        let monthly_amount = total_amount.checked_scale(Decimal::ONE, Decimal::from(tenor.months))?;

        Ok(EmiQuote {
            principal: amount,
            months,
            interest_rate: tenor.interest_percent,
            total_interest,
            total_amount,
            monthly_amount,
        })
    }

    /// Every plan on offer for `amount`; empty below the threshold.
    pub fn options(&self, amount: Money) -> Vec<EmiQuote> {
        self.config
            .tenors
            .iter()
            .filter_map(|tenor| self.quote(amount, tenor.months).ok())
            .collect()
    }
}
