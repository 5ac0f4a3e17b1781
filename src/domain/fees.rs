//! Fee, tax and settlement arithmetic.
//!
//! Everything here is pure: no I/O, no clocks, only the rate tables handed in
//! through [`FeeConfig`] and [`TaxConfig`]. All results are rounded to two
//! decimal places, half-up, per line item.

use crate::config::{FeeConfig, SettlementConfig, TaxConfig};
use crate::domain::money::Money;
use crate::domain::transaction::TransactionKind;
use crate::error::{Result, SettlementError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TaxBreakdown {
    /// Percentage, e.g. `18` for 18%.
    pub rate: Decimal,
    pub amount: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeeBreakdown {
    pub platform_fee: Money,
    pub gateway_fee: Money,
}

/// Everything derived from a base amount when a transaction is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementQuote {
    pub base_amount: Money,
    pub tax_rate: Decimal,
    pub tax_amount: Money,
    pub platform_fee: Money,
    pub gateway_fee: Money,
    pub ngo_donation: Money,
    /// What the buyer is charged: base amount plus tax.
    pub total_amount: Money,
    pub net_to_seller: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LineItem {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub category: String,
    #[serde(default)]
    pub kind: TransactionKind,
    pub amount: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineQuote {
    pub item_id: String,
    pub category: String,
    pub base_amount: Money,
    pub tax_rate: Decimal,
    pub tax_amount: Money,
    pub platform_fee: Money,
    pub gateway_fee: Money,
    pub total_amount: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total_base_amount: Money,
    pub total_tax_amount: Money,
    pub total_platform_fee: Money,
    pub total_gateway_fee: Money,
    pub total_amount: Money,
    pub item_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchQuote {
    pub item_breakdown: Vec<LineQuote>,
    pub summary: BatchSummary,
}

#[derive(Debug, Clone, Default)]
pub struct FeeTaxCalculator {
    fees: FeeConfig,
    tax: TaxConfig,
}

fn normalize_category(category: &str) -> String {
    category.trim().to_lowercase().replace([' ', '-'], "_")
}

fn percent_of(amount: Money, percent: Decimal) -> Result<Money> {
    amount.checked_scale(percent, Decimal::ONE_HUNDRED)
}

fn fraction_of(amount: Money, rate: Decimal) -> Result<Money> {
    amount.checked_scale(rate, Decimal::ONE)
}

/// Donations and swaps carry no platform or gateway fee.
fn fees_waived(kind: TransactionKind) -> bool {
    matches!(kind, TransactionKind::Donation | TransactionKind::Exchange)
}

const NO_FEES: FeeBreakdown = FeeBreakdown {
    platform_fee: Money::ZERO,
    gateway_fee: Money::ZERO,
};

impl FeeTaxCalculator {
    pub fn new(fees: FeeConfig, tax: TaxConfig) -> Self {
        Self { fees, tax }
    }

    pub fn from_config(config: &SettlementConfig) -> Self {
        Self::new(config.fees.clone(), config.tax.clone())
    }

    /// Percentage rate for a category; donations and zero-rated categories are exempt.
    pub fn tax_rate(&self, category: &str, kind: TransactionKind) -> Decimal {
        if kind == TransactionKind::Donation {
            return Decimal::ZERO;
        }
        let category = normalize_category(category);
        if self.tax.zero_rated.contains(&category) {
            return Decimal::ZERO;
        }
        self.tax
            .rates
            .get(&category)
            .copied()
            .unwrap_or(self.tax.default_rate)
    }

    pub fn compute_tax(
        &self,
        amount: Money,
        category: &str,
        kind: TransactionKind,
    ) -> Result<TaxBreakdown> {
        let rate = self.tax_rate(category, kind);
        Ok(TaxBreakdown {
            rate,
            amount: percent_of(amount, rate)?,
        })
    }

    pub fn compute_fees(&self, amount: Money) -> Result<FeeBreakdown> {
        Ok(FeeBreakdown {
            platform_fee: fraction_of(amount, self.fees.platform_fee_rate)?,
            gateway_fee: fraction_of(amount, self.fees.gateway_fee_rate)?,
        })
    }

    /// Seller proceeds. Tax is collected separately and never reaches the seller.
    pub fn compute_net_settlement(
        amount: Money,
        _tax_amount: Money,
        platform_fee: Money,
        gateway_fee: Money,
        ngo_donation: Money,
    ) -> Decimal {
        amount.value() - platform_fee.value() - gateway_fee.value() - ngo_donation.value()
    }

    /// Full breakdown for a new transaction.
    ///
    /// Donations route the whole amount to the NGO with fees waived; swaps are
    /// fee-free too. Other kinds
    /// may pledge part of the proceeds (`ngo_pledge`) as long as the seller's net
    /// does not go negative.
    pub fn quote(
        &self,
        amount: Money,
        category: &str,
        kind: TransactionKind,
        ngo_pledge: Money,
    ) -> Result<SettlementQuote> {
        let tax = self.compute_tax(amount, category, kind)?;

        let fees = if fees_waived(kind) {
            NO_FEES
        } else {
            self.compute_fees(amount)?
        };
        let ngo_donation = match kind {
            TransactionKind::Donation => amount,
            _ => ngo_pledge,
        };

        let net_to_seller = Self::compute_net_settlement(
            amount,
            tax.amount,
            fees.platform_fee,
            fees.gateway_fee,
            ngo_donation,
        );
        if net_to_seller < Decimal::ZERO {
            return Err(SettlementError::Validation(format!(
                "NGO donation {} exceeds seller proceeds",
                ngo_donation
            )));
        }

        Ok(SettlementQuote {
            base_amount: amount,
            tax_rate: tax.rate,
            tax_amount: tax.amount,
            platform_fee: fees.platform_fee,
            gateway_fee: fees.gateway_fee,
            ngo_donation,
            total_amount: amount.checked_add(tax.amount)?,
            net_to_seller,
        })
    }

    pub fn quote_line(&self, line: &LineItem) -> Result<LineQuote> {
        let tax = self.compute_tax(line.amount, &line.category, line.kind)?;
        let fees = if fees_waived(line.kind) {
            NO_FEES
        } else {
            self.compute_fees(line.amount)?
        };
        Ok(LineQuote {
            item_id: line.id.clone(),
            category: line.category.clone(),
            base_amount: line.amount,
            tax_rate: tax.rate,
            tax_amount: tax.amount,
            platform_fee: fees.platform_fee,
            gateway_fee: fees.gateway_fee,
            total_amount: line.amount.checked_add(tax.amount)?,
        })
    }

    /// Quotes each line independently and sums the rounded results.
    pub fn quote_batch(&self, lines: &[LineItem]) -> Result<BatchQuote> {
        let item_breakdown = lines
            .iter()
            .map(|l| self.quote_line(l))
            .collect::<Result<Vec<_>>>()?;

        let mut summary = BatchSummary::default();
        for line in &item_breakdown {
            summary.total_base_amount = summary.total_base_amount.checked_add(line.base_amount)?;
            summary.total_tax_amount = summary.total_tax_amount.checked_add(line.tax_amount)?;
            summary.total_platform_fee = summary.total_platform_fee.checked_add(line.platform_fee)?;
            summary.total_gateway_fee = summary.total_gateway_fee.checked_add(line.gateway_fee)?;
            summary.total_amount = summary.total_amount.checked_add(line.total_amount)?;
            summary.item_count += 1;
        }

        Ok(BatchQuote {
            item_breakdown,
            summary,
        })
    }
}
