//! Runtime configuration for the settlement core.
//!
//! Every rate the core applies (fees, tax brackets, EMI tenors, scoring
//! weights) lives here and is injected into the component that needs it at
//! construction time. Sections default independently, so a config file only
//! has to mention what it overrides.

use crate::error::{Result, SettlementError};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    pub fees: FeeConfig,
    pub tax: TaxConfig,
    pub emi: EmiConfig,
    pub scoring: ScoringConfig,
    pub gateway: GatewayConfig,
    pub server: ServerConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeeConfig {
    /// Fraction of the base amount kept by the platform.
    pub platform_fee_rate: Decimal,
    /// Fraction of the base amount charged by the payment processor.
    pub gateway_fee_rate: Decimal,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            platform_fee_rate: dec!(0.05),
            gateway_fee_rate: dec!(0.02),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TaxConfig {
    /// Category -> percentage rate.
    pub rates: BTreeMap<String, Decimal>,
    /// Categories that always yield a zero rate.
    pub zero_rated: BTreeSet<String>,
    /// Percentage used for categories missing from `rates`.
    pub default_rate: Decimal,
}

impl Default for TaxConfig {
    fn default() -> Self {
        let tiers: [(Decimal, &[&str]); 4] = [
            (
                dec!(5),
                &["medicines", "food_items", "educational_books", "agricultural_products"],
            ),
            (
                dec!(12),
                &["clothing", "footwear", "home_textiles", "kitchen_utensils", "furniture_wooden", "home"],
            ),
            (
                dec!(18),
                &[
                    "electronics",
                    "furniture",
                    "sports_equipment",
                    "sports",
                    "beauty_products",
                    "home_appliances",
                    "stationery",
                    "toys",
                    "musical_instruments",
                    "camera_equipment",
                    "computer_accessories",
                    "mobile_accessories",
                ],
            ),
            (
                dec!(28),
                &["automotive", "luxury_items", "tobacco", "alcohol", "cosmetics_luxury", "jewelry"],
            ),
        ];

        let mut rates = BTreeMap::new();
        for (rate, categories) in tiers {
            for category in categories {
                rates.insert((*category).to_string(), rate);
            }
        }

        let zero_rated = ["books", "newspapers", "milk", "fresh_vegetables", "fresh_fruits"]
            .into_iter()
            .map(String::from)
            .collect();

        Self {
            rates,
            zero_rated,
            default_rate: dec!(18),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct EmiTenor {
    pub months: u32,
    /// Flat interest over the whole tenor, in percent of the principal.
    pub interest_percent: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmiConfig {
    /// Smallest principal for which installment plans are offered.
    pub threshold: Decimal,
    pub tenors: Vec<EmiTenor>,
}

impl Default for EmiConfig {
    fn default() -> Self {
        Self {
            threshold: dec!(5000),
            tenors: vec![
                EmiTenor { months: 3, interest_percent: dec!(0) },
                EmiTenor { months: 6, interest_percent: dec!(0) },
                EmiTenor { months: 9, interest_percent: dec!(2) },
                EmiTenor { months: 12, interest_percent: dec!(3) },
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ActionPoints {
    pub sale: u32,
    pub purchase: u32,
    pub donation: u32,
    pub exchange: u32,
    pub rental: u32,
}

impl Default for ActionPoints {
    fn default() -> Self {
        Self {
            sale: 20,
            purchase: 5,
            donation: 50,
            exchange: 15,
            rental: 8,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub points: ActionPoints,
    pub first_time_multiplier: Decimal,
    pub streak_multiplier: Decimal,
    pub eco_friendly_multiplier: Decimal,
    pub verified_multiplier: Decimal,
    /// Consecutive active days needed for the streak multiplier.
    pub streak_days: u32,
    pub eco_friendly_categories: BTreeSet<String>,
    pub donation_bonus: u32,
    pub exchange_bonus: u32,
    /// Upper bound on points awarded for a single action.
    pub max_points: u32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            points: ActionPoints::default(),
            first_time_multiplier: dec!(2),
            streak_multiplier: dec!(1.5),
            eco_friendly_multiplier: dec!(1.2),
            verified_multiplier: dec!(1.1),
            streak_days: 7,
            eco_friendly_categories: ["electronics", "clothing", "furniture", "books"]
                .into_iter()
                .map(String::from)
                .collect(),
            donation_bonus: 25,
            exchange_bonus: 10,
            max_points: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RazorpayConfig {
    pub key_id: String,
    pub key_secret: String,
    pub webhook_secret: String,
    #[serde(default = "RazorpayConfig::default_base_url")]
    pub base_url: String,
}

impl RazorpayConfig {
    fn default_base_url() -> String {
        "https://api.razorpay.com".to_string()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    #[serde(default = "StripeConfig::default_tolerance")]
    pub signature_tolerance_secs: i64,
    #[serde(default = "StripeConfig::default_base_url")]
    pub base_url: String,
}

impl StripeConfig {
    fn default_tolerance() -> i64 {
        300
    }

    fn default_base_url() -> String {
        "https://api.stripe.com".to_string()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulatedGatewayConfig {
    pub webhook_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub timeout_ms: u64,
    pub razorpay: Option<RazorpayConfig>,
    pub stripe: Option<StripeConfig>,
    pub simulated: Option<SimulatedGatewayConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            razorpay: None,
            stripe: None,
            simulated: None,
        }
    }
}

impl GatewayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub default_currency: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            default_currency: "INR".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// How many times a mutation is re-applied after losing an optimistic-lock race.
    pub max_stale_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_stale_retries: 3,
        }
    }
}

impl SettlementConfig {
    /// Reads a JSON config file. Missing sections fall back to defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Fills provider credentials from the environment when present.
    pub fn with_env_overrides(mut self) -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        if let (Some(key_id), Some(key_secret), Some(webhook_secret)) = (
            var("RAZORPAY_KEY_ID"),
            var("RAZORPAY_KEY_SECRET"),
            var("RAZORPAY_WEBHOOK_SECRET"),
        ) {
            self.gateway.razorpay = Some(RazorpayConfig {
                key_id,
                key_secret,
                webhook_secret,
                base_url: RazorpayConfig::default_base_url(),
            });
        }

        if let (Some(secret_key), Some(webhook_secret)) =
            (var("STRIPE_SECRET_KEY"), var("STRIPE_WEBHOOK_SECRET"))
        {
            self.gateway.stripe = Some(StripeConfig {
                secret_key,
                webhook_secret,
                signature_tolerance_secs: StripeConfig::default_tolerance(),
                base_url: StripeConfig::default_base_url(),
            });
        }

        self
    }

    pub fn validate(&self) -> Result<()> {
        let unit = Decimal::ZERO..Decimal::ONE;
        if !unit.contains(&self.fees.platform_fee_rate) || !unit.contains(&self.fees.gateway_fee_rate)
        {
            return Err(SettlementError::Config(
                "fee rates must be fractions in [0, 1)".to_string(),
            ));
        }
        if self.tax.default_rate < Decimal::ZERO
            || self.tax.rates.values().any(|rate| *rate < Decimal::ZERO)
        {
            return Err(SettlementError::Config(
                "tax rates must be non-negative".to_string(),
            ));
        }
        if self.emi.tenors.iter().any(|tenor| tenor.months == 0) {
            return Err(SettlementError::Config(
                "EMI tenors must span at least one month".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SettlementConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tax.rates.get("electronics"), Some(&dec!(18)));
        assert!(config.tax.zero_rated.contains("books"));
        assert_eq!(config.emi.tenors.len(), 4);
    }

    #[test]
    fn test_partial_json_keeps_other_defaults() {
        let raw = r#"{ "fees": { "platform_fee_rate": "0.1" }, "emi": { "threshold": 1000 } }"#;
        let config: SettlementConfig = serde_json::from_str(raw).unwrap();

        assert_eq!(config.fees.platform_fee_rate, dec!(0.1));
        assert_eq!(config.fees.gateway_fee_rate, dec!(0.02));
        assert_eq!(config.emi.threshold, dec!(1000));
        assert_eq!(config.emi.tenors.len(), 4);
        assert_eq!(config.scoring.max_points, 1000);
    }

    #[test]
    fn test_rejects_fee_rate_above_one() {
        let mut config = SettlementConfig::default();
        config.fees.platform_fee_rate = dec!(1.5);
        assert!(matches!(config.validate(), Err(SettlementError::Config(_))));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settlement.json");
        std::fs::write(&path, r#"{ "gateway": { "timeout_ms": 250 } }"#).unwrap();

        let config = SettlementConfig::from_file(&path).unwrap();
        assert_eq!(config.gateway.timeout(), Duration::from_millis(250));
    }
}
