//! Engine configuration.
//!
//! Every section has defaults matching the standard Moroccan chart and tax
//! tables, so an empty configuration is a working one. Decimal values are
//! best written as strings in TOML (`max_residual = "0.05"`) to keep them exact.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use crate::tax::vat::VatBasis;
use crate::types::{LedgerError, LedgerResult};
use crate::utils::validation::validate_account_code;

/// Engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Accounts the journal generator posts to.
    #[serde(default)]
    pub accounts: AccountMapping,
    /// VAT rate brackets and declaration basis.
    #[serde(default)]
    pub vat: VatConfig,
    /// Corporate income tax tables.
    #[serde(default)]
    pub corporate_tax: CorporateTaxConfig,
    /// Fiscal period policy.
    #[serde(default)]
    pub fiscal: FiscalConfig,
    /// Rounding tolerance.
    #[serde(default)]
    pub rounding: RoundingConfig,
}

/// Account codes used when turning documents into entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountMapping {
    pub customers: String,
    pub suppliers: String,
    pub sales_revenue: String,
    pub purchases: String,
    pub vat_collected: String,
    pub vat_deductible: String,
    pub bank: String,
    pub cash: String,
    /// Expense account for charges whose category is unknown
    pub default_charge: String,
}

impl Default for AccountMapping {
    fn default() -> Self {
        Self {
            customers: "41111".to_string(),
            suppliers: "44111".to_string(),
            sales_revenue: "7121".to_string(),
            purchases: "6114".to_string(),
            vat_collected: "4457".to_string(),
            vat_deductible: "4456".to_string(),
            bank: "5141".to_string(),
            cash: "5161".to_string(),
            default_charge: "6131".to_string(),
        }
    }
}

impl AccountMapping {
    fn codes(&self) -> [&str; 9] {
        [
            &self.customers,
            &self.suppliers,
            &self.sales_revenue,
            &self.purchases,
            &self.vat_collected,
            &self.vat_deductible,
            &self.bank,
            &self.cash,
            &self.default_charge,
        ]
    }
}

/// VAT configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VatConfig {
    /// Legal rate brackets, in percent.
    #[serde(default = "default_vat_rates")]
    pub rates: Vec<BigDecimal>,
    /// Basis used when a caller does not pick one.
    #[serde(default)]
    pub default_basis: VatBasis,
}

fn default_vat_rates() -> Vec<BigDecimal> {
    [20, 14, 10, 7, 0].into_iter().map(BigDecimal::from).collect()
}

impl Default for VatConfig {
    fn default() -> Self {
        Self {
            rates: default_vat_rates(),
            default_basis: VatBasis::default(),
        }
    }
}

impl VatConfig {
    /// Whether `rate` is one of the configured brackets
    pub fn is_known_rate(&self, rate: &BigDecimal) -> bool {
        self.rates.iter().any(|r| r == rate)
    }
}

/// One progressive bracket of the corporate tax table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxBracket {
    /// Upper bound of the bracket; `None` for the last one.
    pub up_to: Option<BigDecimal>,
    /// Rate in percent.
    pub rate: BigDecimal,
}

/// Corporate income tax configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorporateTaxConfig {
    #[serde(default = "default_brackets")]
    pub brackets: Vec<TaxBracket>,
    /// Minimum contribution rate on turnover, in percent.
    #[serde(default = "default_minimum_rate")]
    pub minimum_rate: BigDecimal,
    /// Floor of the minimum contribution.
    #[serde(default = "default_minimum_amount")]
    pub minimum_amount: BigDecimal,
}

fn default_brackets() -> Vec<TaxBracket> {
    vec![
        TaxBracket {
            up_to: Some(BigDecimal::from(300_000)),
            rate: BigDecimal::from(10),
        },
        TaxBracket {
            up_to: Some(BigDecimal::from(1_000_000)),
            rate: BigDecimal::from(20),
        },
        TaxBracket {
            up_to: None,
            rate: BigDecimal::from(31),
        },
    ]
}

fn default_minimum_rate() -> BigDecimal {
    // 0.5 %
    BigDecimal::new(5.into(), 1)
}

fn default_minimum_amount() -> BigDecimal {
    BigDecimal::from(3_000)
}

impl Default for CorporateTaxConfig {
    fn default() -> Self {
        Self {
            brackets: default_brackets(),
            minimum_rate: default_minimum_rate(),
            minimum_amount: default_minimum_amount(),
        }
    }
}

/// Fiscal period policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FiscalConfig {
    /// Allow a new period to open while another one is still open.
    #[serde(default)]
    pub allow_concurrent_open_periods: bool,
}

/// Rounding tolerance of the journal generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundingConfig {
    /// Largest debit/credit gap absorbed into the last line of a generated entry.
    #[serde(default = "default_max_residual")]
    pub max_residual: BigDecimal,
}

fn default_max_residual() -> BigDecimal {
    BigDecimal::new(5.into(), 2)
}

impl Default for RoundingConfig {
    fn default() -> Self {
        Self {
            max_residual: default_max_residual(),
        }
    }
}

impl EngineConfig {
    /// Loads configuration from config files and the environment.
    ///
    /// Layers `config/default`, `config/{RUN_MODE}` and `COMPTA__*` variables
    /// (e.g. `COMPTA__FISCAL__ALLOW_CONCURRENT_OPEN_PERIODS=true`).
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Config`] if a source cannot be read or the
    /// resulting tables are inconsistent.
    pub fn load() -> LedgerResult<Self> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(config::Environment::with_prefix("COMPTA").separator("__"))
            .build()?;

        let loaded: EngineConfig = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Parses a TOML document, falling back to defaults for missing sections.
    pub fn from_toml_str(toml: &str) -> LedgerResult<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?;

        let loaded: EngineConfig = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Rejects inconsistent tables.
    pub fn validate(&self) -> LedgerResult<()> {
        for code in self.accounts.codes() {
            validate_account_code(code)
                .map_err(|e| LedgerError::Config(format!("accounts: {e}")))?;
        }

        if self.vat.rates.is_empty() {
            return Err(LedgerError::Config("vat.rates cannot be empty".to_string()));
        }
        for (i, rate) in self.vat.rates.iter().enumerate() {
            if *rate < BigDecimal::from(0) {
                return Err(LedgerError::Config(format!("vat.rates: negative rate {rate}")));
            }
            if self.vat.rates[..i].contains(rate) {
                return Err(LedgerError::Config(format!("vat.rates: duplicate rate {rate}")));
            }
        }

        let brackets = &self.corporate_tax.brackets;
        match brackets.last() {
            Some(last) if last.up_to.is_none() => {}
            _ => {
                return Err(LedgerError::Config(
                    "corporate_tax.brackets must end with an unbounded bracket".to_string(),
                ))
            }
        }
        let mut previous = BigDecimal::from(0);
        for bracket in &brackets[..brackets.len() - 1] {
            match &bracket.up_to {
                Some(bound) if *bound > previous => previous = bound.clone(),
                _ => {
                    return Err(LedgerError::Config(
                        "corporate_tax.brackets bounds must be strictly increasing".to_string(),
                    ))
                }
            }
        }
        if brackets.iter().any(|b| b.rate < BigDecimal::from(0)) {
            return Err(LedgerError::Config(
                "corporate_tax.brackets rates cannot be negative".to_string(),
            ));
        }

        if self.rounding.max_residual < BigDecimal::from(0) {
            return Err(LedgerError::Config(
                "rounding.max_residual cannot be negative".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.accounts.vat_collected, "4457");
        assert!(config.vat.is_known_rate(&BigDecimal::from(14)));
        assert!(!config.vat.is_known_rate(&BigDecimal::from(18)));
        assert_eq!(
            config.rounding.max_residual,
            BigDecimal::from_str("0.05").unwrap()
        );
        assert!(!config.fiscal.allow_concurrent_open_periods);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [fiscal]
            allow_concurrent_open_periods = true

            [accounts]
            bank = "5142"
            "#,
        )
        .unwrap();
        assert!(config.fiscal.allow_concurrent_open_periods);
        assert_eq!(config.accounts.bank, "5142");
        assert_eq!(config.accounts.customers, "41111");
        assert_eq!(config.corporate_tax.brackets.len(), 3);
    }

    #[test]
    fn test_rejects_bounded_last_bracket() {
        let mut config = EngineConfig::default();
        config.corporate_tax.brackets.pop();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, LedgerError::Config(_)));
    }

    #[test]
    fn test_rejects_duplicate_vat_rate() {
        let mut config = EngineConfig::default();
        config.vat.rates.push(BigDecimal::from(20));
        assert!(config.validate().is_err());
    }
}
