//! Corporate income tax (impôt sur les sociétés) and its installments

use bigdecimal::{BigDecimal, RoundingMode};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{CorporateTaxConfig, TaxBracket};
use crate::ledger::core::Ledger;
use crate::reports::statements::{Cpc, FinancialStatementBuilder};
use crate::traits::*;
use crate::types::*;

/// Tax on the part of the fiscal result falling in one bracket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BracketSlice {
    pub from: BigDecimal,
    pub up_to: Option<BigDecimal>,
    pub rate: BigDecimal,
    pub base: BigDecimal,
    pub tax: BigDecimal,
}

/// Corporate tax of a range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorporateTaxComputation {
    pub range: DateRange,
    pub period_id: Option<String>,
    /// Result before tax
    pub resultat_comptable: BigDecimal,
    /// Non-deductible charges added back
    pub reintegrations: BigDecimal,
    pub resultat_fiscal: BigDecimal,
    /// Operating revenue the minimum contribution is assessed on
    pub turnover: BigDecimal,
    pub slices: Vec<BracketSlice>,
    pub is_calcule: BigDecimal,
    pub cotisation_minimale: BigDecimal,
    /// Greater of the computed tax and the minimum contribution
    pub is_due: BigDecimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Installment {
    pub number: u8,
    pub due_date: NaiveDate,
    pub amount: BigDecimal,
}

/// Quarterly installments of a year, based on the previous year's tax
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallmentPlan {
    pub year: i32,
    /// Tax due for the previous year
    pub reference_due: BigDecimal,
    pub installments: Vec<Installment>,
    pub total: BigDecimal,
    /// Known once the year's period is closed
    pub actual_due: Option<BigDecimal>,
    /// Actual tax minus installments; negative is a refund
    pub regularisation: Option<BigDecimal>,
}

/// Apply the progressive table to a fiscal result
pub fn apply_brackets(brackets: &[TaxBracket], resultat_fiscal: &BigDecimal) -> Vec<BracketSlice> {
    let zero = BigDecimal::from(0);
    let hundred = BigDecimal::from(100);
    let mut slices = Vec::new();
    let mut from = zero.clone();

    for bracket in brackets {
        if *resultat_fiscal <= from {
            break;
        }
        let top = match &bracket.up_to {
            Some(up_to) if up_to < resultat_fiscal => up_to.clone(),
            _ => resultat_fiscal.clone(),
        };
        let base = &top - &from;
        let tax = round_amount(&(&base * &bracket.rate / &hundred));
        slices.push(BracketSlice {
            from: from.clone(),
            up_to: bracket.up_to.clone(),
            rate: bracket.rate.clone(),
            base,
            tax,
        });
        match &bracket.up_to {
            Some(up_to) => from = up_to.clone(),
            None => break,
        }
    }
    slices
}

/// Class 6 amounts of entries flagged non-deductible, reversals netting out
pub fn reintegrations(entries: &[JournalEntry]) -> BigDecimal {
    entries
        .iter()
        .filter(|e| !e.tax_deductible)
        .flat_map(|e| e.lines.iter())
        .filter(|l| l.account_code.starts_with('6'))
        .map(|l| l.debit_amount() - l.credit_amount())
        .sum()
}

/// Computes the corporate tax from the income statement
#[derive(Clone)]
pub struct TaxEngine<S: LedgerStorage> {
    ledger: Ledger<S>,
    statements: FinancialStatementBuilder<S>,
    config: CorporateTaxConfig,
}

impl<S: LedgerStorage + Clone> TaxEngine<S> {
    pub fn new(ledger: Ledger<S>, config: CorporateTaxConfig) -> Self {
        Self {
            statements: FinancialStatementBuilder::new(ledger.clone()),
            ledger,
            config,
        }
    }

    /// Corporate tax of a range, narrowed to `period_id` when given.
    ///
    /// The CPC and the reintegrations come from one ledger snapshot.
    pub async fn calculer_is(
        &self,
        range: DateRange,
        period_id: Option<&str>,
    ) -> LedgerResult<CorporateTaxComputation> {
        let (cpc, snapshot) = self.statements.cpc_with_snapshot(range, period_id).await?;
        Ok(self.assess(cpc, &snapshot.entries))
    }

    fn assess(&self, cpc: Cpc, entries: &[JournalEntry]) -> CorporateTaxComputation {
        let resultat_comptable = cpc.breakdown.resultat_avant_impot.clone();
        let reintegrations = reintegrations(entries);
        let resultat_fiscal = &resultat_comptable + &reintegrations;
        let turnover = cpc.breakdown.produits_exploitation.clone();

        let slices = apply_brackets(&self.config.brackets, &resultat_fiscal);
        let is_calcule: BigDecimal = slices.iter().map(|s| &s.tax).sum();
        let minimum = round_amount(&(&turnover * &self.config.minimum_rate / BigDecimal::from(100)));
        let cotisation_minimale = minimum.max(self.config.minimum_amount.clone());
        let is_due = is_calcule.clone().max(cotisation_minimale.clone());

        debug!(
            resultat_fiscal = %resultat_fiscal,
            is_calcule = %is_calcule,
            cotisation_minimale = %cotisation_minimale,
            "corporate tax computed"
        );
        CorporateTaxComputation {
            range: cpc.range,
            period_id: cpc.period_id,
            resultat_comptable,
            reintegrations,
            resultat_fiscal,
            turnover,
            slices,
            is_calcule,
            cotisation_minimale,
            is_due,
        }
    }

    /// Installments due during `year`: a quarter of the previous year's tax
    /// on 31/03, 30/06, 30/09 and 31/12, the rounding cent on the last one.
    pub async fn calculer_acomptes(&self, year: i32) -> LedgerResult<InstallmentPlan> {
        let (cpc, snapshot) = self
            .statements
            .cpc_with_snapshot(DateRange::year(year - 1)?, None)
            .await?;
        let reference_due = if snapshot.entries.is_empty() {
            BigDecimal::from(0)
        } else {
            self.assess(cpc, &snapshot.entries).is_due
        };

        let quarter = (reference_due.clone() / BigDecimal::from(4))
            .with_scale_round(AMOUNT_SCALE, RoundingMode::Down);
        let mut installments = Vec::with_capacity(4);
        for (number, (month, day)) in [(3, 31), (6, 30), (9, 30), (12, 31)].into_iter().enumerate() {
            let due_date = NaiveDate::from_ymd_opt(year, month, day)
                .ok_or_else(|| LedgerError::Validation(format!("Invalid year {year}")))?;
            let amount = if number == 3 {
                &reference_due - quarter.clone() * BigDecimal::from(3)
            } else {
                quarter.clone()
            };
            installments.push(Installment {
                number: number as u8 + 1,
                due_date,
                amount,
            });
        }
        let total: BigDecimal = installments.iter().map(|i| &i.amount).sum();

        let (actual_due, regularisation) = match self.closed_year_period(year).await? {
            Some(period) => {
                let actual = self
                    .calculer_is(DateRange::year(year)?, Some(&period.id))
                    .await?
                    .is_due;
                let regularisation = &actual - &total;
                (Some(actual), Some(regularisation))
            }
            None => (None, None),
        };

        info!(year, reference_due = %reference_due, "corporate tax installments computed");
        Ok(InstallmentPlan {
            year,
            reference_due,
            installments,
            total,
            actual_due,
            regularisation,
        })
    }

    /// The closed period ending the year, if any
    async fn closed_year_period(&self, year: i32) -> LedgerResult<Option<FiscalPeriod>> {
        let Some(year_end) = NaiveDate::from_ymd_opt(year, 12, 31) else {
            return Ok(None);
        };
        Ok(self
            .ledger
            .periods()
            .period_for_date(year_end)
            .await?
            .filter(|p| !p.is_open()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use rstest::rstest;

    #[rstest]
    #[case(0, "0")]
    #[case(-5_000, "0")]
    #[case(100_000, "10000")]
    #[case(300_000, "30000")]
    #[case(500_000, "70000")]
    #[case(1_000_000, "170000")]
    #[case(2_000_000, "480000")]
    fn test_progressive_brackets(#[case] resultat: i64, #[case] expected: &str) {
        let brackets = EngineConfig::default().corporate_tax.brackets;
        let slices = apply_brackets(&brackets, &BigDecimal::from(resultat));
        let tax: BigDecimal = slices.iter().map(|s| &s.tax).sum();
        assert_eq!(tax, expected.parse::<BigDecimal>().unwrap());
    }

    #[test]
    fn test_slices_cover_the_result() {
        let brackets = EngineConfig::default().corporate_tax.brackets;
        let slices = apply_brackets(&brackets, &BigDecimal::from(450_000));
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[1].from, BigDecimal::from(300_000));
        assert_eq!(slices[1].base, BigDecimal::from(150_000));
        let base: BigDecimal = slices.iter().map(|s| &s.base).sum();
        assert_eq!(base, BigDecimal::from(450_000));
    }

    #[test]
    fn test_reintegrations_net_out_reversals() {
        let on = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        let gift = |id: &str, deductible: bool| {
            let mut entry = JournalEntry::new(
                on,
                JournalCode::Misc,
                format!("CHG-{id}"),
                "Cadeau".to_string(),
                DocumentRef::new(DocumentType::Charge, id),
                "p".to_string(),
            );
            entry.lines = vec![
                EntryLine::debit("6131", "Cadeau", BigDecimal::from(250)),
                EntryLine::credit("5141", "Banque", BigDecimal::from(250)),
            ];
            entry.tax_deductible = deductible;
            entry
        };

        let kept = gift("g1", false);
        let cancelled = gift("g2", false);
        let reversal = cancelled.reversal(on, "p".to_string());
        let deductible = gift("g3", true);
        let total = reintegrations(&[kept, cancelled, reversal, deductible]);
        assert_eq!(total, BigDecimal::from(250));
    }
}
