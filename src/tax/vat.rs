//! Monthly VAT returns (déclarations de TVA)

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::config::{AccountMapping, EngineConfig};
use crate::ledger::core::{active_entries, Ledger};
use crate::traits::*;
use crate::types::*;

/// When VAT becomes due
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VatBasis {
    /// On the invoice date (régime des débits)
    #[default]
    Accrual,
    /// On the settlement date (régime de l'encaissement)
    Cash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VatStatus {
    Draft,
    Validated,
    Filed,
}

impl VatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VatStatus::Draft => "DRAFT",
            VatStatus::Validated => "VALIDATED",
            VatStatus::Filed => "FILED",
        }
    }
}

/// Collected and deductible VAT of one rate bracket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VatBucket {
    pub rate: BigDecimal,
    pub collected: BigDecimal,
    pub deductible: BigDecimal,
}

/// A monthly VAT return
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VatReturn {
    pub id: String,
    pub month: u32,
    pub year: i32,
    /// "MM/YYYY"
    pub periode: String,
    pub basis: VatBasis,
    /// Sorted by rate
    pub buckets: Vec<VatBucket>,
    pub total_collected: BigDecimal,
    pub total_deductible: BigDecimal,
    /// Credit carried over from the previous month
    pub credit_reporte: BigDecimal,
    pub tva_a_payer: BigDecimal,
    /// Credit carried into the next month
    pub tva_credit: BigDecimal,
    pub status: VatStatus,
    pub filing_date: Option<NaiveDate>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Default)]
struct Totals(BTreeMap<BigDecimal, (BigDecimal, BigDecimal)>);

impl Totals {
    fn collected(&mut self, rate: &BigDecimal, amount: BigDecimal) {
        self.bucket(rate).0 += amount;
    }

    fn deductible(&mut self, rate: &BigDecimal, amount: BigDecimal) {
        self.bucket(rate).1 += amount;
    }

    fn bucket(&mut self, rate: &BigDecimal) -> &mut (BigDecimal, BigDecimal) {
        self.0
            .entry(rate.normalized())
            .or_insert_with(|| (BigDecimal::from(0), BigDecimal::from(0)))
    }

    fn into_buckets(self) -> Vec<VatBucket> {
        self.0
            .into_iter()
            .map(|(rate, (collected, deductible))| VatBucket {
                rate,
                collected: round_amount(&collected),
                deductible: round_amount(&deductible),
            })
            .collect()
    }
}

/// Computes VAT returns from the ledger and walks them through
/// draft, validated and filed.
#[derive(Clone)]
pub struct VatEngine<S: LedgerStorage + VatReturnStorage> {
    storage: S,
    ledger: Ledger<S>,
    accounts: AccountMapping,
    default_basis: VatBasis,
}

impl<S: LedgerStorage + VatReturnStorage + Clone> VatEngine<S> {
    pub fn new(storage: S, ledger: Ledger<S>, config: &EngineConfig) -> Self {
        Self {
            storage,
            ledger,
            accounts: config.accounts.clone(),
            default_basis: config.vat.default_basis,
        }
    }

    /// [`Self::calculer_declaration`] on the configured basis
    pub async fn calculer(&mut self, month: u32, year: i32) -> LedgerResult<VatReturn> {
        self.calculer_declaration(month, year, self.default_basis)
            .await
    }

    /// Compute the return of `month`/`year` and store it as a draft.
    ///
    /// An existing draft is refreshed in place and keeps its id. A
    /// validated or filed month cannot be recomputed.
    pub async fn calculer_declaration(
        &mut self,
        month: u32,
        year: i32,
        basis: VatBasis,
    ) -> LedgerResult<VatReturn> {
        let range = DateRange::month(year, month)?;
        let existing = self.storage.find_vat_return(month, year).await?;
        if let Some(existing) = &existing {
            if existing.status != VatStatus::Draft {
                return Err(LedgerError::InvalidTransition {
                    what: "VAT return",
                    id: existing.id.clone(),
                    from: existing.status.as_str().to_string(),
                    to: VatStatus::Draft.as_str().to_string(),
                });
            }
        }

        let totals = match basis {
            VatBasis::Accrual => self.accrual_totals(range).await?,
            VatBasis::Cash => self.cash_totals(range).await?,
        };
        let buckets = totals.into_buckets();
        let total_collected: BigDecimal = buckets.iter().map(|b| &b.collected).sum();
        let total_deductible: BigDecimal = buckets.iter().map(|b| &b.deductible).sum();
        let credit_reporte = self.previous_credit(month, year).await?;

        let zero = BigDecimal::from(0);
        let net = &total_collected - &total_deductible - &credit_reporte;
        let (tva_a_payer, tva_credit) = if net >= zero {
            (net, zero)
        } else {
            (zero, -net)
        };

        let now = chrono::Utc::now().naive_utc();
        let vat_return = VatReturn {
            id: existing
                .as_ref()
                .map(|e| e.id.clone())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            month,
            year,
            periode: format!("{month:02}/{year}"),
            basis,
            buckets,
            total_collected,
            total_deductible,
            credit_reporte,
            tva_a_payer,
            tva_credit,
            status: VatStatus::Draft,
            filing_date: None,
            created_at: existing.as_ref().map_or(now, |e| e.created_at),
            updated_at: now,
        };

        if existing.is_some() {
            self.storage.update_vat_return(&vat_return).await?;
        } else {
            self.storage.save_vat_return(&vat_return).await?;
        }
        info!(
            periode = %vat_return.periode,
            collected = %vat_return.total_collected,
            deductible = %vat_return.total_deductible,
            due = %vat_return.tva_a_payer,
            credit = %vat_return.tva_credit,
            "VAT return computed"
        );
        Ok(vat_return)
    }

    /// Draft -> Validated
    pub async fn valider(&mut self, id: &str) -> LedgerResult<VatReturn> {
        self.transition(id, VatStatus::Draft, VatStatus::Validated, None)
            .await
    }

    /// Validated -> Filed
    pub async fn deposer(&mut self, id: &str, filing_date: NaiveDate) -> LedgerResult<VatReturn> {
        self.transition(id, VatStatus::Validated, VatStatus::Filed, Some(filing_date))
            .await
    }

    async fn transition(
        &mut self,
        id: &str,
        from: VatStatus,
        to: VatStatus,
        filing_date: Option<NaiveDate>,
    ) -> LedgerResult<VatReturn> {
        let mut vat_return = self.get(id).await?;
        if vat_return.status != from {
            return Err(LedgerError::InvalidTransition {
                what: "VAT return",
                id: id.to_string(),
                from: vat_return.status.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }

        vat_return.status = to;
        if filing_date.is_some() {
            vat_return.filing_date = filing_date;
        }
        vat_return.updated_at = chrono::Utc::now().naive_utc();
        self.storage.update_vat_return(&vat_return).await?;

        info!(
            periode = %vat_return.periode,
            status = to.as_str(),
            "VAT return status changed"
        );
        Ok(vat_return)
    }

    /// Get a return by id, returning an error if not found
    pub async fn get(&self, id: &str) -> LedgerResult<VatReturn> {
        self.storage
            .get_vat_return(id)
            .await?
            .ok_or_else(|| LedgerError::VatReturnNotFound(id.to_string()))
    }

    pub async fn find(&self, month: u32, year: i32) -> LedgerResult<Option<VatReturn>> {
        self.storage.find_vat_return(month, year).await
    }

    /// Returns of a year, by month
    pub async fn list_for_year(&self, year: i32) -> LedgerResult<Vec<VatReturn>> {
        self.storage.list_vat_returns(year).await
    }

    async fn previous_credit(&self, month: u32, year: i32) -> LedgerResult<BigDecimal> {
        let (month, year) = if month == 1 {
            (12, year - 1)
        } else {
            (month - 1, year)
        };
        Ok(self
            .storage
            .find_vat_return(month, year)
            .await?
            .map_or_else(|| BigDecimal::from(0), |r| r.tva_credit))
    }

    /// VAT lines of the entries dated in the range, reversals netting out
    async fn accrual_totals(&self, range: DateRange) -> LedgerResult<Totals> {
        let snapshot = self.ledger.snapshot(range, None).await?;
        let mut totals = Totals::default();
        for entry in &snapshot.entries {
            self.add_vat_lines(&mut totals, entry, &BigDecimal::from(1));
        }
        Ok(totals)
    }

    /// VAT of the invoices settled in the range, pro-rated by payment.
    ///
    /// A purchase paid before its invoice counts in the invoice month.
    /// Payments and invoices are read from one snapshot.
    async fn cash_totals(&self, range: DateRange) -> LedgerResult<Totals> {
        let Some(end) = range.end else {
            return Ok(Totals::default());
        };
        let snapshot = self.ledger.snapshot(DateRange::all(), None).await?;
        let invoices = active_entries(&snapshot.entries);

        let one = BigDecimal::from(1);
        let mut totals = Totals::default();
        let payments = snapshot
            .entries
            .iter()
            .filter(|e| e.journal == JournalCode::Bank && e.date <= end);
        for payment in payments {
            let Some(invoice_ref) = &payment.linked_document else {
                continue;
            };
            let Some(invoice) = invoices.get(invoice_ref) else {
                debug!(payment = %payment.id, invoice = %invoice_ref, "settled invoice has no entry");
                continue;
            };

            let effective = match invoice_ref.doc_type {
                DocumentType::PurchaseInvoice => payment.date.max(invoice.date),
                _ => payment.date,
            };
            if !range.contains(effective) {
                continue;
            }

            let invoice_total = invoice.total_debits();
            if invoice_total == BigDecimal::from(0) {
                continue;
            }
            let mut share = payment.total_debits() / &invoice_total;
            if share > one {
                share = one.clone();
            }
            if payment.reverses.is_some() {
                share = -share;
            }
            self.add_vat_lines(&mut totals, invoice, &share);
        }
        Ok(totals)
    }

    fn add_vat_lines(&self, totals: &mut Totals, entry: &JournalEntry, share: &BigDecimal) {
        for line in &entry.lines {
            let Some(rate) = &line.vat_rate else {
                continue;
            };
            let signed = line.credit_amount() - line.debit_amount();
            if line.account_code == self.accounts.vat_collected {
                totals.collected(rate, round_amount(&(signed * share)));
            } else if line.account_code == self.accounts.vat_deductible {
                totals.deductible(rate, round_amount(&(-signed * share)));
            }
        }
    }
}
