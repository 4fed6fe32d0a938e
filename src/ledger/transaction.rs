//! Journal entry construction and generation from business documents

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

use crate::config::{AccountMapping, EngineConfig, VatConfig};
use crate::documents::*;
use crate::ledger::core::Ledger;
use crate::traits::*;
use crate::types::*;

/// Entry builder for assembling balanced entries line by line
#[derive(Debug)]
pub struct EntryBuilder {
    entry: JournalEntry,
    max_residual: Option<BigDecimal>,
}

impl EntryBuilder {
    /// Create a new entry builder
    pub fn new(
        date: NaiveDate,
        journal: JournalCode,
        piece_number: String,
        label: String,
        source: DocumentRef,
        period_id: String,
    ) -> Self {
        Self {
            entry: JournalEntry::new(date, journal, piece_number, label, source, period_id),
            max_residual: None,
        }
    }

    /// Invoice settled by the entry
    pub fn linked_document(mut self, document: Option<DocumentRef>) -> Self {
        self.entry.linked_document = document;
        self
    }

    pub fn tax_deductible(mut self, deductible: bool) -> Self {
        self.entry.tax_deductible = deductible;
        self
    }

    /// Absorb a debit/credit gap up to `max` into the last line on build
    pub fn absorb_residual(mut self, max: BigDecimal) -> Self {
        self.max_residual = Some(max);
        self
    }

    /// Add a debit line, rounded to the cent
    pub fn debit(mut self, account_code: &str, label: &str, amount: &BigDecimal) -> Self {
        self.entry
            .lines
            .push(EntryLine::debit(account_code, label, round_amount(amount)));
        self
    }

    /// Add a credit line, rounded to the cent
    pub fn credit(mut self, account_code: &str, label: &str, amount: &BigDecimal) -> Self {
        self.entry
            .lines
            .push(EntryLine::credit(account_code, label, round_amount(amount)));
        self
    }

    /// Add a custom line
    pub fn line(mut self, line: EntryLine) -> Self {
        self.entry.lines.push(line);
        self
    }

    /// Build the entry
    pub fn build(mut self) -> LedgerResult<JournalEntry> {
        if let Some(max) = &self.max_residual {
            let residual = self.entry.total_debits() - self.entry.total_credits();
            if residual != BigDecimal::from(0) && residual.abs() <= *max {
                if let Some(last) = self.entry.lines.last_mut() {
                    match last.entry_type {
                        EntryType::Credit => last.amount += &residual,
                        EntryType::Debit => last.amount -= &residual,
                    }
                    debug!(residual = %residual, account = %last.account_code, "rounding residual absorbed");
                }
            }
        }
        self.entry.validate()?;
        Ok(self.entry)
    }
}

/// Expense account per charge category
static CHARGE_ACCOUNTS: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    HashMap::from([
        ("LOYER", "6132"),
        ("LOCATION", "6132"),
        ("SALAIRE", "6171"),
        ("SALAIRES", "6171"),
        ("CHARGES SOCIALES", "6172"),
        ("TRANSPORT", "6136"),
        ("TELECOMMUNICATION", "6137"),
        ("TELECOM", "6137"),
        ("EAU", "6138"),
        ("ELECTRICITE", "6138"),
        ("ENERGIE", "6138"),
        ("ASSURANCE", "6133"),
        ("PUBLICITE", "6135"),
        ("PUB", "6135"),
        ("IMPOT", "6311"),
        ("TAXE", "6311"),
        ("INTERETS", "6211"),
    ])
});

fn normalize_category(category: &str) -> String {
    category
        .trim()
        .to_uppercase()
        .chars()
        .map(|c| match c {
            'É' | 'È' | 'Ê' | 'Ë' => 'E',
            'À' | 'Â' => 'A',
            'Ô' => 'O',
            'Î' | 'Ï' => 'I',
            'Û' | 'Ù' => 'U',
            'Ç' => 'C',
            other => other,
        })
        .collect()
}

/// Expense account for a charge category, `default` when unknown
pub fn charge_account<'a>(category: Option<&str>, default: &'a str) -> &'a str {
    category
        .map(normalize_category)
        .and_then(|c| CHARGE_ACCOUNTS.get(c.as_str()).copied())
        .unwrap_or(default)
}

fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}

/// A document that could not be posted during regeneration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegenerationError {
    pub doc_type: DocumentType,
    pub id: String,
    pub reason: String,
}

/// Outcome of a regeneration run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegenerationReport {
    pub sales_invoices: usize,
    pub purchase_invoices: usize,
    pub payments: usize,
    pub charges: usize,
    /// Documents already posted or with nothing to post
    pub skipped: usize,
    pub errors: Vec<RegenerationError>,
}

impl RegenerationReport {
    pub fn total_created(&self) -> usize {
        self.sales_invoices + self.purchase_invoices + self.payments + self.charges
    }

    fn record_created(&mut self, doc_type: DocumentType) {
        match doc_type {
            DocumentType::SalesInvoice => self.sales_invoices += 1,
            DocumentType::PurchaseInvoice => self.purchase_invoices += 1,
            DocumentType::Payment => self.payments += 1,
            DocumentType::Charge => self.charges += 1,
        }
    }
}

/// What syncing a document did to the ledger
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Created(JournalEntry),
    Unchanged(JournalEntry),
    Superseded {
        reversal: JournalEntry,
        replacement: JournalEntry,
    },
    /// The document no longer produces an entry; its entry was reversed
    Cancelled(JournalEntry),
    /// Nothing to post and nothing posted
    Skipped,
}

/// How entry generation finds the period of a document date
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeriodLookup {
    /// Only periods that already exist
    Existing,
    /// Create the calendar-year period when none covers the date
    CreateMissing,
}

/// VAT and TTC of an invoice, derived from HT when not given: VAT from
/// TTC minus HT, else from the rate; TTC as HT plus VAT.
pub fn invoice_amounts(
    total_ht: &BigDecimal,
    total_tva: Option<&BigDecimal>,
    total_ttc: Option<&BigDecimal>,
    vat_rate: Option<&BigDecimal>,
) -> (BigDecimal, BigDecimal) {
    let total_tva = match (total_tva, total_ttc, vat_rate) {
        (Some(tva), _, _) => tva.clone(),
        (None, Some(ttc), _) => ttc - total_ht,
        (None, None, Some(rate)) => round_amount(&(total_ht * rate / BigDecimal::from(100))),
        (None, None, None) => BigDecimal::from(0),
    };
    let total_ttc = total_ttc
        .cloned()
        .unwrap_or_else(|| total_ht + &total_tva);
    (total_tva, total_ttc)
}

/// Turns business documents into balanced journal entries
#[derive(Clone)]
pub struct JournalEntryGenerator<S: LedgerStorage> {
    accounts: AccountMapping,
    vat: VatConfig,
    max_residual: BigDecimal,
    ledger: Ledger<S>,
}

impl<S: LedgerStorage + Clone> JournalEntryGenerator<S> {
    pub fn new(ledger: Ledger<S>, config: &EngineConfig) -> Self {
        Self {
            accounts: config.accounts.clone(),
            vat: config.vat.clone(),
            max_residual: config.rounding.max_residual.clone(),
            ledger,
        }
    }

    /// Build the entry for a document without posting it.
    ///
    /// Nothing is written: the document date must fall in an existing
    /// period (`PeriodNotFound` otherwise). Returns `None` for documents
    /// that do not produce an entry yet, such as unpaid charges.
    pub async fn generate(&mut self, document: &SourceDocument) -> LedgerResult<Option<JournalEntry>> {
        self.build_entry(document, PeriodLookup::Existing).await
    }

    async fn build_entry(
        &mut self,
        document: &SourceDocument,
        lookup: PeriodLookup,
    ) -> LedgerResult<Option<JournalEntry>> {
        let doc_ref = document.doc_ref();
        match document {
            SourceDocument::SalesInvoice(invoice) => self
                .sales_invoice_entry(invoice, &doc_ref, lookup)
                .await
                .map(Some),
            SourceDocument::PurchaseInvoice(invoice) => self
                .purchase_invoice_entry(invoice, &doc_ref, lookup)
                .await
                .map(Some),
            SourceDocument::Payment(payment) => {
                self.payment_entry(payment, &doc_ref, lookup).await.map(Some)
            }
            SourceDocument::Charge(charge) => self.charge_entry(charge, &doc_ref, lookup).await,
        }
    }

    async fn period_id(&mut self, date: NaiveDate, lookup: PeriodLookup) -> LedgerResult<String> {
        match lookup {
            PeriodLookup::CreateMissing => Ok(self.ledger.period_for_posting(date).await?.id),
            PeriodLookup::Existing => self
                .ledger
                .periods()
                .period_for_date(date)
                .await?
                .map(|p| p.id)
                .ok_or_else(|| LedgerError::PeriodNotFound(format!("no period covers {date}"))),
        }
    }

    /// Sales: D customers (TTC) / C revenue (HT) / C VAT collected
    async fn sales_invoice_entry(
        &mut self,
        invoice: &SalesInvoice,
        doc_ref: &DocumentRef,
        lookup: PeriodLookup,
    ) -> LedgerResult<JournalEntry> {
        let number = required(&invoice.number, doc_ref, "number")?;
        let date = *required(&invoice.date, doc_ref, "date")?;
        let total_ht = required(&invoice.total_ht, doc_ref, "total_ht")?;
        let (total_tva, total_ttc) = invoice_amounts(
            total_ht,
            invoice.total_tva.as_ref(),
            invoice.total_ttc.as_ref(),
            invoice.vat_rate.as_ref(),
        );
        let vat_rate = self.vat_rate(invoice.vat_rate.as_ref(), &total_tva, doc_ref)?;

        let client = invoice.client_name.as_deref().unwrap_or("Client");
        let label = format!("Facture vente {number} - {client}");
        let period_id = self.period_id(date, lookup).await?;

        let mut builder = EntryBuilder::new(
            date,
            JournalCode::Sales,
            format!("FV-{number}"),
            label,
            doc_ref.clone(),
            period_id,
        )
        .absorb_residual(self.max_residual.clone())
        .debit(&self.accounts.customers, client, &total_ttc)
        .credit(&self.accounts.sales_revenue, "Ventes de marchandises", total_ht);
        if let Some(rate) = vat_rate {
            builder = builder.line(
                EntryLine::credit(
                    self.accounts.vat_collected.as_str(),
                    "TVA collectée",
                    round_amount(&total_tva),
                )
                .with_vat_rate(rate),
            );
        }
        builder.build()
    }

    /// Purchases: D purchases (HT) / D VAT deductible / C suppliers (TTC)
    async fn purchase_invoice_entry(
        &mut self,
        invoice: &PurchaseInvoice,
        doc_ref: &DocumentRef,
        lookup: PeriodLookup,
    ) -> LedgerResult<JournalEntry> {
        let number = required(&invoice.number, doc_ref, "number")?;
        let date = *required(&invoice.date, doc_ref, "date")?;
        let total_ht = required(&invoice.total_ht, doc_ref, "total_ht")?;
        let (total_tva, total_ttc) = invoice_amounts(
            total_ht,
            invoice.total_tva.as_ref(),
            invoice.total_ttc.as_ref(),
            invoice.vat_rate.as_ref(),
        );
        let vat_rate = self.vat_rate(invoice.vat_rate.as_ref(), &total_tva, doc_ref)?;

        let supplier = invoice.supplier_name.as_deref().unwrap_or("Fournisseur");
        let label = format!("Facture achat {number} - {supplier}");
        let period_id = self.period_id(date, lookup).await?;

        let mut builder = EntryBuilder::new(
            date,
            JournalCode::Purchases,
            format!("FA-{number}"),
            label,
            doc_ref.clone(),
            period_id,
        )
        .absorb_residual(self.max_residual.clone())
        .debit(&self.accounts.purchases, "Achats de marchandises", total_ht);
        if let Some(rate) = vat_rate {
            builder = builder.line(
                EntryLine::debit(
                    self.accounts.vat_deductible.as_str(),
                    "TVA déductible",
                    round_amount(&total_tva),
                )
                .with_vat_rate(rate),
            );
        }
        builder
            .credit(&self.accounts.suppliers, supplier, &total_ttc)
            .build()
    }

    /// Inbound: D treasury / C customers. Outbound: D suppliers / C treasury.
    async fn payment_entry(
        &mut self,
        payment: &Payment,
        doc_ref: &DocumentRef,
        lookup: PeriodLookup,
    ) -> LedgerResult<JournalEntry> {
        let date = *required(&payment.date, doc_ref, "date")?;
        let amount = required(&payment.amount, doc_ref, "amount")?;
        if *amount <= BigDecimal::from(0) {
            return Err(LedgerError::InvalidEntry(format!(
                "Payment {} has a non-positive amount",
                payment.id
            )));
        }

        let period_id = self.period_id(date, lookup).await?;
        let treasury = match payment.mode {
            PaymentMode::Bank => self.accounts.bank.as_str(),
            PaymentMode::Cash => self.accounts.cash.as_str(),
        };
        let reference = payment.reference.as_deref().unwrap_or(&payment.id);

        let (label, debit, credit) = match payment.direction {
            PaymentDirection::Inbound => (
                format!("Paiement client {reference}"),
                (treasury, "Encaissement"),
                (self.accounts.customers.as_str(), "Règlement client"),
            ),
            PaymentDirection::Outbound => (
                format!("Paiement fournisseur {reference}"),
                (self.accounts.suppliers.as_str(), "Règlement fournisseur"),
                (treasury, "Décaissement"),
            ),
        };

        EntryBuilder::new(
            date,
            JournalCode::Bank,
            format!("PAY-{}", short_id(&payment.id)),
            label,
            doc_ref.clone(),
            period_id,
        )
        .linked_document(payment.invoice_ref())
        .debit(debit.0, debit.1, amount)
        .credit(credit.0, credit.1, amount)
        .build()
    }

    /// Paid charges only: D expense account by category / C bank
    async fn charge_entry(
        &mut self,
        charge: &Charge,
        doc_ref: &DocumentRef,
        lookup: PeriodLookup,
    ) -> LedgerResult<Option<JournalEntry>> {
        if !charge.paid {
            debug!(charge = %charge.id, "unpaid charge, nothing to post");
            return Ok(None);
        }
        let date = *required(&charge.payment_date, doc_ref, "payment_date")?;
        let amount = required(&charge.amount, doc_ref, "amount")?;

        let account = charge_account(charge.category.as_deref(), &self.accounts.default_charge).to_owned();
        let label = charge
            .label
            .clone()
            .unwrap_or_else(|| format!("Charge {}", short_id(&charge.id)));
        let period_id = self.period_id(date, lookup).await?;

        EntryBuilder::new(
            date,
            JournalCode::Misc,
            format!("CHG-{}", short_id(&charge.id)),
            label.clone(),
            doc_ref.clone(),
            period_id,
        )
        .tax_deductible(charge.deductible)
        .debit(&account, &label, amount)
        .credit(&self.accounts.bank, "Paiement charge", amount)
        .build()
        .map(Some)
    }

    /// Rate bracket carried by the VAT line, `None` when there is no VAT
    fn vat_rate(
        &self,
        rate: Option<&BigDecimal>,
        total_tva: &BigDecimal,
        doc_ref: &DocumentRef,
    ) -> LedgerResult<Option<BigDecimal>> {
        if let Some(rate) = rate {
            if !self.vat.is_known_rate(rate) {
                return Err(LedgerError::UnknownVatRate(rate.clone()));
            }
        }
        if round_amount(total_tva) <= BigDecimal::from(0) {
            return Ok(None);
        }
        match rate {
            Some(rate) => Ok(Some(rate.clone())),
            None => Err(LedgerError::MissingField {
                document: doc_ref.clone(),
                field: "vat_rate",
            }),
        }
    }

    /// Post the entry of a document that has none yet.
    ///
    /// Returns `None` when the document produces no entry.
    pub async fn record(&mut self, document: &SourceDocument) -> LedgerResult<Option<JournalEntry>> {
        let Some(entry) = self.build_entry(document, PeriodLookup::CreateMissing).await? else {
            return Ok(None);
        };
        self.ledger.append(&entry).await?;
        Ok(Some(entry))
    }

    /// Bring the ledger in line with the current state of a document.
    ///
    /// Creates the entry if absent, leaves it alone if unchanged, and
    /// otherwise supersedes it. Posted entries are never edited in place.
    ///
    /// When the document no longer produces an entry, the entry is
    /// reversed on its own date, or at the start of the next open period
    /// once its period is closed. With no such period this fails
    /// `PeriodClosed`; [`Self::cancel_document`] takes an explicit date.
    pub async fn sync_document(&mut self, document: &SourceDocument) -> LedgerResult<SyncOutcome> {
        let doc_ref = document.doc_ref();
        let active = self.ledger.active_entry_for(&doc_ref).await?;
        let generated = self
            .build_entry(document, PeriodLookup::CreateMissing)
            .await?;

        match (active, generated) {
            (None, None) => Ok(SyncOutcome::Skipped),
            (None, Some(entry)) => {
                self.ledger.append(&entry).await?;
                Ok(SyncOutcome::Created(entry))
            }
            (Some(active), None) => {
                let date = self.ledger.reversal_date(&active).await?;
                let reversal = self.ledger.reverse(&active.id, date).await?;
                Ok(SyncOutcome::Cancelled(reversal))
            }
            (Some(active), Some(entry)) if same_postings(&active, &entry) => {
                debug!(source = %doc_ref, "document unchanged");
                Ok(SyncOutcome::Unchanged(active))
            }
            (Some(active), Some(entry)) => {
                let (reversal, replacement) = self.ledger.supersede(&active.id, entry).await?;
                Ok(SyncOutcome::Superseded {
                    reversal,
                    replacement,
                })
            }
        }
    }

    /// Reverse the active entry of a deleted document, dated `date`
    pub async fn cancel_document(
        &mut self,
        doc_ref: &DocumentRef,
        date: NaiveDate,
    ) -> LedgerResult<Option<JournalEntry>> {
        match self.ledger.active_entry_for(doc_ref).await? {
            Some(active) => self.ledger.reverse(&active.id, date).await.map(Some),
            None => Ok(None),
        }
    }

    /// Post every document of `source` that has no entry yet.
    ///
    /// A failing document is recorded in the report and does not stop the
    /// run. Running it again creates nothing new.
    pub async fn regenerate_missing<D: DocumentSource + ?Sized>(
        &mut self,
        source: &D,
    ) -> LedgerResult<RegenerationReport> {
        let mut report = RegenerationReport::default();

        for doc_type in [
            DocumentType::SalesInvoice,
            DocumentType::PurchaseInvoice,
            DocumentType::Payment,
            DocumentType::Charge,
        ] {
            for document in source.list_documents(doc_type).await? {
                let doc_ref = document.doc_ref();
                if !self.ledger.entries_for(&doc_ref).await?.is_empty() {
                    report.skipped += 1;
                    continue;
                }
                match self.record(&document).await {
                    Ok(Some(_)) => report.record_created(doc_type),
                    Ok(None) => report.skipped += 1,
                    Err(error) => {
                        warn!(document = %doc_ref, %error, "could not generate journal entry");
                        report.errors.push(RegenerationError {
                            doc_type,
                            id: doc_ref.id,
                            reason: error.to_string(),
                        });
                    }
                }
            }
        }

        info!(
            created = report.total_created(),
            skipped = report.skipped,
            errors = report.errors.len(),
            "missing journal entries regenerated"
        );
        Ok(report)
    }

    pub fn ledger(&self) -> &Ledger<S> {
        &self.ledger
    }
}

/// Whether two entries post the same amounts the same way
fn same_postings(a: &JournalEntry, b: &JournalEntry) -> bool {
    a.date == b.date
        && a.journal == b.journal
        && a.piece_number == b.piece_number
        && a.label == b.label
        && a.lines == b.lines
        && a.linked_document == b.linked_document
        && a.tax_deductible == b.tax_deductible
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::account::ChartOfAccounts;
    use crate::ledger::period::FiscalPeriodManager;
    use crate::utils::MemoryStorage;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    async fn generator() -> (MemoryStorage, JournalEntryGenerator<MemoryStorage>) {
        let storage = MemoryStorage::new();
        ChartOfAccounts::new(storage.clone()).initialize().await.unwrap();
        let mut periods = FiscalPeriodManager::new(storage.clone());
        periods.get_or_create_current(date(2024, 1, 1)).await.unwrap();
        let ledger = Ledger::new(storage.clone(), periods);
        let generator = JournalEntryGenerator::new(ledger, &EngineConfig::default());
        (storage, generator)
    }

    fn sales_invoice(id: &str, ht: &str, tva: &str, ttc: &str) -> SalesInvoice {
        SalesInvoice {
            id: id.to_string(),
            number: Some("2024-001".to_string()),
            date: Some(date(2024, 1, 15)),
            client_name: Some("Atlas SARL".to_string()),
            total_ht: Some(dec(ht)),
            total_tva: Some(dec(tva)),
            total_ttc: Some(dec(ttc)),
            vat_rate: Some(BigDecimal::from(20)),
        }
    }

    #[test]
    fn test_builder_absorbs_small_residual() {
        let entry = EntryBuilder::new(
            date(2024, 1, 1),
            JournalCode::Sales,
            "FV-1".into(),
            "Vente".into(),
            DocumentRef::new(DocumentType::SalesInvoice, "f"),
            "p".into(),
        )
        .absorb_residual(dec("0.05"))
        .debit("41111", "Client", &dec("100.01"))
        .credit("7121", "Vente", &dec("83.34"))
        .credit("4457", "TVA", &dec("16.66"))
        .build()
        .unwrap();
        assert_eq!(entry.lines[2].amount, dec("16.67"));
        assert!(entry.is_balanced());
    }

    #[test]
    fn test_builder_rejects_large_residual() {
        let err = EntryBuilder::new(
            date(2024, 1, 1),
            JournalCode::Sales,
            "FV-1".into(),
            "Vente".into(),
            DocumentRef::new(DocumentType::SalesInvoice, "f"),
            "p".into(),
        )
        .absorb_residual(dec("0.05"))
        .debit("41111", "Client", &dec("101"))
        .credit("7121", "Vente", &dec("100"))
        .build()
        .unwrap_err();
        assert!(matches!(err, LedgerError::UnbalancedEntry { .. }));
    }

    #[test]
    fn test_charge_category_lookup() {
        assert_eq!(charge_account(Some("Loyer"), "6131"), "6132");
        assert_eq!(charge_account(Some(" salaires "), "6131"), "6171");
        assert_eq!(charge_account(Some("Électricité"), "6131"), "6138");
        assert_eq!(charge_account(Some("Fournitures"), "6131"), "6131");
        assert_eq!(charge_account(None, "6131"), "6131");
    }

    #[tokio::test]
    async fn test_sales_invoice_mapping() {
        let (_, mut generator) = generator().await;
        let doc = SourceDocument::from(sales_invoice("inv-1", "1000", "200", "1200"));
        let entry = generator.generate(&doc).await.unwrap().unwrap();

        assert_eq!(entry.journal, JournalCode::Sales);
        assert_eq!(entry.piece_number, "FV-2024-001");
        let lines: Vec<(&str, EntryType, BigDecimal)> = entry
            .lines
            .iter()
            .map(|l| (l.account_code.as_str(), l.entry_type, l.amount.clone()))
            .collect();
        assert_eq!(
            lines,
            vec![
                ("41111", EntryType::Debit, BigDecimal::from(1200)),
                ("7121", EntryType::Credit, BigDecimal::from(1000)),
                ("4457", EntryType::Credit, BigDecimal::from(200)),
            ]
        );
        assert_eq!(entry.lines[2].vat_rate, Some(BigDecimal::from(20)));
    }

    #[tokio::test]
    async fn test_vat_and_ttc_derived_from_ht() {
        let (_, mut generator) = generator().await;

        let mut invoice = sales_invoice("inv-ht", "1000", "0", "0");
        invoice.total_tva = None;
        invoice.total_ttc = None;
        let entry = generator.generate(&invoice.into()).await.unwrap().unwrap();
        let amounts: Vec<BigDecimal> = entry.lines.iter().map(|l| l.amount.clone()).collect();
        assert_eq!(amounts, vec![dec("1200"), dec("1000"), dec("200")]);

        let mut invoice = sales_invoice("inv-tva", "1000", "200", "0");
        invoice.total_ttc = None;
        let entry = generator.generate(&invoice.into()).await.unwrap().unwrap();
        assert_eq!(entry.lines[0].amount, dec("1200"));

        let mut invoice = sales_invoice("inv-cents", "83.33", "0", "0");
        invoice.total_tva = None;
        invoice.total_ttc = None;
        let entry = generator.generate(&invoice.into()).await.unwrap().unwrap();
        assert_eq!(entry.lines[2].amount, dec("16.67"));
        assert_eq!(entry.total_debits(), dec("100.00"));
        assert!(entry.is_balanced());
    }

    #[test]
    fn test_invoice_amounts_prefers_given_values() {
        let (tva, ttc) = invoice_amounts(&dec("1000"), None, Some(&dec("1100")), Some(&dec("20")));
        assert_eq!(tva, dec("100"));
        assert_eq!(ttc, dec("1100"));

        let (tva, ttc) = invoice_amounts(&dec("1000"), None, None, None);
        assert_eq!(tva, dec("0"));
        assert_eq!(ttc, dec("1000"));
    }

    #[tokio::test]
    async fn test_generate_writes_nothing() {
        let storage = MemoryStorage::new();
        ChartOfAccounts::new(storage.clone()).initialize().await.unwrap();
        let periods = FiscalPeriodManager::new(storage.clone());
        let ledger = Ledger::new(storage.clone(), periods);
        let mut generator = JournalEntryGenerator::new(ledger, &EngineConfig::default());

        let doc = SourceDocument::from(sales_invoice("inv-dry", "1000", "200", "1200"));
        let err = generator.generate(&doc).await.unwrap_err();
        assert!(matches!(err, LedgerError::PeriodNotFound(_)));
        assert!(storage.list_periods().await.unwrap().is_empty());

        let entry = generator.record(&doc).await.unwrap().unwrap();
        assert_eq!(storage.list_periods().await.unwrap().len(), 1);
        assert_eq!(storage.entry_count().unwrap(), 1);
        assert!(generator.generate(&doc).await.unwrap().is_some());
        assert_eq!(entry.date, date(2024, 1, 15));
    }

    #[tokio::test]
    async fn test_unpaid_charge_after_close_reverses_in_next_period() {
        let (storage, mut generator) = generator().await;
        let mut charge = Charge {
            id: "chg-7".to_string(),
            label: Some("Assurance".to_string()),
            category: Some("ASSURANCE".to_string()),
            amount: Some(BigDecimal::from(900)),
            paid: true,
            payment_date: Some(date(2024, 11, 30)),
            deductible: true,
        };
        generator.sync_document(&charge.clone().into()).await.unwrap();

        let mut periods = generator.ledger().periods().clone();
        let p2024 = periods.period_for_date(date(2024, 11, 30)).await.unwrap().unwrap();
        periods.close(&p2024.id).await.unwrap();

        charge.paid = false;
        let err = generator
            .sync_document(&charge.clone().into())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::PeriodClosed { .. }));

        periods.get_or_create_current(date(2025, 2, 1)).await.unwrap();
        let outcome = generator.sync_document(&charge.into()).await.unwrap();
        let SyncOutcome::Cancelled(reversal) = outcome else {
            panic!("expected a reversal");
        };
        assert_eq!(reversal.date, date(2025, 1, 1));
        let insurance = storage.get_account("6133").await.unwrap().unwrap();
        assert_eq!(insurance.solde(), BigDecimal::from(0));
    }

    #[tokio::test]
    async fn test_zero_vat_invoice_has_no_vat_line() {
        let (_, mut generator) = generator().await;
        let mut invoice = sales_invoice("inv-0", "500", "0", "500");
        invoice.vat_rate = Some(BigDecimal::from(0));
        let entry = generator
            .generate(&invoice.into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.lines.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_field_and_unknown_rate() {
        let (_, mut generator) = generator().await;

        let mut invoice = sales_invoice("inv-2", "1000", "200", "1200");
        invoice.date = None;
        let err = generator.generate(&invoice.into()).await.unwrap_err();
        assert!(matches!(err, LedgerError::MissingField { field: "date", .. }));

        let mut invoice = sales_invoice("inv-3", "1000", "180", "1180");
        invoice.vat_rate = Some(BigDecimal::from(18));
        let err = generator.generate(&invoice.into()).await.unwrap_err();
        assert!(matches!(err, LedgerError::UnknownVatRate(_)));
        assert_eq!(err.kind(), ErrorKind::Invalid);
    }

    #[tokio::test]
    async fn test_purchase_and_payment_mapping() {
        let (_, mut generator) = generator().await;
        let invoice = PurchaseInvoice {
            id: "fa-1".to_string(),
            number: Some("A-77".to_string()),
            date: Some(date(2024, 2, 3)),
            supplier_name: Some("Fournisseur".to_string()),
            total_ht: Some(BigDecimal::from(400)),
            total_tva: Some(BigDecimal::from(80)),
            total_ttc: Some(BigDecimal::from(480)),
            vat_rate: Some(BigDecimal::from(20)),
        };
        let entry = generator.generate(&invoice.into()).await.unwrap().unwrap();
        assert_eq!(entry.piece_number, "FA-A-77");
        assert_eq!(entry.lines[0].account_code, "6114");
        assert_eq!(entry.lines[1].account_code, "4456");
        assert_eq!(entry.lines[2].account_code, "44111");
        assert_eq!(entry.lines[2].amount, BigDecimal::from(480));

        let payment = Payment {
            id: "0123456789abcdef".to_string(),
            date: Some(date(2024, 2, 20)),
            amount: Some(BigDecimal::from(480)),
            direction: PaymentDirection::Outbound,
            mode: PaymentMode::Cash,
            invoice_id: Some("fa-1".to_string()),
            reference: None,
        };
        let entry = generator.generate(&payment.into()).await.unwrap().unwrap();
        assert_eq!(entry.piece_number, "PAY-01234567");
        assert_eq!(entry.journal, JournalCode::Bank);
        assert_eq!(entry.lines[0].account_code, "44111");
        assert_eq!(entry.lines[1].account_code, "5161");
        assert_eq!(
            entry.linked_document,
            Some(DocumentRef::new(DocumentType::PurchaseInvoice, "fa-1"))
        );
    }

    #[tokio::test]
    async fn test_unpaid_charge_is_not_posted() {
        let (_, mut generator) = generator().await;
        let mut charge = Charge {
            id: "chg-1".to_string(),
            label: Some("Loyer janvier".to_string()),
            category: Some("LOYER".to_string()),
            amount: Some(BigDecimal::from(5000)),
            paid: false,
            payment_date: None,
            deductible: true,
        };
        let doc: SourceDocument = charge.clone().into();
        assert!(generator.generate(&doc).await.unwrap().is_none());

        charge.paid = true;
        charge.payment_date = Some(date(2024, 1, 31));
        let entry = generator.generate(&charge.into()).await.unwrap().unwrap();
        assert_eq!(entry.journal, JournalCode::Misc);
        assert_eq!(entry.lines[0].account_code, "6132");
        assert_eq!(entry.lines[1].account_code, "5141");
    }

    #[tokio::test]
    async fn test_sync_document_supersedes_changes() {
        let (storage, mut generator) = generator().await;
        let invoice = sales_invoice("inv-9", "1000", "200", "1200");

        let outcome = generator.sync_document(&invoice.clone().into()).await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Created(_)));
        let outcome = generator.sync_document(&invoice.clone().into()).await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Unchanged(_)));

        let amended = sales_invoice("inv-9", "2000", "400", "2400");
        let outcome = generator.sync_document(&amended.into()).await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Superseded { .. }));

        let revenue = storage.get_account("7121").await.unwrap().unwrap();
        assert_eq!(revenue.solde(), BigDecimal::from(2000));
        assert_eq!(storage.entry_count().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_regenerate_missing_reports_per_document() {
        let (_, mut generator) = generator().await;
        let mut broken = sales_invoice("inv-bad", "1000", "200", "1200");
        broken.number = None;
        let documents: Vec<SourceDocument> = vec![
            sales_invoice("inv-1", "1000", "200", "1200").into(),
            broken.into(),
        ];

        let report = generator.regenerate_missing(&documents).await.unwrap();
        assert_eq!(report.sales_invoices, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].id, "inv-bad");

        let again = generator.regenerate_missing(&documents).await.unwrap();
        assert_eq!(again.total_created(), 0);
        assert_eq!(again.skipped, 1);
        assert_eq!(again.errors.len(), 1);
    }
}
