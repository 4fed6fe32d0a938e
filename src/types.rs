//! Core types and data structures for the accounting engine

use bigdecimal::{BigDecimal, RoundingMode};
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of decimals of the smallest currency unit
pub const AMOUNT_SCALE: i64 = 2;

/// Round an amount half-up to the smallest currency unit
pub fn round_amount(amount: &BigDecimal) -> BigDecimal {
    amount.with_scale_round(AMOUNT_SCALE, RoundingMode::HalfUp)
}

/// Account types of the chart of accounts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountType {
    /// Fixed assets, stocks and receivables (classes 2, 3 and part of 4)
    Asset,
    /// Equity and debts (class 1 and part of 4)
    Liability,
    /// Charges (class 6)
    Expense,
    /// Products (class 7)
    Revenue,
    /// Bank and cash (class 5)
    Treasury,
}

impl AccountType {
    /// Returns the side on which this account type reports a positive solde.
    /// Treasury follows the asset convention.
    pub fn normal_balance(&self) -> EntryType {
        match self {
            AccountType::Asset | AccountType::Expense | AccountType::Treasury => EntryType::Debit,
            AccountType::Liability | AccountType::Revenue => EntryType::Credit,
        }
    }

    /// Signed solde of debit/credit totals under this type's convention
    pub fn solde(&self, total_debit: &BigDecimal, total_credit: &BigDecimal) -> BigDecimal {
        match self.normal_balance() {
            EntryType::Debit => total_debit - total_credit,
            EntryType::Credit => total_credit - total_debit,
        }
    }
}

/// Side of an entry line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryType {
    Debit,
    Credit,
}

impl EntryType {
    pub fn opposite(&self) -> EntryType {
        match self {
            EntryType::Debit => EntryType::Credit,
            EntryType::Credit => EntryType::Debit,
        }
    }
}

/// An account of the chart with its running totals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Unique account code (e.g. "4457")
    pub code: String,
    /// Human-readable label
    pub label: String,
    /// Accounting class, 1 to 7
    pub class: u8,
    pub account_type: AccountType,
    /// Collective account this one is a sub-account of
    pub parent_code: Option<String>,
    /// Running debit total over every appended entry
    pub total_debit: BigDecimal,
    /// Running credit total over every appended entry
    pub total_credit: BigDecimal,
    /// Inactive accounts refuse new postings
    pub active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Account {
    /// Create a new active account with zero totals
    pub fn new(
        code: String,
        label: String,
        class: u8,
        account_type: AccountType,
        parent_code: Option<String>,
    ) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            code,
            label,
            class,
            account_type,
            parent_code,
            total_debit: BigDecimal::from(0),
            total_credit: BigDecimal::from(0),
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Signed balance following the account type's convention
    pub fn solde(&self) -> BigDecimal {
        self.account_type
            .solde(&self.total_debit, &self.total_credit)
    }

    /// Add a line amount to the running totals
    pub fn apply_line(&mut self, entry_type: EntryType, amount: &BigDecimal) {
        match entry_type {
            EntryType::Debit => self.total_debit += amount,
            EntryType::Credit => self.total_credit += amount,
        }
        self.updated_at = chrono::Utc::now().naive_utc();
    }
}

/// Journals entries are booked into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JournalCode {
    Sales,
    Purchases,
    Misc,
    Bank,
}

impl JournalCode {
    /// Short journal code printed on exports
    pub fn code(&self) -> &'static str {
        match self {
            JournalCode::Sales => "VT",
            JournalCode::Purchases => "AC",
            JournalCode::Misc => "OD",
            JournalCode::Bank => "BQ",
        }
    }
}

/// Kinds of source documents that produce entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentType {
    SalesInvoice,
    PurchaseInvoice,
    Payment,
    Charge,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::SalesInvoice => "SALES_INVOICE",
            DocumentType::PurchaseInvoice => "PURCHASE_INVOICE",
            DocumentType::Payment => "PAYMENT",
            DocumentType::Charge => "CHARGE",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to the document an entry was generated from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentRef {
    pub doc_type: DocumentType,
    pub id: String,
}

impl DocumentRef {
    pub fn new(doc_type: DocumentType, id: impl Into<String>) -> Self {
        Self {
            doc_type,
            id: id.into(),
        }
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.doc_type, self.id)
    }
}

/// One debit or credit line of a journal entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryLine {
    pub account_code: String,
    pub label: String,
    pub entry_type: EntryType,
    /// Always positive
    pub amount: BigDecimal,
    /// VAT rate bracket (percent) carried by VAT lines
    pub vat_rate: Option<BigDecimal>,
}

impl EntryLine {
    pub fn new(
        account_code: String,
        label: String,
        entry_type: EntryType,
        amount: BigDecimal,
    ) -> Self {
        Self {
            account_code,
            label,
            entry_type,
            amount,
            vat_rate: None,
        }
    }

    /// Create a debit line
    pub fn debit(account_code: impl Into<String>, label: impl Into<String>, amount: BigDecimal) -> Self {
        Self::new(account_code.into(), label.into(), EntryType::Debit, amount)
    }

    /// Create a credit line
    pub fn credit(account_code: impl Into<String>, label: impl Into<String>, amount: BigDecimal) -> Self {
        Self::new(account_code.into(), label.into(), EntryType::Credit, amount)
    }

    pub fn with_vat_rate(mut self, rate: BigDecimal) -> Self {
        self.vat_rate = Some(rate);
        self
    }

    pub fn debit_amount(&self) -> BigDecimal {
        match self.entry_type {
            EntryType::Debit => self.amount.clone(),
            EntryType::Credit => BigDecimal::from(0),
        }
    }

    pub fn credit_amount(&self) -> BigDecimal {
        match self.entry_type {
            EntryType::Credit => self.amount.clone(),
            EntryType::Debit => BigDecimal::from(0),
        }
    }
}

/// Lettering (third-party matching) and pointing (bank statement matching) marks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationFlags {
    pub lettered: bool,
    pub pointed: bool,
}

/// A balanced journal entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: String,
    pub date: NaiveDate,
    pub journal: JournalCode,
    pub piece_number: String,
    pub label: String,
    pub lines: Vec<EntryLine>,
    pub source: DocumentRef,
    /// Fiscal period the entry is booked in
    pub period_id: String,
    pub reconciliation: ReconciliationFlags,
    /// Invoice settled by a payment entry
    pub linked_document: Option<DocumentRef>,
    /// False for charges excluded from the taxable result
    pub tax_deductible: bool,
    /// Set on contra entries cancelling another entry
    pub reverses: Option<String>,
    /// Set on replacement entries after a document change
    pub supersedes: Option<String>,
    pub created_at: NaiveDateTime,
}

impl JournalEntry {
    /// Create an empty entry; lines are added through [`crate::EntryBuilder`]
    pub fn new(
        date: NaiveDate,
        journal: JournalCode,
        piece_number: String,
        label: String,
        source: DocumentRef,
        period_id: String,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            date,
            journal,
            piece_number,
            label,
            lines: Vec::new(),
            source,
            period_id,
            reconciliation: ReconciliationFlags::default(),
            linked_document: None,
            tax_deductible: true,
            reverses: None,
            supersedes: None,
            created_at: chrono::Utc::now().naive_utc(),
        }
    }

    pub fn total_debits(&self) -> BigDecimal {
        self.lines
            .iter()
            .filter(|l| l.entry_type == EntryType::Debit)
            .map(|l| &l.amount)
            .sum()
    }

    pub fn total_credits(&self) -> BigDecimal {
        self.lines
            .iter()
            .filter(|l| l.entry_type == EntryType::Credit)
            .map(|l| &l.amount)
            .sum()
    }

    pub fn is_balanced(&self) -> bool {
        self.total_debits() == self.total_credits()
    }

    /// Whether any line posts to the account
    pub fn touches(&self, account_code: &str) -> bool {
        self.lines.iter().any(|l| l.account_code == account_code)
    }

    /// Structural validation: two lines or more, positive cent amounts, debit = credit
    pub fn validate(&self) -> LedgerResult<()> {
        if self.lines.len() < 2 {
            return Err(LedgerError::InvalidEntry(
                "Entry must have at least two lines for double-entry bookkeeping".to_string(),
            ));
        }

        for line in &self.lines {
            if line.amount <= BigDecimal::from(0) {
                return Err(LedgerError::InvalidEntry(format!(
                    "Line amounts must be positive (account {})",
                    line.account_code
                )));
            }
            if round_amount(&line.amount) != line.amount {
                return Err(LedgerError::InvalidEntry(format!(
                    "Line amount {} on account {} is finer than the smallest currency unit",
                    line.amount, line.account_code
                )));
            }
        }

        if !self.is_balanced() {
            return Err(LedgerError::UnbalancedEntry {
                debit: self.total_debits(),
                credit: self.total_credits(),
            });
        }

        Ok(())
    }

    /// Contra entry swapping every line, dated `date` in `period_id`
    pub fn reversal(&self, date: NaiveDate, period_id: String) -> JournalEntry {
        let mut reversal = JournalEntry::new(
            date,
            self.journal,
            format!("ANN-{}", self.piece_number),
            format!("Annulation {}", self.label),
            self.source.clone(),
            period_id,
        );
        reversal.lines = self
            .lines
            .iter()
            .map(|l| EntryLine {
                entry_type: l.entry_type.opposite(),
                ..l.clone()
            })
            .collect();
        reversal.linked_document = self.linked_document.clone();
        reversal.tax_deductible = self.tax_deductible;
        reversal.reverses = Some(self.id.clone());
        reversal
    }
}

/// Status of a fiscal period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeriodStatus {
    Open,
    Closed,
}

/// A fiscal period (exercice)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiscalPeriod {
    pub id: String,
    /// "2024", or "2024-2025" for a period spanning two calendar years
    pub code: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: PeriodStatus,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl FiscalPeriod {
    pub fn new(code: String, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            code,
            start_date,
            end_date,
            status: PeriodStatus::Open,
            created_at: now,
            updated_at: now,
        }
    }

    /// Code derived from the calendar years the bounds fall in
    pub fn code_for(start_date: NaiveDate, end_date: NaiveDate) -> String {
        if start_date.year() == end_date.year() {
            start_date.year().to_string()
        } else {
            format!("{}-{}", start_date.year(), end_date.year())
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PeriodStatus::Open
    }

    pub fn contains_date(&self, date: NaiveDate) -> bool {
        date >= self.start_date && date <= self.end_date
    }

    pub fn overlaps(&self, start_date: NaiveDate, end_date: NaiveDate) -> bool {
        start_date <= self.end_date && end_date >= self.start_date
    }

    pub fn range(&self) -> DateRange {
        DateRange::between(self.start_date, self.end_date)
    }
}

/// Inclusive date range; open bounds are unbounded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn between(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    pub fn until(end: NaiveDate) -> Self {
        Self {
            start: None,
            end: Some(end),
        }
    }

    /// Calendar month `month` of `year`
    pub fn month(year: i32, month: u32) -> LedgerResult<Self> {
        let start = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| LedgerError::Validation(format!("Invalid month {month}/{year}")))?;
        let next = if month == 12 {
            NaiveDate::from_ymd_opt(year + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(year, month + 1, 1)
        };
        let end = next
            .and_then(|d| d.pred_opt())
            .ok_or_else(|| LedgerError::Validation(format!("Invalid month {month}/{year}")))?;
        Ok(Self::between(start, end))
    }

    /// Calendar year `year`
    pub fn year(year: i32) -> LedgerResult<Self> {
        match (
            NaiveDate::from_ymd_opt(year, 1, 1),
            NaiveDate::from_ymd_opt(year, 12, 31),
        ) {
            (Some(start), Some(end)) => Ok(Self::between(start, end)),
            _ => Err(LedgerError::Validation(format!("Invalid year {year}"))),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.is_none_or(|s| date >= s) && self.end.is_none_or(|e| date <= e)
    }

    /// Narrow this range to the bounds of `other`
    pub fn intersect(&self, other: &DateRange) -> DateRange {
        let start = match (self.start, other.start) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        let end = match (self.end, other.end) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        DateRange { start, end }
    }
}

/// Filter for journal queries
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryFilter {
    pub range: DateRange,
    pub period_id: Option<String>,
    pub journal: Option<JournalCode>,
    pub account_code: Option<String>,
    pub source: Option<DocumentRef>,
}

impl EntryFilter {
    pub fn matches(&self, entry: &JournalEntry) -> bool {
        self.range.contains(entry.date)
            && self
                .period_id
                .as_ref()
                .is_none_or(|p| &entry.period_id == p)
            && self.journal.is_none_or(|j| entry.journal == j)
            && self
                .account_code
                .as_ref()
                .is_none_or(|code| entry.touches(code))
            && self.source.as_ref().is_none_or(|s| &entry.source == s)
    }
}

/// Page parameters for journal exports (1-indexed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 100,
        }
    }
}

impl PageRequest {
    pub fn offset(&self) -> usize {
        self.page.saturating_sub(1) as usize * self.per_page as usize
    }
}

/// One page of results with the total item count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total: usize,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> usize {
        if self.per_page == 0 {
            return 0;
        }
        self.total.div_ceil(self.per_page as usize).max(1)
    }

    pub fn has_next(&self) -> bool {
        (self.page as usize) < self.total_pages()
    }
}

/// Aggregated debit/credit/solde of one account over a range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub code: String,
    pub label: String,
    pub class: u8,
    pub account_type: AccountType,
    pub total_debit: BigDecimal,
    pub total_credit: BigDecimal,
    /// Signed following the account type's convention
    pub solde: BigDecimal,
}

impl AccountBalance {
    /// Debit minus credit, whatever the account type
    pub fn net_debit(&self) -> BigDecimal {
        &self.total_debit - &self.total_credit
    }
}

/// Trial balance over a range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialBalance {
    pub range: DateRange,
    pub period_id: Option<String>,
    pub balances: Vec<AccountBalance>,
    pub total_debits: BigDecimal,
    pub total_credits: BigDecimal,
    pub is_balanced: bool,
}

/// Broad error categories callers branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Invalid,
    /// Ledger data contradicts itself; never auto-corrected
    Integrity,
    Storage,
}

/// Errors that can occur in the accounting engine
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Account not found: {0}")]
    AccountNotFound(String),
    #[error("Journal entry not found: {0}")]
    EntryNotFound(String),
    #[error("Fiscal period not found: {0}")]
    PeriodNotFound(String),
    #[error("VAT return not found: {0}")]
    VatReturnNotFound(String),
    #[error("Fiscal period {period} is closed, no posting allowed on {date}")]
    PeriodClosed { period: String, date: NaiveDate },
    #[error("Fiscal period {0} is already closed")]
    PeriodAlreadyClosed(String),
    #[error("Fiscal period {existing} is still open")]
    PeriodStillOpen { existing: String },
    #[error("Fiscal period conflict: {0}")]
    PeriodConflict(String),
    #[error("{what} {id} cannot move from {from} to {to}")]
    InvalidTransition {
        what: &'static str,
        id: String,
        from: String,
        to: String,
    },
    #[error("A journal entry already exists for {0}")]
    DuplicateEntry(DocumentRef),
    #[error("Journal entry {0} is already reversed or is itself a reversal")]
    AlreadyReversed(String),
    #[error("Entry is not balanced: debits = {debit}, credits = {credit}")]
    UnbalancedEntry {
        debit: BigDecimal,
        credit: BigDecimal,
    },
    #[error("Invalid entry: {0}")]
    InvalidEntry(String),
    #[error("Document {document} is missing mandatory field '{field}'")]
    MissingField {
        document: DocumentRef,
        field: &'static str,
    },
    #[error("Unknown VAT rate bracket: {0}%")]
    UnknownVatRate(BigDecimal),
    #[error("Account {0} is inactive")]
    AccountInactive(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Corrupted chart seed: {0}")]
    SeedCorrupted(String),
    #[error("Balance sheet does not balance at {date}: actif = {actif}, passif = {passif}")]
    IntegrityViolation {
        date: NaiveDate,
        actif: BigDecimal,
        passif: BigDecimal,
    },
    #[error("Configuration error: {0}")]
    Config(String),
}

impl LedgerError {
    /// Category of the error for caller-side branching
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::AccountNotFound(_)
            | LedgerError::EntryNotFound(_)
            | LedgerError::PeriodNotFound(_)
            | LedgerError::VatReturnNotFound(_) => ErrorKind::NotFound,
            LedgerError::PeriodClosed { .. }
            | LedgerError::PeriodAlreadyClosed(_)
            | LedgerError::PeriodStillOpen { .. }
            | LedgerError::PeriodConflict(_)
            | LedgerError::InvalidTransition { .. }
            | LedgerError::DuplicateEntry(_)
            | LedgerError::AlreadyReversed(_) => ErrorKind::Conflict,
            LedgerError::UnbalancedEntry { .. }
            | LedgerError::InvalidEntry(_)
            | LedgerError::MissingField { .. }
            | LedgerError::UnknownVatRate(_)
            | LedgerError::AccountInactive(_)
            | LedgerError::Validation(_)
            | LedgerError::Config(_) => ErrorKind::Invalid,
            LedgerError::SeedCorrupted(_) | LedgerError::IntegrityViolation { .. } => {
                ErrorKind::Integrity
            }
            LedgerError::Storage(_) => ErrorKind::Storage,
        }
    }
}

impl From<config::ConfigError> for LedgerError {
    fn from(error: config::ConfigError) -> Self {
        LedgerError::Config(error.to_string())
    }
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;
