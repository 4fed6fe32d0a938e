//! Traits for storage abstraction and extensibility

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::documents::SourceDocument;
use crate::tax::vat::VatReturn;
use crate::types::*;

/// Storage abstraction for the ledger
///
/// Implementations are cheap handles onto one shared datastore: every
/// component of an [`crate::AccountingEngine`] holds its own clone and sees
/// the writes of the others.
#[async_trait]
pub trait LedgerStorage: Send + Sync {
    /// Save a new account
    async fn save_account(&mut self, account: &Account) -> LedgerResult<()>;

    /// Get an account by code
    async fn get_account(&self, code: &str) -> LedgerResult<Option<Account>>;

    /// List all accounts, optionally filtered by type
    async fn list_accounts(&self, account_type: Option<AccountType>) -> LedgerResult<Vec<Account>>;

    /// Update an existing account
    async fn update_account(&mut self, account: &Account) -> LedgerResult<()>;

    /// Store an entry and add its lines to the running totals of the
    /// accounts it touches, as one atomic step.
    async fn append_entry(&mut self, entry: &JournalEntry) -> LedgerResult<()>;

    /// Get an entry by id
    async fn get_entry(&self, entry_id: &str) -> LedgerResult<Option<JournalEntry>>;

    /// List entries matching a filter, in no particular order
    async fn get_entries(&self, filter: &EntryFilter) -> LedgerResult<Vec<JournalEntry>>;

    /// One page of the entries matching a filter, in journal order (date,
    /// piece number, then insertion), with the total match count
    async fn get_entries_page(
        &self,
        filter: &EntryFilter,
        page: PageRequest,
    ) -> LedgerResult<Page<JournalEntry>>;

    /// All entries generated from a document, reversals included
    async fn find_entries_by_source(&self, source: &DocumentRef) -> LedgerResult<Vec<JournalEntry>>;

    /// Replace the reconciliation flags of an entry; the only mutation an
    /// appended entry accepts
    async fn update_reconciliation(
        &mut self,
        entry_id: &str,
        flags: &ReconciliationFlags,
    ) -> LedgerResult<()>;

    /// Accounts and matching entries read in one consistent view
    async fn snapshot(&self, filter: &EntryFilter) -> LedgerResult<LedgerSnapshot>;

    /// Save a new fiscal period
    async fn save_period(&mut self, period: &FiscalPeriod) -> LedgerResult<()>;

    /// Get a fiscal period by id
    async fn get_period(&self, period_id: &str) -> LedgerResult<Option<FiscalPeriod>>;

    /// List all fiscal periods
    async fn list_periods(&self) -> LedgerResult<Vec<FiscalPeriod>>;

    /// Update an existing fiscal period
    async fn update_period(&mut self, period: &FiscalPeriod) -> LedgerResult<()>;
}

/// Storage for VAT returns
#[async_trait]
pub trait VatReturnStorage: Send + Sync {
    async fn save_vat_return(&mut self, vat_return: &VatReturn) -> LedgerResult<()>;

    async fn get_vat_return(&self, id: &str) -> LedgerResult<Option<VatReturn>>;

    /// The return of a given month, if any
    async fn find_vat_return(&self, month: u32, year: i32) -> LedgerResult<Option<VatReturn>>;

    async fn list_vat_returns(&self, year: i32) -> LedgerResult<Vec<VatReturn>>;

    async fn update_vat_return(&mut self, vat_return: &VatReturn) -> LedgerResult<()>;
}

/// Read access to the business documents entries are generated from
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Every known document of a type
    async fn list_documents(&self, doc_type: DocumentType) -> LedgerResult<Vec<SourceDocument>>;
}

#[async_trait]
impl DocumentSource for Vec<SourceDocument> {
    async fn list_documents(&self, doc_type: DocumentType) -> LedgerResult<Vec<SourceDocument>> {
        Ok(self
            .iter()
            .filter(|doc| doc.doc_type() == doc_type)
            .cloned()
            .collect())
    }
}

/// Accounts and entries captured together
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub accounts: Vec<Account>,
    pub entries: Vec<JournalEntry>,
}

/// Trait for implementing custom entry validation rules
pub trait EntryValidator: Send + Sync {
    /// Validate an entry before it is appended
    fn validate_entry(&self, entry: &JournalEntry) -> LedgerResult<()>;
}

/// Default entry validator with the double-entry rules only
pub struct DefaultEntryValidator;

impl EntryValidator for DefaultEntryValidator {
    fn validate_entry(&self, entry: &JournalEntry) -> LedgerResult<()> {
        entry.validate()
    }
}
