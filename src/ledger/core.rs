//! The ledger: appends balanced entries and answers journal inquiries

use bigdecimal::BigDecimal;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::ledger::period::{FiscalPeriodManager, PostingGuard};
use crate::traits::*;
use crate::types::*;

/// Main ledger that validates and records journal entries
#[derive(Clone)]
pub struct Ledger<S: LedgerStorage> {
    storage: S,
    periods: FiscalPeriodManager<S>,
    validator: Arc<dyn EntryValidator>,
    writer: Arc<Mutex<()>>,
}

impl<S: LedgerStorage + Clone> Ledger<S> {
    /// Create a new ledger with the given storage backend
    pub fn new(storage: S, periods: FiscalPeriodManager<S>) -> Self {
        Self::with_validator(storage, periods, Arc::new(DefaultEntryValidator))
    }

    /// Create a new ledger with a custom entry validator
    pub fn with_validator(
        storage: S,
        periods: FiscalPeriodManager<S>,
        validator: Arc<dyn EntryValidator>,
    ) -> Self {
        Self {
            storage,
            periods,
            validator,
            writer: Arc::new(Mutex::new(())),
        }
    }

    /// Record a new entry and update the running totals of its accounts.
    ///
    /// Fails `Invalid` on an unbalanced or malformed entry, a date outside
    /// its period, an unknown or inactive account; `Conflict` on a closed
    /// period or when the source document already has an active entry.
    pub async fn append(&mut self, entry: &JournalEntry) -> LedgerResult<()> {
        self.validator.validate_entry(entry)?;

        let _writing = self.writer.clone().lock_owned().await;
        let _posting = self.periods.posting_guard(&entry.period_id).await;
        self.append_locked(entry).await
    }

    async fn append_locked(&mut self, entry: &JournalEntry) -> LedgerResult<()> {
        self.check_postable(entry).await?;

        if entry.reverses.is_none() && entry.supersedes.is_none() {
            if let Some(active) = self.active_entry_for(&entry.source).await? {
                debug!(source = %entry.source, existing = %active.id, "source already posted");
                return Err(LedgerError::DuplicateEntry(entry.source.clone()));
            }
        }

        self.storage.append_entry(entry).await?;
        info!(
            entry_id = %entry.id,
            journal = entry.journal.code(),
            piece = %entry.piece_number,
            date = %entry.date,
            amount = %entry.total_debits(),
            "journal entry appended"
        );
        Ok(())
    }

    /// Everything an append needs besides structural validity
    async fn check_postable(&self, entry: &JournalEntry) -> LedgerResult<()> {
        let period = self.periods.get(&entry.period_id).await?;
        if !period.contains_date(entry.date) {
            return Err(LedgerError::InvalidEntry(format!(
                "Entry date {} is outside period {} ({} - {})",
                entry.date, period.code, period.start_date, period.end_date
            )));
        }
        if !period.is_open() {
            return Err(LedgerError::PeriodClosed {
                period: period.code,
                date: entry.date,
            });
        }

        for line in &entry.lines {
            let account = self
                .storage
                .get_account(&line.account_code)
                .await?
                .ok_or_else(|| LedgerError::AccountNotFound(line.account_code.clone()))?;
            if !account.active {
                return Err(LedgerError::AccountInactive(account.code));
            }
        }
        Ok(())
    }

    /// Get an entry by id, returning an error if not found
    pub async fn get_entry(&self, entry_id: &str) -> LedgerResult<JournalEntry> {
        self.storage
            .get_entry(entry_id)
            .await?
            .ok_or_else(|| LedgerError::EntryNotFound(entry_id.to_string()))
    }

    /// All entries generated from a document, reversals included
    pub async fn entries_for(&self, source: &DocumentRef) -> LedgerResult<Vec<JournalEntry>> {
        self.storage.find_entries_by_source(source).await
    }

    /// The entry currently standing for a document: neither a reversal nor reversed
    pub async fn active_entry_for(&self, source: &DocumentRef) -> LedgerResult<Option<JournalEntry>> {
        let entries = self.storage.find_entries_by_source(source).await?;
        Ok(active_entries(&entries).remove(source).cloned())
    }

    /// Date a reversal of `entry` can be booked on: the entry's own date
    /// while its period is open, otherwise the start of the first open
    /// period after it.
    pub async fn reversal_date(&self, entry: &JournalEntry) -> LedgerResult<chrono::NaiveDate> {
        let period = self.periods.get(&entry.period_id).await?;
        if period.is_open() {
            return Ok(entry.date);
        }
        self.periods
            .list()
            .await?
            .into_iter()
            .find(|p| p.is_open() && p.start_date > period.end_date)
            .map(|p| p.start_date)
            .ok_or(LedgerError::PeriodClosed {
                period: period.code,
                date: entry.date,
            })
    }

    /// Cancel an entry with a contra entry dated `date`.
    ///
    /// The contra entry lands in the period covering `date`, created if needed.
    pub async fn reverse(
        &mut self,
        entry_id: &str,
        date: chrono::NaiveDate,
    ) -> LedgerResult<JournalEntry> {
        let original = self.get_entry(entry_id).await?;
        self.ensure_reversible(&original).await?;

        let period = self.period_for_posting(date).await?;
        let reversal = original.reversal(date, period.id);
        self.validator.validate_entry(&reversal)?;

        let _writing = self.writer.clone().lock_owned().await;
        let _posting = self.periods.posting_guard(&reversal.period_id).await;
        self.append_locked(&reversal).await?;
        info!(entry_id, reversal_id = %reversal.id, "journal entry reversed");
        Ok(reversal)
    }

    /// Replace an entry: append its reversal then `replacement`.
    ///
    /// The reversal is dated like the original while its period is open,
    /// otherwise like the replacement. Both entries are checked before
    /// either is written.
    pub async fn supersede(
        &mut self,
        old_id: &str,
        mut replacement: JournalEntry,
    ) -> LedgerResult<(JournalEntry, JournalEntry)> {
        let original = self.get_entry(old_id).await?;
        self.ensure_reversible(&original).await?;

        let original_period = self.periods.get(&original.period_id).await?;
        let reversal = if original_period.is_open() {
            original.reversal(original.date, original.period_id.clone())
        } else {
            original.reversal(replacement.date, replacement.period_id.clone())
        };
        replacement.supersedes = Some(original.id.clone());

        self.validator.validate_entry(&reversal)?;
        self.validator.validate_entry(&replacement)?;

        let _writing = self.writer.clone().lock_owned().await;
        let _guards = self
            .posting_guards(&[&reversal.period_id, &replacement.period_id])
            .await;
        self.check_postable(&reversal).await?;
        self.check_postable(&replacement).await?;

        self.append_locked(&reversal).await?;
        self.append_locked(&replacement).await?;
        info!(
            old_id,
            reversal_id = %reversal.id,
            replacement_id = %replacement.id,
            "journal entry superseded"
        );
        Ok((reversal, replacement))
    }

    async fn ensure_reversible(&self, entry: &JournalEntry) -> LedgerResult<()> {
        if entry.reverses.is_some() {
            return Err(LedgerError::AlreadyReversed(entry.id.clone()));
        }
        let siblings = self.storage.find_entries_by_source(&entry.source).await?;
        if siblings
            .iter()
            .any(|e| e.reverses.as_deref() == Some(entry.id.as_str()))
        {
            return Err(LedgerError::AlreadyReversed(entry.id.clone()));
        }
        Ok(())
    }

    async fn posting_guards(&self, period_ids: &[&String]) -> Vec<PostingGuard> {
        let mut seen = HashSet::new();
        let mut guards = Vec::new();
        for id in period_ids {
            if seen.insert(*id) {
                guards.push(self.periods.posting_guard(id).await);
            }
        }
        guards
    }

    /// Period an entry dated `date` is booked into
    pub(crate) async fn period_for_posting(&mut self, date: chrono::NaiveDate) -> LedgerResult<FiscalPeriod> {
        match self.periods.period_for_date(date).await? {
            Some(period) => Ok(period),
            None => self.periods.get_or_create_current(date).await,
        }
    }

    /// General ledger inquiry: entries touching an account, by date then piece number
    pub async fn grand_livre(
        &self,
        account_code: &str,
        range: DateRange,
        period_id: Option<&str>,
    ) -> LedgerResult<Vec<JournalEntry>> {
        if self.storage.get_account(account_code).await?.is_none() {
            return Err(LedgerError::AccountNotFound(account_code.to_string()));
        }
        let filter = EntryFilter {
            range,
            period_id: period_id.map(str::to_string),
            account_code: Some(account_code.to_string()),
            ..EntryFilter::default()
        };
        let mut entries = self.storage.get_entries(&filter).await?;
        sort_journal(&mut entries[..]);
        Ok(entries)
    }

    /// Per-account debit, credit and solde over a range, sorted by code
    pub async fn balance(
        &self,
        range: DateRange,
        period_id: Option<&str>,
    ) -> LedgerResult<Vec<AccountBalance>> {
        let snapshot = self.snapshot(range, period_id).await?;
        Ok(aggregate_balances(&snapshot.accounts, &snapshot.entries))
    }

    /// Balance with its grand totals
    pub async fn trial_balance(
        &self,
        range: DateRange,
        period_id: Option<&str>,
    ) -> LedgerResult<TrialBalance> {
        let balances = self.balance(range, period_id).await?;
        let total_debits: BigDecimal = balances.iter().map(|b| &b.total_debit).sum();
        let total_credits: BigDecimal = balances.iter().map(|b| &b.total_credit).sum();
        let is_balanced = total_debits == total_credits;

        Ok(TrialBalance {
            range,
            period_id: period_id.map(str::to_string),
            balances,
            total_debits,
            total_credits,
            is_balanced,
        })
    }

    /// One page of the journal, ordered by date then piece number.
    ///
    /// Paging is left to the storage so only the requested page is loaded.
    pub async fn journal_page(
        &self,
        filter: &EntryFilter,
        page: PageRequest,
    ) -> LedgerResult<Page<JournalEntry>> {
        self.storage.get_entries_page(filter, page).await
    }

    /// Accounts and the entries of a range read together
    pub async fn snapshot(
        &self,
        range: DateRange,
        period_id: Option<&str>,
    ) -> LedgerResult<LedgerSnapshot> {
        let filter = EntryFilter {
            range,
            period_id: period_id.map(str::to_string),
            ..EntryFilter::default()
        };
        self.storage.snapshot(&filter).await
    }

    /// Update lettering / pointing marks of an entry
    pub async fn set_reconciliation(
        &mut self,
        entry_id: &str,
        flags: ReconciliationFlags,
    ) -> LedgerResult<()> {
        self.storage.update_reconciliation(entry_id, &flags).await
    }

    pub fn periods(&self) -> &FiscalPeriodManager<S> {
        &self.periods
    }
}

/// Journal order: date, then piece number, then insertion
pub fn sort_journal<E: std::borrow::Borrow<JournalEntry>>(entries: &mut [E]) {
    entries.sort_by(|a, b| {
        let (a, b): (&JournalEntry, &JournalEntry) = (a.borrow(), b.borrow());
        a.date
            .cmp(&b.date)
            .then_with(|| a.piece_number.cmp(&b.piece_number))
            .then_with(|| a.created_at.cmp(&b.created_at))
    });
}

/// Active entry per source document among `entries`: the latest one that
/// is neither a reversal nor reversed
pub fn active_entries(entries: &[JournalEntry]) -> HashMap<&DocumentRef, &JournalEntry> {
    let reversed: HashSet<&str> = entries
        .iter()
        .filter_map(|e| e.reverses.as_deref())
        .collect();
    let mut active: HashMap<&DocumentRef, &JournalEntry> = HashMap::new();
    for entry in entries
        .iter()
        .filter(|e| e.reverses.is_none() && !reversed.contains(e.id.as_str()))
    {
        active
            .entry(&entry.source)
            .and_modify(|current| {
                if entry.created_at > current.created_at {
                    *current = entry;
                }
            })
            .or_insert(entry);
    }
    active
}

/// Fold entry lines into per-account totals.
///
/// Accounts without any movement are left out; lines on unknown accounts
/// are ignored. Sorted by account code.
pub fn aggregate_balances<'a>(
    accounts: &[Account],
    entries: impl IntoIterator<Item = &'a JournalEntry>,
) -> Vec<AccountBalance> {
    let mut totals: BTreeMap<&str, (BigDecimal, BigDecimal)> = BTreeMap::new();
    for line in entries.into_iter().flat_map(|e| e.lines.iter()) {
        let (debit, credit) = totals
            .entry(line.account_code.as_str())
            .or_insert_with(|| (BigDecimal::from(0), BigDecimal::from(0)));
        match line.entry_type {
            EntryType::Debit => *debit += &line.amount,
            EntryType::Credit => *credit += &line.amount,
        }
    }

    let by_code: HashMap<&str, &Account> =
        accounts.iter().map(|a| (a.code.as_str(), a)).collect();

    totals
        .into_iter()
        .filter_map(|(code, (total_debit, total_credit))| {
            let account = by_code.get(code)?;
            Some(AccountBalance {
                code: account.code.clone(),
                label: account.label.clone(),
                class: account.class,
                account_type: account.account_type,
                solde: account.account_type.solde(&total_debit, &total_credit),
                total_debit,
                total_credit,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::account::ChartOfAccounts;
    use crate::utils::MemoryStorage;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    async fn setup() -> (MemoryStorage, Ledger<MemoryStorage>, FiscalPeriod) {
        let storage = MemoryStorage::new();
        ChartOfAccounts::new(storage.clone()).initialize().await.unwrap();
        let mut periods = FiscalPeriodManager::new(storage.clone());
        let period = periods.get_or_create_current(date(2024, 1, 1)).await.unwrap();
        let ledger = Ledger::new(storage.clone(), periods);
        (storage, ledger, period)
    }

    fn charge_entry(period: &FiscalPeriod, id: &str, day: u32, amount: i64) -> JournalEntry {
        let mut entry = JournalEntry::new(
            date(2024, 1, day),
            JournalCode::Misc,
            format!("CHG-{id}"),
            "Loyer".to_string(),
            DocumentRef::new(DocumentType::Charge, id),
            period.id.clone(),
        );
        entry.lines = vec![
            EntryLine::debit("6132", "Loyer", BigDecimal::from(amount)),
            EntryLine::credit("5141", "Banque", BigDecimal::from(amount)),
        ];
        entry
    }

    #[tokio::test]
    async fn test_append_updates_running_totals() {
        let (storage, mut ledger, period) = setup().await;
        ledger.append(&charge_entry(&period, "c1", 5, 400)).await.unwrap();

        let rent = storage.get_account("6132").await.unwrap().unwrap();
        assert_eq!(rent.total_debit, BigDecimal::from(400));
        assert_eq!(rent.solde(), BigDecimal::from(400));
        let bank = storage.get_account("5141").await.unwrap().unwrap();
        assert_eq!(bank.solde(), BigDecimal::from(-400));
    }

    #[tokio::test]
    async fn test_unbalanced_entry_is_invalid() {
        let (storage, mut ledger, period) = setup().await;
        let mut entry = charge_entry(&period, "c1", 5, 400);
        entry.lines[1].amount = BigDecimal::from(399);

        let err = ledger.append(&entry).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);
        assert_eq!(storage.entry_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_date_outside_period_is_invalid() {
        let (_, mut ledger, period) = setup().await;
        let mut entry = charge_entry(&period, "c1", 5, 400);
        entry.date = date(2025, 2, 1);
        let err = ledger.append(&entry).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidEntry(_)));
    }

    #[tokio::test]
    async fn test_second_entry_for_same_source_is_rejected() {
        let (_, mut ledger, period) = setup().await;
        ledger.append(&charge_entry(&period, "c1", 5, 400)).await.unwrap();
        let err = ledger
            .append(&charge_entry(&period, "c1", 6, 400))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateEntry(_)));
    }

    #[tokio::test]
    async fn test_grand_livre_order() {
        let (_, mut ledger, period) = setup().await;
        ledger.append(&charge_entry(&period, "b", 20, 100)).await.unwrap();
        ledger.append(&charge_entry(&period, "a", 20, 200)).await.unwrap();
        ledger.append(&charge_entry(&period, "c", 3, 300)).await.unwrap();

        let entries = ledger
            .grand_livre("5141", DateRange::all(), None)
            .await
            .unwrap();
        let pieces: Vec<&str> = entries.iter().map(|e| e.piece_number.as_str()).collect();
        assert_eq!(pieces, vec!["CHG-c", "CHG-a", "CHG-b"]);

        let err = ledger
            .grand_livre("9999", DateRange::all(), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_reverse_and_supersede() {
        let (storage, mut ledger, period) = setup().await;
        let original = charge_entry(&period, "c1", 5, 400);
        ledger.append(&original).await.unwrap();

        let replacement = charge_entry(&period, "c1", 5, 450);
        let (reversal, replacement) = ledger.supersede(&original.id, replacement).await.unwrap();
        assert_eq!(reversal.reverses.as_deref(), Some(original.id.as_str()));
        assert_eq!(replacement.supersedes.as_deref(), Some(original.id.as_str()));

        let active = ledger.active_entry_for(&original.source).await.unwrap().unwrap();
        assert_eq!(active.id, replacement.id);
        let rent = storage.get_account("6132").await.unwrap().unwrap();
        assert_eq!(rent.solde(), BigDecimal::from(450));

        let err = ledger.reverse(&original.id, date(2024, 1, 9)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        ledger.reverse(&replacement.id, date(2024, 1, 9)).await.unwrap();
        assert!(ledger.active_entry_for(&original.source).await.unwrap().is_none());
        let rent = storage.get_account("6132").await.unwrap().unwrap();
        assert_eq!(rent.solde(), BigDecimal::from(0));
    }

    #[tokio::test]
    async fn test_balance_omits_untouched_accounts() {
        let (_, mut ledger, period) = setup().await;
        ledger.append(&charge_entry(&period, "c1", 5, 400)).await.unwrap();
        ledger.append(&charge_entry(&period, "c2", 25, 100)).await.unwrap();

        let balances = ledger.balance(DateRange::all(), None).await.unwrap();
        let codes: Vec<&str> = balances.iter().map(|b| b.code.as_str()).collect();
        assert_eq!(codes, vec!["5141", "6132"]);
        assert_eq!(balances[0].solde, BigDecimal::from(-500));
        assert_eq!(balances[1].solde, BigDecimal::from(500));

        let first_half = DateRange::between(date(2024, 1, 1), date(2024, 1, 15));
        let trial = ledger.trial_balance(first_half, Some(&period.id)).await.unwrap();
        assert!(trial.is_balanced);
        assert_eq!(trial.total_debits, BigDecimal::from(400));
    }

    #[tokio::test]
    async fn test_journal_pages() {
        let (_, mut ledger, period) = setup().await;
        for day in 1..=5 {
            let id = format!("c{day}");
            ledger.append(&charge_entry(&period, &id, day, 10)).await.unwrap();
        }
        let page = ledger
            .journal_page(&EntryFilter::default(), PageRequest { page: 2, per_page: 2 })
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.total_pages(), 3);
        let pieces: Vec<&str> = page.items.iter().map(|e| e.piece_number.as_str()).collect();
        assert_eq!(pieces, vec!["CHG-c3", "CHG-c4"]);
    }

    #[tokio::test]
    async fn test_active_entries_skip_reversed_and_reversals() {
        let (_, mut ledger, period) = setup().await;
        let kept = charge_entry(&period, "c1", 5, 400);
        ledger.append(&kept).await.unwrap();
        let cancelled = charge_entry(&period, "c2", 6, 100);
        ledger.append(&cancelled).await.unwrap();
        ledger.reverse(&cancelled.id, date(2024, 1, 7)).await.unwrap();
        let original = charge_entry(&period, "c3", 8, 50);
        ledger.append(&original).await.unwrap();
        let (_, replacement) = ledger
            .supersede(&original.id, charge_entry(&period, "c3", 8, 60))
            .await
            .unwrap();

        let snapshot = ledger.snapshot(DateRange::all(), None).await.unwrap();
        let active = active_entries(&snapshot.entries);
        assert_eq!(active.len(), 2);
        assert_eq!(active[&kept.source].id, kept.id);
        assert_eq!(active[&replacement.source].id, replacement.id);
        assert!(!active.contains_key(&cancelled.source));
    }

    #[test]
    fn test_aggregate_balances_sign_convention() {
        let accounts = vec![
            Account::new("4457".into(), "TVA collectée".into(), 4, AccountType::Liability, None),
            Account::new("41111".into(), "Clients".into(), 4, AccountType::Asset, None),
            Account::new("7121".into(), "Ventes".into(), 7, AccountType::Revenue, None),
        ];
        let mut entry = JournalEntry::new(
            date(2024, 1, 15),
            JournalCode::Sales,
            "FV-1".into(),
            "Vente".into(),
            DocumentRef::new(DocumentType::SalesInvoice, "f1"),
            "p".into(),
        );
        entry.lines = vec![
            EntryLine::debit("41111", "Client", BigDecimal::from(1200)),
            EntryLine::credit("7121", "Vente", BigDecimal::from(1000)),
            EntryLine::credit("4457", "TVA", BigDecimal::from(200)),
        ];

        let balances = aggregate_balances(&accounts, &[entry]);
        let soldes: Vec<(&str, BigDecimal)> = balances
            .iter()
            .map(|b| (b.code.as_str(), b.solde.clone()))
            .collect();
        assert_eq!(
            soldes,
            vec![
                ("41111", BigDecimal::from(1200)),
                ("4457", BigDecimal::from(200)),
                ("7121", BigDecimal::from(1000)),
            ]
        );
    }
}
