//! In-memory storage implementation for testing

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::ledger::sort_journal;
use crate::tax::vat::VatReturn;
use crate::traits::*;
use crate::types::*;

#[derive(Debug, Default)]
struct MemoryState {
    accounts: HashMap<String, Account>,
    entries: HashMap<String, JournalEntry>,
    periods: HashMap<String, FiscalPeriod>,
    vat_returns: HashMap<String, VatReturn>,
}

/// In-memory storage implementation for testing and development
///
/// Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStorage {
    /// Create a new memory storage instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all data (useful for testing)
    pub fn clear(&self) -> LedgerResult<()> {
        let mut state = self.write()?;
        *state = MemoryState::default();
        Ok(())
    }

    /// Number of stored entries
    pub fn entry_count(&self) -> LedgerResult<usize> {
        Ok(self.read()?.entries.len())
    }

    fn read(&self) -> LedgerResult<RwLockReadGuard<'_, MemoryState>> {
        self.state
            .read()
            .map_err(|_| LedgerError::Storage("memory storage lock poisoned".to_string()))
    }

    fn write(&self) -> LedgerResult<RwLockWriteGuard<'_, MemoryState>> {
        self.state
            .write()
            .map_err(|_| LedgerError::Storage("memory storage lock poisoned".to_string()))
    }
}

#[async_trait]
impl LedgerStorage for MemoryStorage {
    async fn save_account(&mut self, account: &Account) -> LedgerResult<()> {
        let mut state = self.write()?;
        if state.accounts.contains_key(&account.code) {
            return Err(LedgerError::Storage(format!(
                "Account '{}' already exists",
                account.code
            )));
        }
        state
            .accounts
            .insert(account.code.clone(), account.clone());
        Ok(())
    }

    async fn get_account(&self, code: &str) -> LedgerResult<Option<Account>> {
        Ok(self.read()?.accounts.get(code).cloned())
    }

    async fn list_accounts(&self, account_type: Option<AccountType>) -> LedgerResult<Vec<Account>> {
        let state = self.read()?;
        let filtered: Vec<Account> = state
            .accounts
            .values()
            .filter(|account| account_type.is_none_or(|t| account.account_type == t))
            .cloned()
            .collect();
        Ok(filtered)
    }

    async fn update_account(&mut self, account: &Account) -> LedgerResult<()> {
        let mut state = self.write()?;
        match state.accounts.get_mut(&account.code) {
            Some(stored) => {
                *stored = account.clone();
                Ok(())
            }
            None => Err(LedgerError::AccountNotFound(account.code.clone())),
        }
    }

    async fn append_entry(&mut self, entry: &JournalEntry) -> LedgerResult<()> {
        let mut state = self.write()?;
        if state.entries.contains_key(&entry.id) {
            return Err(LedgerError::Storage(format!(
                "Journal entry '{}' already exists",
                entry.id
            )));
        }
        // Check every account before touching any total
        if let Some(missing) = entry
            .lines
            .iter()
            .find(|line| !state.accounts.contains_key(&line.account_code))
        {
            return Err(LedgerError::AccountNotFound(missing.account_code.clone()));
        }

        for line in &entry.lines {
            if let Some(account) = state.accounts.get_mut(&line.account_code) {
                account.apply_line(line.entry_type, &line.amount);
            }
        }
        state.entries.insert(entry.id.clone(), entry.clone());
        Ok(())
    }

    async fn get_entry(&self, entry_id: &str) -> LedgerResult<Option<JournalEntry>> {
        Ok(self.read()?.entries.get(entry_id).cloned())
    }

    async fn get_entries(&self, filter: &EntryFilter) -> LedgerResult<Vec<JournalEntry>> {
        let state = self.read()?;
        Ok(state
            .entries
            .values()
            .filter(|entry| filter.matches(entry))
            .cloned()
            .collect())
    }

    async fn get_entries_page(
        &self,
        filter: &EntryFilter,
        page: PageRequest,
    ) -> LedgerResult<Page<JournalEntry>> {
        let state = self.read()?;
        let mut matching: Vec<&JournalEntry> = state
            .entries
            .values()
            .filter(|entry| filter.matches(entry))
            .collect();
        sort_journal(&mut matching[..]);
        let items = matching
            .iter()
            .skip(page.offset())
            .take(page.per_page as usize)
            .map(|entry| (*entry).clone())
            .collect();
        Ok(Page {
            items,
            page: page.page,
            per_page: page.per_page,
            total: matching.len(),
        })
    }

    async fn find_entries_by_source(&self, source: &DocumentRef) -> LedgerResult<Vec<JournalEntry>> {
        let state = self.read()?;
        Ok(state
            .entries
            .values()
            .filter(|entry| &entry.source == source)
            .cloned()
            .collect())
    }

    async fn update_reconciliation(
        &mut self,
        entry_id: &str,
        flags: &ReconciliationFlags,
    ) -> LedgerResult<()> {
        let mut state = self.write()?;
        match state.entries.get_mut(entry_id) {
            Some(entry) => {
                entry.reconciliation = flags.clone();
                Ok(())
            }
            None => Err(LedgerError::EntryNotFound(entry_id.to_string())),
        }
    }

    async fn snapshot(&self, filter: &EntryFilter) -> LedgerResult<LedgerSnapshot> {
        let state = self.read()?;
        Ok(LedgerSnapshot {
            accounts: state.accounts.values().cloned().collect(),
            entries: state
                .entries
                .values()
                .filter(|entry| filter.matches(entry))
                .cloned()
                .collect(),
        })
    }

    async fn save_period(&mut self, period: &FiscalPeriod) -> LedgerResult<()> {
        self.write()?
            .periods
            .insert(period.id.clone(), period.clone());
        Ok(())
    }

    async fn get_period(&self, period_id: &str) -> LedgerResult<Option<FiscalPeriod>> {
        Ok(self.read()?.periods.get(period_id).cloned())
    }

    async fn list_periods(&self) -> LedgerResult<Vec<FiscalPeriod>> {
        Ok(self.read()?.periods.values().cloned().collect())
    }

    async fn update_period(&mut self, period: &FiscalPeriod) -> LedgerResult<()> {
        let mut state = self.write()?;
        match state.periods.get_mut(&period.id) {
            Some(stored) => {
                *stored = period.clone();
                Ok(())
            }
            None => Err(LedgerError::PeriodNotFound(period.id.clone())),
        }
    }
}

#[async_trait]
impl VatReturnStorage for MemoryStorage {
    async fn save_vat_return(&mut self, vat_return: &VatReturn) -> LedgerResult<()> {
        self.write()?
            .vat_returns
            .insert(vat_return.id.clone(), vat_return.clone());
        Ok(())
    }

    async fn get_vat_return(&self, id: &str) -> LedgerResult<Option<VatReturn>> {
        Ok(self.read()?.vat_returns.get(id).cloned())
    }

    async fn find_vat_return(&self, month: u32, year: i32) -> LedgerResult<Option<VatReturn>> {
        Ok(self
            .read()?
            .vat_returns
            .values()
            .find(|r| r.month == month && r.year == year)
            .cloned())
    }

    async fn list_vat_returns(&self, year: i32) -> LedgerResult<Vec<VatReturn>> {
        let mut returns: Vec<VatReturn> = self
            .read()?
            .vat_returns
            .values()
            .filter(|r| r.year == year)
            .cloned()
            .collect();
        returns.sort_by_key(|r| r.month);
        Ok(returns)
    }

    async fn update_vat_return(&mut self, vat_return: &VatReturn) -> LedgerResult<()> {
        let mut state = self.write()?;
        match state.vat_returns.get_mut(&vat_return.id) {
            Some(stored) => {
                *stored = vat_return.clone();
                Ok(())
            }
            None => Err(LedgerError::VatReturnNotFound(vat_return.id.clone())),
        }
    }
}
