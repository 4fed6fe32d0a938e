//! Reconciliation: lettering of third-party accounts and pointing of bank
//! movements against statements

use bigdecimal::BigDecimal;
use tracing::info;

use crate::ledger::core::Ledger;
use crate::traits::*;
use crate::types::*;

/// Marks entries as matched. Only the reconciliation flags of an entry
/// are ever touched.
#[derive(Clone)]
pub struct ReconciliationEngine<S: LedgerStorage> {
    ledger: Ledger<S>,
}

impl<S: LedgerStorage + Clone> ReconciliationEngine<S> {
    pub fn new(ledger: Ledger<S>) -> Self {
        Self { ledger }
    }

    /// Letter a group of entries on an account.
    ///
    /// Their lines on `account_code` must balance, e.g. an invoice and the
    /// payments settling it.
    pub async fn lettrer(&mut self, account_code: &str, entry_ids: &[&str]) -> LedgerResult<()> {
        if entry_ids.is_empty() {
            return Err(LedgerError::Validation(
                "Nothing to letter: no entries given".to_string(),
            ));
        }

        let mut entries = Vec::with_capacity(entry_ids.len());
        let mut net = BigDecimal::from(0);
        for id in entry_ids {
            let entry = self.ledger.get_entry(id).await?;
            if !entry.touches(account_code) {
                return Err(LedgerError::Validation(format!(
                    "Entry {id} has no line on account {account_code}"
                )));
            }
            net += entry
                .lines
                .iter()
                .filter(|l| l.account_code == account_code)
                .map(|l| l.debit_amount() - l.credit_amount())
                .sum::<BigDecimal>();
            entries.push(entry);
        }

        if net != BigDecimal::from(0) {
            return Err(LedgerError::Validation(format!(
                "Entries do not balance on account {account_code}: difference {net}"
            )));
        }

        for entry in entries {
            let flags = ReconciliationFlags {
                lettered: true,
                ..entry.reconciliation
            };
            self.ledger.set_reconciliation(&entry.id, flags).await?;
        }
        info!(account = account_code, count = entry_ids.len(), "entries lettered");
        Ok(())
    }

    /// Mark an entry as matched to a bank statement line
    pub async fn pointer(&mut self, entry_id: &str) -> LedgerResult<JournalEntry> {
        let mut entry = self.ledger.get_entry(entry_id).await?;
        entry.reconciliation.pointed = true;
        self.ledger
            .set_reconciliation(entry_id, entry.reconciliation.clone())
            .await?;
        info!(entry_id, "entry pointed");
        Ok(entry)
    }

    /// Unlettered entries touching an account, in journal order
    pub async fn open_items(&self, account_code: &str) -> LedgerResult<Vec<JournalEntry>> {
        let entries = self
            .ledger
            .grand_livre(account_code, DateRange::all(), None)
            .await?;
        Ok(entries
            .into_iter()
            .filter(|e| !e.reconciliation.lettered)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{ChartOfAccounts, EntryBuilder, FiscalPeriodManager};
    use crate::utils::MemoryStorage;
    use chrono::NaiveDate;

    async fn setup() -> (Ledger<MemoryStorage>, ReconciliationEngine<MemoryStorage>) {
        let storage = MemoryStorage::new();
        ChartOfAccounts::new(storage.clone()).initialize().await.unwrap();
        let ledger = Ledger::new(storage.clone(), FiscalPeriodManager::new(storage));
        let reconciliation = ReconciliationEngine::new(ledger.clone());
        (ledger, reconciliation)
    }

    async fn post(
        ledger: &mut Ledger<MemoryStorage>,
        id: &str,
        debit: &str,
        credit: &str,
        amount: i64,
    ) -> JournalEntry {
        let on = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        let period = ledger.period_for_posting(on).await.unwrap();
        let amount = BigDecimal::from(amount);
        let entry = EntryBuilder::new(
            on,
            JournalCode::Misc,
            id.to_string(),
            id.to_string(),
            DocumentRef::new(DocumentType::Charge, id),
            period.id,
        )
        .debit(debit, id, &amount)
        .credit(credit, id, &amount)
        .build()
        .unwrap();
        ledger.append(&entry).await.unwrap();
        entry
    }

    #[tokio::test]
    async fn test_lettering_balanced_group() {
        let (mut ledger, mut reconciliation) = setup().await;
        let invoice = post(&mut ledger, "inv", "41111", "7121", 1_000).await;
        let first = post(&mut ledger, "pay1", "5141", "41111", 400).await;
        let second = post(&mut ledger, "pay2", "5141", "41111", 600).await;

        let err = reconciliation
            .lettrer("41111", &[invoice.id.as_str(), first.id.as_str()])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);
        assert_eq!(reconciliation.open_items("41111").await.unwrap().len(), 3);

        reconciliation
            .lettrer("41111", &[invoice.id.as_str(), first.id.as_str(), second.id.as_str()])
            .await
            .unwrap();
        assert!(reconciliation.open_items("41111").await.unwrap().is_empty());
        assert!(ledger.get_entry(&invoice.id).await.unwrap().reconciliation.lettered);
    }

    #[tokio::test]
    async fn test_lettering_rejects_foreign_entry() {
        let (mut ledger, mut reconciliation) = setup().await;
        let rent = post(&mut ledger, "rent", "6132", "5141", 300).await;
        let err = reconciliation.lettrer("41111", &[rent.id.as_str()]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);
        assert!(reconciliation.lettrer("41111", &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_pointing_keeps_lettering() {
        let (mut ledger, mut reconciliation) = setup().await;
        let entry = post(&mut ledger, "dep", "5141", "41111", 250).await;
        let pointed = reconciliation.pointer(&entry.id).await.unwrap();
        assert!(pointed.reconciliation.pointed);
        assert!(!pointed.reconciliation.lettered);

        let stored = ledger.get_entry(&entry.id).await.unwrap();
        assert_eq!(stored.lines, entry.lines);
        assert!(stored.reconciliation.pointed);

        let err = reconciliation.pointer("missing").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
