//! Fiscal period (exercice) management

use chrono::{Datelike, NaiveDate};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedRwLockReadGuard, RwLock};
use tracing::info;

use crate::config::FiscalConfig;
use crate::traits::*;
use crate::types::*;

/// Held by appends for as long as they write into a period
pub type PostingGuard = OwnedRwLockReadGuard<()>;

/// Creates, looks up and closes fiscal periods.
///
/// Each period has a posting lock: appends hold it shared, `close` holds it
/// exclusively, so no entry can slip into a period while it is being closed.
#[derive(Clone)]
pub struct FiscalPeriodManager<S: LedgerStorage> {
    storage: S,
    policy: FiscalConfig,
    locks: Arc<Mutex<HashMap<String, Arc<RwLock<()>>>>>,
    creation: Arc<Mutex<()>>,
}

impl<S: LedgerStorage> FiscalPeriodManager<S> {
    pub fn new(storage: S) -> Self {
        Self::with_policy(storage, FiscalConfig::default())
    }

    pub fn with_policy(storage: S, policy: FiscalConfig) -> Self {
        Self {
            storage,
            policy,
            locks: Arc::new(Mutex::new(HashMap::new())),
            creation: Arc::new(Mutex::new(())),
        }
    }

    /// Get a period by id, returning an error if not found
    pub async fn get(&self, period_id: &str) -> LedgerResult<FiscalPeriod> {
        self.storage
            .get_period(period_id)
            .await?
            .ok_or_else(|| LedgerError::PeriodNotFound(period_id.to_string()))
    }

    /// All periods, oldest first
    pub async fn list(&self) -> LedgerResult<Vec<FiscalPeriod>> {
        let mut periods = self.storage.list_periods().await?;
        periods.sort_by_key(|p| p.start_date);
        Ok(periods)
    }

    /// The period covering `date`, whatever its status
    pub async fn period_for_date(&self, date: NaiveDate) -> LedgerResult<Option<FiscalPeriod>> {
        Ok(self
            .storage
            .list_periods()
            .await?
            .into_iter()
            .find(|p| p.contains_date(date)))
    }

    /// Create a period.
    ///
    /// The code defaults to "YYYY" or "YYYY-YYYY" from the bounds. Fails on
    /// inverted bounds, a duplicate code, an overlap with an existing period,
    /// or another open period when concurrent open periods are not allowed.
    pub async fn create(
        &mut self,
        start_date: NaiveDate,
        end_date: NaiveDate,
        code: Option<String>,
    ) -> LedgerResult<FiscalPeriod> {
        let _creating = self.creation.clone().lock_owned().await;
        self.create_locked(start_date, end_date, code).await
    }

    async fn create_locked(
        &mut self,
        start_date: NaiveDate,
        end_date: NaiveDate,
        code: Option<String>,
    ) -> LedgerResult<FiscalPeriod> {
        if start_date >= end_date {
            return Err(LedgerError::Validation(format!(
                "Period start {start_date} must be before its end {end_date}"
            )));
        }

        let code = code
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| FiscalPeriod::code_for(start_date, end_date));

        let existing = self.storage.list_periods().await?;
        if existing.iter().any(|p| p.code == code) {
            return Err(LedgerError::PeriodConflict(format!(
                "a period with code '{code}' already exists"
            )));
        }
        if let Some(other) = existing.iter().find(|p| p.overlaps(start_date, end_date)) {
            return Err(LedgerError::PeriodConflict(format!(
                "period overlaps '{}' ({} - {})",
                other.code, other.start_date, other.end_date
            )));
        }
        if !self.policy.allow_concurrent_open_periods {
            if let Some(open) = existing.iter().find(|p| p.is_open()) {
                return Err(LedgerError::PeriodStillOpen {
                    existing: open.code.clone(),
                });
            }
        }

        let period = FiscalPeriod::new(code, start_date, end_date);
        self.storage.save_period(&period).await?;
        info!(
            period = %period.code,
            start = %period.start_date,
            end = %period.end_date,
            "fiscal period created"
        );
        Ok(period)
    }

    /// The open period covering `today`, creating its calendar-year period
    /// if no period covers it yet.
    pub async fn get_or_create_current(&mut self, today: NaiveDate) -> LedgerResult<FiscalPeriod> {
        let _creating = self.creation.clone().lock_owned().await;

        if let Some(period) = self.period_for_date(today).await? {
            if period.is_open() {
                return Ok(period);
            }
            return Err(LedgerError::PeriodClosed {
                period: period.code,
                date: today,
            });
        }

        let year = today.year();
        let start = NaiveDate::from_ymd_opt(year, 1, 1)
            .ok_or_else(|| LedgerError::Validation(format!("Invalid year {year}")))?;
        let end = NaiveDate::from_ymd_opt(year, 12, 31)
            .ok_or_else(|| LedgerError::Validation(format!("Invalid year {year}")))?;
        self.create_locked(start, end, None).await
    }

    /// Close a period. Closing is terminal.
    ///
    /// Waits for in-flight appends into the period to finish.
    pub async fn close(&mut self, period_id: &str) -> LedgerResult<FiscalPeriod> {
        let lock = self.lock_for(period_id).await;
        let _exclusive = lock.write().await;

        let mut period = self.get(period_id).await?;
        if !period.is_open() {
            return Err(LedgerError::PeriodAlreadyClosed(period.code));
        }
        period.status = PeriodStatus::Closed;
        period.updated_at = chrono::Utc::now().naive_utc();
        self.storage.update_period(&period).await?;

        info!(period = %period.code, "fiscal period closed");
        Ok(period)
    }

    /// Shared posting lock of a period
    pub async fn posting_guard(&self, period_id: &str) -> PostingGuard {
        self.lock_for(period_id).await.read_owned().await
    }

    async fn lock_for(&self, period_id: &str) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(period_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::MemoryStorage;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_get_or_create_current_reuses_period() {
        let mut periods = FiscalPeriodManager::new(MemoryStorage::new());
        let first = periods.get_or_create_current(date(2024, 3, 10)).await.unwrap();
        assert_eq!(first.code, "2024");
        assert_eq!(first.start_date, date(2024, 1, 1));
        assert_eq!(first.end_date, date(2024, 12, 31));

        let again = periods.get_or_create_current(date(2024, 11, 2)).await.unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(periods.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_get_or_create_makes_one_period() {
        let periods = FiscalPeriodManager::new(MemoryStorage::new());
        let mut handles = Vec::new();
        for day in 1..=8 {
            let mut periods = periods.clone();
            handles.push(tokio::spawn(async move {
                periods.get_or_create_current(date(2024, 4, day)).await
            }));
        }
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(periods.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_single_open_period_by_default() {
        let mut periods = FiscalPeriodManager::new(MemoryStorage::new());
        let p2024 = periods.get_or_create_current(date(2024, 6, 1)).await.unwrap();

        let err = periods
            .get_or_create_current(date(2025, 1, 5))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::PeriodStillOpen { .. }));

        periods.close(&p2024.id).await.unwrap();
        let p2025 = periods.get_or_create_current(date(2025, 1, 5)).await.unwrap();
        assert_eq!(p2025.code, "2025");
    }

    #[tokio::test]
    async fn test_concurrent_open_periods_when_allowed() {
        let policy = FiscalConfig {
            allow_concurrent_open_periods: true,
        };
        let mut periods = FiscalPeriodManager::with_policy(MemoryStorage::new(), policy);
        periods.get_or_create_current(date(2024, 6, 1)).await.unwrap();
        periods.get_or_create_current(date(2025, 6, 1)).await.unwrap();
        assert!(periods.list().await.unwrap().iter().all(|p| p.is_open()));
    }

    #[tokio::test]
    async fn test_close_twice_is_a_conflict() {
        let mut periods = FiscalPeriodManager::new(MemoryStorage::new());
        let period = periods.get_or_create_current(date(2024, 6, 1)).await.unwrap();

        let closed = periods.close(&period.id).await.unwrap();
        assert_eq!(closed.status, PeriodStatus::Closed);

        let err = periods.close(&period.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let err = periods
            .get_or_create_current(date(2024, 7, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::PeriodClosed { .. }));
    }

    #[tokio::test]
    async fn test_create_validation() {
        let mut periods = FiscalPeriodManager::new(MemoryStorage::new());

        let err = periods
            .create(date(2024, 12, 31), date(2024, 1, 1), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);

        let split = periods
            .create(date(2024, 7, 1), date(2025, 6, 30), None)
            .await
            .unwrap();
        assert_eq!(split.code, "2024-2025");
        periods.close(&split.id).await.unwrap();

        let err = periods
            .create(date(2025, 1, 1), date(2025, 12, 31), None)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::PeriodConflict(_)));

        let err = periods
            .create(date(2026, 1, 1), date(2026, 12, 31), Some("2024-2025".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::PeriodConflict(_)));
    }

    #[tokio::test]
    async fn test_close_waits_for_posting_guard() {
        let mut periods = FiscalPeriodManager::new(MemoryStorage::new());
        let period = periods.get_or_create_current(date(2024, 6, 1)).await.unwrap();

        let guard = periods.posting_guard(&period.id).await;
        let mut closer = periods.clone();
        let id = period.id.clone();
        let handle = tokio::spawn(async move { closer.close(&id).await });

        tokio::task::yield_now().await;
        assert!(periods.get(&period.id).await.unwrap().is_open());

        drop(guard);
        let closed = handle.await.unwrap().unwrap();
        assert!(!closed.is_open());
    }
}
