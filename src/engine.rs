//! Application context wiring every component onto one storage

use chrono::NaiveDate;
use std::sync::Arc;
use tracing::info;

use crate::config::EngineConfig;
use crate::documents::SourceDocument;
use crate::ledger::{
    ChartOfAccounts, FiscalPeriodManager, JournalEntryGenerator, Ledger, RegenerationReport,
    SyncOutcome,
};
use crate::reconciliation::ReconciliationEngine;
use crate::reports::FinancialStatementBuilder;
use crate::tax::{TaxEngine, VatEngine};
use crate::traits::*;
use crate::types::*;

/// Every accounting component built over the same storage and configuration.
///
/// Components are cheap clones sharing the storage, period locks and
/// ledger writer lock.
#[derive(Clone)]
pub struct AccountingEngine<S: LedgerStorage + VatReturnStorage> {
    config: EngineConfig,
    chart: ChartOfAccounts<S>,
    periods: FiscalPeriodManager<S>,
    ledger: Ledger<S>,
    generator: JournalEntryGenerator<S>,
    statements: FinancialStatementBuilder<S>,
    vat: VatEngine<S>,
    tax: TaxEngine<S>,
    reconciliation: ReconciliationEngine<S>,
}

impl<S: LedgerStorage + VatReturnStorage + Clone> AccountingEngine<S> {
    /// Build the engine and seed the chart of accounts
    pub async fn new(storage: S, config: EngineConfig) -> LedgerResult<Self> {
        Self::with_validator(storage, config, Arc::new(DefaultEntryValidator)).await
    }

    /// Build the engine with a custom entry validator
    pub async fn with_validator(
        storage: S,
        config: EngineConfig,
        validator: Arc<dyn EntryValidator>,
    ) -> LedgerResult<Self> {
        config.validate()?;

        let mut chart = ChartOfAccounts::new(storage.clone());
        let created = chart.initialize().await?;

        let periods = FiscalPeriodManager::with_policy(storage.clone(), config.fiscal.clone());
        let ledger = Ledger::with_validator(storage.clone(), periods.clone(), validator);
        let generator = JournalEntryGenerator::new(ledger.clone(), &config);
        let statements = FinancialStatementBuilder::new(ledger.clone());
        let vat = VatEngine::new(storage, ledger.clone(), &config);
        let tax = TaxEngine::new(ledger.clone(), config.corporate_tax.clone());
        let reconciliation = ReconciliationEngine::new(ledger.clone());

        info!(seeded_accounts = created, "accounting engine ready");
        Ok(Self {
            config,
            chart,
            periods,
            ledger,
            generator,
            statements,
            vat,
            tax,
            reconciliation,
        })
    }

    /// Post, refresh or cancel the entry of a created or updated document
    pub async fn record_document(&mut self, document: &SourceDocument) -> LedgerResult<SyncOutcome> {
        self.generator.sync_document(document).await
    }

    /// Reverse the entry of a deleted document
    pub async fn cancel_document(
        &mut self,
        doc_ref: &DocumentRef,
        date: NaiveDate,
    ) -> LedgerResult<Option<JournalEntry>> {
        self.generator.cancel_document(doc_ref, date).await
    }

    /// Post every document of `source` that has no entry yet
    pub async fn regenerate_missing<D: DocumentSource + ?Sized>(
        &mut self,
        source: &D,
    ) -> LedgerResult<RegenerationReport> {
        self.generator.regenerate_missing(source).await
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn chart(&mut self) -> &mut ChartOfAccounts<S> {
        &mut self.chart
    }

    pub fn periods(&mut self) -> &mut FiscalPeriodManager<S> {
        &mut self.periods
    }

    pub fn ledger(&mut self) -> &mut Ledger<S> {
        &mut self.ledger
    }

    pub fn generator(&mut self) -> &mut JournalEntryGenerator<S> {
        &mut self.generator
    }

    pub fn statements(&self) -> &FinancialStatementBuilder<S> {
        &self.statements
    }

    pub fn vat(&mut self) -> &mut VatEngine<S> {
        &mut self.vat
    }

    pub fn tax(&self) -> &TaxEngine<S> {
        &self.tax
    }

    pub fn reconciliation(&mut self) -> &mut ReconciliationEngine<S> {
        &mut self.reconciliation
    }
}
