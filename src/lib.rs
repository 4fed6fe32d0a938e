//! # Compta Core
//!
//! A double-entry bookkeeping library for the Moroccan chart of accounts
//! (CGNC): journal entry generation from business documents, fiscal
//! periods, financial statements, VAT returns and corporate income tax.
//!
//! ## Features
//!
//! - **Double-entry bookkeeping**: balanced, immutable entries with running account totals
//! - **Fiscal periods**: open/closed exercices with posting locks
//! - **Entry generation**: sales and purchase invoices, payments and charges
//! - **Financial statements**: general ledger, trial balance, bilan and CPC
//! - **Tax**: monthly VAT returns (accrual or cash basis), IS and its installments
//! - **Reconciliation**: lettering of third-party accounts and bank pointing
//! - **Storage abstraction**: database-agnostic design with trait-based storage
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use compta_core::{AccountingEngine, EngineConfig, MemoryStorage, SalesInvoice};
//! use bigdecimal::BigDecimal;
//! use chrono::NaiveDate;
//!
//! # async fn run() -> compta_core::LedgerResult<()> {
//! let mut engine = AccountingEngine::new(MemoryStorage::new(), EngineConfig::default()).await?;
//! let invoice = SalesInvoice {
//!     id: "inv-1".to_string(),
//!     number: Some("2024-001".to_string()),
//!     date: NaiveDate::from_ymd_opt(2024, 3, 5),
//!     client_name: Some("Atlas SARL".to_string()),
//!     total_ht: Some(BigDecimal::from(1000)),
//!     total_tva: Some(BigDecimal::from(200)),
//!     total_ttc: Some(BigDecimal::from(1200)),
//!     vat_rate: Some(BigDecimal::from(20)),
//! };
//! engine.record_document(&invoice.into()).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod documents;
pub mod engine;
pub mod ledger;
pub mod reconciliation;
pub mod reports;
pub mod tax;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use config::*;
pub use documents::*;
pub use engine::*;
pub use ledger::*;
pub use reconciliation::*;
pub use reports::*;
pub use tax::*;
pub use traits::*;
pub use types::*;
pub use utils::*;
