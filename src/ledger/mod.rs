//! Ledger module: chart of accounts, fiscal periods, entry generation and the journal

pub mod account;
pub mod core;
pub mod period;
pub mod transaction;

pub use account::*;
pub use self::core::*;
pub use period::*;
pub use transaction::*;
