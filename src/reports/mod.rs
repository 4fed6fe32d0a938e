//! Financial statements built from the ledger

pub mod statements;

pub use statements::*;
