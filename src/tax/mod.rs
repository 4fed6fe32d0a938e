//! Tax computations: monthly VAT returns and corporate income tax

pub mod corporate;
pub mod vat;

pub use corporate::*;
pub use vat::*;
