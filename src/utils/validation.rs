//! Validation utilities

use crate::traits::*;
use crate::types::*;
use bigdecimal::BigDecimal;

/// Validate that an amount is positive
pub fn validate_positive_amount(amount: &BigDecimal) -> LedgerResult<()> {
    if *amount <= BigDecimal::from(0) {
        Err(LedgerError::Validation(
            "Amount must be positive".to_string(),
        ))
    } else {
        Ok(())
    }
}

/// Validate an account code: digits only, class digit 1 to 7
pub fn validate_account_code(code: &str) -> LedgerResult<()> {
    if code.trim().is_empty() {
        return Err(LedgerError::Validation(
            "Account code cannot be empty".to_string(),
        ));
    }

    if !code.chars().all(|c| c.is_ascii_digit()) {
        return Err(LedgerError::Validation(format!(
            "Account code '{code}' can only contain digits"
        )));
    }

    match code.chars().next() {
        Some('1'..='7') => Ok(()),
        _ => Err(LedgerError::Validation(format!(
            "Account code '{code}' must start with a class digit between 1 and 7"
        ))),
    }
}

/// Validate an entry or account label
pub fn validate_label(label: &str) -> LedgerResult<()> {
    if label.trim().is_empty() {
        return Err(LedgerError::Validation(
            "Label cannot be empty".to_string(),
        ));
    }

    if label.len() > 255 {
        return Err(LedgerError::Validation(
            "Label cannot exceed 255 characters".to_string(),
        ));
    }

    Ok(())
}

/// Validate a piece number (document reference printed on the journal)
pub fn validate_piece_number(piece_number: &str) -> LedgerResult<()> {
    if piece_number.trim().is_empty() {
        return Err(LedgerError::Validation(
            "Piece number cannot be empty".to_string(),
        ));
    }

    if piece_number.len() > 64 {
        return Err(LedgerError::Validation(
            "Piece number cannot exceed 64 characters".to_string(),
        ));
    }

    Ok(())
}

/// Entry validator adding label, code and VAT line checks to the double-entry rules
pub struct EnhancedEntryValidator;

impl EntryValidator for EnhancedEntryValidator {
    fn validate_entry(&self, entry: &JournalEntry) -> LedgerResult<()> {
        entry.validate()?;

        validate_label(&entry.label)?;
        validate_piece_number(&entry.piece_number)?;

        for line in &entry.lines {
            validate_account_code(&line.account_code)?;
            validate_positive_amount(&line.amount)?;
            if let Some(rate) = &line.vat_rate {
                if *rate < BigDecimal::from(0) {
                    return Err(LedgerError::Validation(format!(
                        "Negative VAT rate on account {}",
                        line.account_code
                    )));
                }
            }
        }

        Ok(())
    }
}
