//! Snapshots of the business documents journal entries are generated from.
//!
//! These are read-only views handed over by the surrounding application.
//! Fields a posting depends on are optional so that an incomplete document
//! surfaces as [`LedgerError::MissingField`] instead of a bogus entry.

use crate::types::{DocumentRef, DocumentType, LedgerError, LedgerResult};
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A customer invoice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesInvoice {
    pub id: String,
    pub number: Option<String>,
    pub date: Option<NaiveDate>,
    pub client_name: Option<String>,
    pub total_ht: Option<BigDecimal>,
    pub total_tva: Option<BigDecimal>,
    pub total_ttc: Option<BigDecimal>,
    /// VAT rate bracket in percent
    pub vat_rate: Option<BigDecimal>,
}

/// A supplier invoice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseInvoice {
    pub id: String,
    pub number: Option<String>,
    pub date: Option<NaiveDate>,
    pub supplier_name: Option<String>,
    pub total_ht: Option<BigDecimal>,
    pub total_tva: Option<BigDecimal>,
    pub total_ttc: Option<BigDecimal>,
    pub vat_rate: Option<BigDecimal>,
}

/// Who pays whom
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentDirection {
    /// Client settling a sales invoice
    Inbound,
    /// Settlement of a supplier invoice
    Outbound,
}

/// How the money moved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMode {
    Bank,
    Cash,
}

/// A payment settling an invoice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    pub date: Option<NaiveDate>,
    pub amount: Option<BigDecimal>,
    pub direction: PaymentDirection,
    pub mode: PaymentMode,
    /// Invoice being settled; its VAT drives cash-basis declarations
    pub invoice_id: Option<String>,
    pub reference: Option<String>,
}

impl Payment {
    /// Invoice type this payment settles
    pub fn invoice_type(&self) -> DocumentType {
        match self.direction {
            PaymentDirection::Inbound => DocumentType::SalesInvoice,
            PaymentDirection::Outbound => DocumentType::PurchaseInvoice,
        }
    }

    pub fn invoice_ref(&self) -> Option<DocumentRef> {
        self.invoice_id
            .as_ref()
            .map(|id| DocumentRef::new(self.invoice_type(), id.clone()))
    }
}

/// An operating expense outside supplier invoices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Charge {
    pub id: String,
    pub label: Option<String>,
    /// Free-form category mapped onto a class 6 account
    pub category: Option<String>,
    pub amount: Option<BigDecimal>,
    /// Only paid charges are booked
    pub paid: bool,
    pub payment_date: Option<NaiveDate>,
    pub deductible: bool,
}

/// Any document the generator can post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceDocument {
    SalesInvoice(SalesInvoice),
    PurchaseInvoice(PurchaseInvoice),
    Payment(Payment),
    Charge(Charge),
}

impl SourceDocument {
    pub fn doc_type(&self) -> DocumentType {
        match self {
            SourceDocument::SalesInvoice(_) => DocumentType::SalesInvoice,
            SourceDocument::PurchaseInvoice(_) => DocumentType::PurchaseInvoice,
            SourceDocument::Payment(_) => DocumentType::Payment,
            SourceDocument::Charge(_) => DocumentType::Charge,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            SourceDocument::SalesInvoice(d) => &d.id,
            SourceDocument::PurchaseInvoice(d) => &d.id,
            SourceDocument::Payment(d) => &d.id,
            SourceDocument::Charge(d) => &d.id,
        }
    }

    pub fn doc_ref(&self) -> DocumentRef {
        DocumentRef::new(self.doc_type(), self.id())
    }
}

impl From<SalesInvoice> for SourceDocument {
    fn from(doc: SalesInvoice) -> Self {
        SourceDocument::SalesInvoice(doc)
    }
}

impl From<PurchaseInvoice> for SourceDocument {
    fn from(doc: PurchaseInvoice) -> Self {
        SourceDocument::PurchaseInvoice(doc)
    }
}

impl From<Payment> for SourceDocument {
    fn from(doc: Payment) -> Self {
        SourceDocument::Payment(doc)
    }
}

impl From<Charge> for SourceDocument {
    fn from(doc: Charge) -> Self {
        SourceDocument::Charge(doc)
    }
}

/// Unwrap a mandatory document field
pub(crate) fn required<'a, T>(
    value: &'a Option<T>,
    document: &DocumentRef,
    field: &'static str,
) -> LedgerResult<&'a T> {
    value.as_ref().ok_or_else(|| LedgerError::MissingField {
        document: document.clone(),
        field,
    })
}
