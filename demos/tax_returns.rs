//! Monthly VAT returns on both bases and the corporate tax of the year

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use compta_core::{
    AccountingEngine, DateRange, EngineConfig, MemoryStorage, Payment, PaymentDirection,
    PaymentMode, PurchaseInvoice, SalesInvoice, SourceDocument, VatBasis,
};
use tracing_subscriber::EnvFilter;

fn sale(id: &str, date: NaiveDate, ht: i64, rate: i64) -> SourceDocument {
    let tva = ht * rate / 100;
    SalesInvoice {
        id: id.to_string(),
        number: Some(id.to_uppercase()),
        date: Some(date),
        client_name: Some("Client".to_string()),
        total_ht: Some(BigDecimal::from(ht)),
        total_tva: Some(BigDecimal::from(tva)),
        total_ttc: Some(BigDecimal::from(ht + tva)),
        vat_rate: Some(BigDecimal::from(rate)),
    }
    .into()
}

fn purchase(id: &str, date: NaiveDate, ht: i64, rate: i64) -> SourceDocument {
    let tva = ht * rate / 100;
    PurchaseInvoice {
        id: id.to_string(),
        number: Some(id.to_uppercase()),
        date: Some(date),
        supplier_name: Some("Fournisseur".to_string()),
        total_ht: Some(BigDecimal::from(ht)),
        total_tva: Some(BigDecimal::from(tva)),
        total_ttc: Some(BigDecimal::from(ht + tva)),
        vat_rate: Some(BigDecimal::from(rate)),
    }
    .into()
}

fn settlement(id: &str, date: NaiveDate, invoice: &str, amount: i64, direction: PaymentDirection) -> SourceDocument {
    Payment {
        id: id.to_string(),
        date: Some(date),
        amount: Some(BigDecimal::from(amount)),
        direction,
        mode: PaymentMode::Bank,
        invoice_id: Some(invoice.to_string()),
        reference: None,
    }
    .into()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = EngineConfig::load()?;
    let mut engine = AccountingEngine::new(MemoryStorage::new(), config).await?;

    let d = |m: u32, day: u32| NaiveDate::from_ymd_opt(2024, m, day).ok_or("invalid date");
    let documents = vec![
        sale("fv-101", d(1, 10)?, 20_000, 20),
        sale("fv-102", d(1, 22)?, 8_000, 14),
        purchase("fa-201", d(1, 15)?, 30_000, 20),
        settlement("enc-101", d(2, 5)?, "fv-101", 24_000, PaymentDirection::Inbound),
        settlement("dec-201", d(1, 12)?, "fa-201", 36_000, PaymentDirection::Outbound),
        sale("fv-103", d(2, 3)?, 15_000, 10),
    ];
    engine.regenerate_missing(&documents).await?;

    for basis in [VatBasis::Accrual, VatBasis::Cash] {
        println!("🧾 VAT returns ({basis:?})");
        for month in 1..=2 {
            let vat_return = engine.vat().calculer_declaration(month, 2024, basis).await?;
            println!(
                "  {}: collected {} deductible {} carried {} → due {} / credit {}",
                vat_return.periode,
                vat_return.total_collected,
                vat_return.total_deductible,
                vat_return.credit_reporte,
                vat_return.tva_a_payer,
                vat_return.tva_credit
            );
            for bucket in &vat_return.buckets {
                println!(
                    "    {}%: collected {} deductible {}",
                    bucket.rate, bucket.collected, bucket.deductible
                );
            }
        }
        println!();
    }

    let january = engine.vat().find(1, 2024).await?.ok_or("missing return")?;
    engine.vat().valider(&january.id).await?;
    let filed = engine.vat().deposer(&january.id, d(2, 20)?).await?;
    println!("📮 {} filed on {:?}\n", filed.periode, filed.filing_date);

    let is = engine.tax().calculer_is(DateRange::year(2024)?, None).await?;
    println!("🏛  IS 2024");
    println!("  résultat comptable {}", is.resultat_comptable);
    println!("  réintégrations     {}", is.reintegrations);
    println!("  résultat fiscal    {}", is.resultat_fiscal);
    for slice in &is.slices {
        println!("    {}% on {} = {}", slice.rate, slice.base, slice.tax);
    }
    println!("  IS calculé {} / cotisation minimale {} → dû {}", is.is_calcule, is.cotisation_minimale, is.is_due);

    let plan = engine.tax().calculer_acomptes(2025).await?;
    println!("\n📅 Acomptes 2025 (base {})", plan.reference_due);
    for installment in &plan.installments {
        println!("  #{} {} : {}", installment.number, installment.due_date, installment.amount);
    }

    Ok(())
}
