//! A month of activity posted from business documents, then the statements
//! and the year-end close

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use compta_core::{
    AccountingEngine, Charge, DateRange, EngineConfig, MemoryStorage, Payment, PaymentDirection,
    PaymentMode, PurchaseInvoice, SalesInvoice, SourceDocument,
};
use tracing_subscriber::EnvFilter;

fn day(d: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(2024, 3, d)
}

fn documents() -> Vec<SourceDocument> {
    vec![
        SalesInvoice {
            id: "fv-001".to_string(),
            number: Some("2024-001".to_string()),
            date: day(4),
            client_name: Some("Atlas SARL".to_string()),
            total_ht: Some(BigDecimal::from(12_000)),
            total_tva: Some(BigDecimal::from(2_400)),
            total_ttc: Some(BigDecimal::from(14_400)),
            vat_rate: Some(BigDecimal::from(20)),
        }
        .into(),
        PurchaseInvoice {
            id: "fa-001".to_string(),
            number: Some("F-7781".to_string()),
            date: day(6),
            supplier_name: Some("Sud Fournitures".to_string()),
            total_ht: Some(BigDecimal::from(5_000)),
            total_tva: Some(BigDecimal::from(1_000)),
            total_ttc: Some(BigDecimal::from(6_000)),
            vat_rate: Some(BigDecimal::from(20)),
        }
        .into(),
        Payment {
            id: "pay-client-001".to_string(),
            date: day(18),
            amount: Some(BigDecimal::from(14_400)),
            direction: PaymentDirection::Inbound,
            mode: PaymentMode::Bank,
            invoice_id: Some("fv-001".to_string()),
            reference: Some("VIR 55120".to_string()),
        }
        .into(),
        Payment {
            id: "pay-fourn-001".to_string(),
            date: day(25),
            amount: Some(BigDecimal::from(3_000)),
            direction: PaymentDirection::Outbound,
            mode: PaymentMode::Bank,
            invoice_id: Some("fa-001".to_string()),
            reference: None,
        }
        .into(),
        Charge {
            id: "chg-loyer-03".to_string(),
            label: Some("Loyer mars".to_string()),
            category: Some("Loyer".to_string()),
            amount: Some(BigDecimal::from(2_500)),
            paid: true,
            payment_date: day(31),
            deductible: true,
        }
        .into(),
    ]
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut engine = AccountingEngine::new(MemoryStorage::new(), EngineConfig::default()).await?;

    println!("📥 Posting March documents...");
    let report = engine.regenerate_missing(&documents()).await?;
    println!(
        "  ✓ {} entries created, {} skipped, {} errors\n",
        report.total_created(),
        report.skipped,
        report.errors.len()
    );

    let march = DateRange::month(2024, 3)?;
    let trial = engine.ledger().trial_balance(march, None).await?;
    println!("📊 Balance générale (mars 2024)");
    for balance in &trial.balances {
        println!(
            "  {:<6} {:<40} D {:>10} C {:>10} solde {:>10}",
            balance.code, balance.label, balance.total_debit, balance.total_credit, balance.solde
        );
    }
    println!(
        "  Totals: D {} / C {} (balanced: {})\n",
        trial.total_debits, trial.total_credits, trial.is_balanced
    );

    let end_of_month = NaiveDate::from_ymd_opt(2024, 3, 31).ok_or("invalid date")?;
    let bilan = engine.statements().bilan(end_of_month, None).await?;
    println!("🏦 Bilan au {end_of_month}");
    for line in bilan.actif.iter().chain(bilan.passif.iter()) {
        println!("  {:<28} {:>10}", line.section.label(), line.amount);
    }
    println!("  Total actif {} = total passif {}\n", bilan.total_actif, bilan.total_passif);

    let cpc = engine.statements().cpc(march, None).await?;
    println!("📈 CPC: produits {} - charges {} = résultat {}", cpc.produits, cpc.charges, cpc.resultat);
    println!(
        "  exploitation {} / financier {} / non courant {}\n",
        cpc.breakdown.resultat_exploitation,
        cpc.breakdown.resultat_financier,
        cpc.breakdown.resultat_non_courant
    );

    let suppliers = engine.reconciliation().open_items("44111").await?;
    println!("🔗 {} open items on suppliers", suppliers.len());

    let period = engine
        .periods()
        .period_for_date(end_of_month)
        .await?
        .ok_or("no fiscal period")?;
    let closed = engine.periods().close(&period.id).await?;
    println!("🔒 Exercice {} closed", closed.code);

    Ok(())
}
