//! Balance sheet (bilan) and income statement (CPC)

use bigdecimal::BigDecimal;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::error;

use crate::ledger::core::{aggregate_balances, Ledger};
use crate::traits::*;
use crate::types::*;

/// Sections of the bilan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BilanSection {
    /// Class 2
    ActifImmobilise,
    /// Class 3
    Stocks,
    /// Class 4 accounts with a debit balance
    Creances,
    /// Class 5 accounts with a debit balance
    TresorerieActif,
    /// Class 1, plus the results of earlier exercises (report à nouveau)
    CapitauxPropres,
    /// Classes 7 minus 6 since the start of the exercise
    ResultatExercice,
    /// Class 4 accounts with a credit balance
    Dettes,
    /// Class 5 accounts with a credit balance
    TresoreriePassif,
}

impl BilanSection {
    pub fn label(&self) -> &'static str {
        match self {
            BilanSection::ActifImmobilise => "Actif immobilisé",
            BilanSection::Stocks => "Stocks",
            BilanSection::Creances => "Créances",
            BilanSection::TresorerieActif => "Trésorerie actif",
            BilanSection::CapitauxPropres => "Capitaux propres",
            BilanSection::ResultatExercice => "Résultat de l'exercice",
            BilanSection::Dettes => "Dettes",
            BilanSection::TresoreriePassif => "Trésorerie passif",
        }
    }
}

/// One amount of the bilan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BilanLine {
    pub section: BilanSection,
    pub amount: BigDecimal,
}

/// Balance sheet at a date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bilan {
    pub date: NaiveDate,
    pub period_id: Option<String>,
    pub actif: Vec<BilanLine>,
    pub passif: Vec<BilanLine>,
    pub total_actif: BigDecimal,
    pub total_passif: BigDecimal,
}

impl Bilan {
    pub fn amount(&self, section: BilanSection) -> BigDecimal {
        self.actif
            .iter()
            .chain(self.passif.iter())
            .filter(|l| l.section == section)
            .map(|l| &l.amount)
            .sum()
    }
}

/// Headings of the CPC breakdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CpcHeading {
    ProduitsExploitation,
    ChargesExploitation,
    ProduitsFinanciers,
    ChargesFinancieres,
    ProduitsNonCourants,
    ChargesNonCourantes,
    ImpotSurResultats,
}

/// Account prefix to CPC heading, longest prefix wins
static CPC_PREFIXES: LazyLock<Vec<(&'static str, CpcHeading)>> = LazyLock::new(|| {
    let mut table = vec![
        ("6", CpcHeading::ChargesExploitation),
        ("62", CpcHeading::ChargesFinancieres),
        ("65", CpcHeading::ChargesNonCourantes),
        ("67", CpcHeading::ChargesNonCourantes),
        ("6312", CpcHeading::ImpotSurResultats),
        ("7", CpcHeading::ProduitsExploitation),
        ("73", CpcHeading::ProduitsFinanciers),
        ("76", CpcHeading::ProduitsFinanciers),
        ("75", CpcHeading::ProduitsNonCourants),
    ];
    table.sort_by_key(|(prefix, _)| std::cmp::Reverse(prefix.len()));
    table
});

/// CPC heading of a class 6 or 7 account
pub fn cpc_heading(account_code: &str) -> Option<CpcHeading> {
    CPC_PREFIXES
        .iter()
        .find(|(prefix, _)| account_code.starts_with(prefix))
        .map(|(_, heading)| *heading)
}

/// Detailed CPC results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpcBreakdown {
    pub produits_exploitation: BigDecimal,
    pub charges_exploitation: BigDecimal,
    pub resultat_exploitation: BigDecimal,
    pub produits_financiers: BigDecimal,
    pub charges_financieres: BigDecimal,
    pub resultat_financier: BigDecimal,
    pub resultat_courant: BigDecimal,
    pub produits_non_courants: BigDecimal,
    pub charges_non_courantes: BigDecimal,
    pub resultat_non_courant: BigDecimal,
    pub resultat_avant_impot: BigDecimal,
    pub impot_sur_resultats: BigDecimal,
    pub resultat_net: BigDecimal,
}

/// Income statement over a range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cpc {
    pub range: DateRange,
    pub period_id: Option<String>,
    /// Class 7 total
    pub produits: BigDecimal,
    /// Class 6 total
    pub charges: BigDecimal,
    pub resultat: BigDecimal,
    pub breakdown: CpcBreakdown,
}

/// Assemble a bilan; fails if it does not balance.
///
/// `cumulative` holds every movement up to the date and gives classes 1
/// to 5. `exercise` holds the movements of the current exercise only and
/// gives its result; the results of earlier exercises are carried in the
/// capitaux propres.
pub fn build_bilan(
    date: NaiveDate,
    period_id: Option<String>,
    cumulative: &[AccountBalance],
    exercise: &[AccountBalance],
) -> LedgerResult<Bilan> {
    let zero = BigDecimal::from(0);
    let class_net_debit = |balances: &[AccountBalance], class: u8| -> BigDecimal {
        balances
            .iter()
            .filter(|b| b.class == class)
            .map(|b| b.net_debit())
            .sum()
    };
    let net_debit_of = |class: u8| class_net_debit(cumulative, class);
    let split = |class: u8| -> (BigDecimal, BigDecimal) {
        cumulative
            .iter()
            .filter(|b| b.class == class)
            .map(|b| b.net_debit())
            .fold((zero.clone(), zero.clone()), |(debit, credit), net| {
                if net > zero {
                    (debit + net, credit)
                } else {
                    (debit, credit - net)
                }
            })
    };

    let (creances, dettes) = split(4);
    let (tresorerie_actif, tresorerie_passif) = split(5);
    let resultat = -(class_net_debit(exercise, 6) + class_net_debit(exercise, 7));
    let report_a_nouveau = -(net_debit_of(6) + net_debit_of(7)) - &resultat;

    let actif = vec![
        BilanLine {
            section: BilanSection::ActifImmobilise,
            amount: net_debit_of(2),
        },
        BilanLine {
            section: BilanSection::Stocks,
            amount: net_debit_of(3),
        },
        BilanLine {
            section: BilanSection::Creances,
            amount: creances,
        },
        BilanLine {
            section: BilanSection::TresorerieActif,
            amount: tresorerie_actif,
        },
    ];
    let passif = vec![
        BilanLine {
            section: BilanSection::CapitauxPropres,
            amount: report_a_nouveau - net_debit_of(1),
        },
        BilanLine {
            section: BilanSection::ResultatExercice,
            amount: resultat,
        },
        BilanLine {
            section: BilanSection::Dettes,
            amount: dettes,
        },
        BilanLine {
            section: BilanSection::TresoreriePassif,
            amount: tresorerie_passif,
        },
    ];

    let total_actif: BigDecimal = actif.iter().map(|l| &l.amount).sum();
    let total_passif: BigDecimal = passif.iter().map(|l| &l.amount).sum();

    if total_actif != total_passif {
        error!(
            %date,
            actif = %total_actif,
            passif = %total_passif,
            "balance sheet does not balance"
        );
        return Err(LedgerError::IntegrityViolation {
            date,
            actif: total_actif,
            passif: total_passif,
        });
    }

    Ok(Bilan {
        date,
        period_id,
        actif,
        passif,
        total_actif,
        total_passif,
    })
}

/// Assemble a CPC from balances
pub fn build_cpc(range: DateRange, period_id: Option<String>, balances: &[AccountBalance]) -> Cpc {
    let mut b = CpcBreakdown::default();
    let mut produits = BigDecimal::from(0);
    let mut charges = BigDecimal::from(0);

    for balance in balances.iter().filter(|b| b.class == 6 || b.class == 7) {
        let solde = &balance.solde;
        match balance.class {
            6 => charges += solde,
            _ => produits += solde,
        }
        let bucket = match cpc_heading(&balance.code) {
            Some(CpcHeading::ProduitsExploitation) => &mut b.produits_exploitation,
            Some(CpcHeading::ChargesExploitation) => &mut b.charges_exploitation,
            Some(CpcHeading::ProduitsFinanciers) => &mut b.produits_financiers,
            Some(CpcHeading::ChargesFinancieres) => &mut b.charges_financieres,
            Some(CpcHeading::ProduitsNonCourants) => &mut b.produits_non_courants,
            Some(CpcHeading::ChargesNonCourantes) => &mut b.charges_non_courantes,
            Some(CpcHeading::ImpotSurResultats) => &mut b.impot_sur_resultats,
            None => continue,
        };
        *bucket += solde;
    }

    b.resultat_exploitation = &b.produits_exploitation - &b.charges_exploitation;
    b.resultat_financier = &b.produits_financiers - &b.charges_financieres;
    b.resultat_courant = &b.resultat_exploitation + &b.resultat_financier;
    b.resultat_non_courant = &b.produits_non_courants - &b.charges_non_courantes;
    b.resultat_avant_impot = &b.resultat_courant + &b.resultat_non_courant;
    b.resultat_net = &b.resultat_avant_impot - &b.impot_sur_resultats;

    Cpc {
        range,
        period_id,
        resultat: &produits - &charges,
        produits,
        charges,
        breakdown: b,
    }
}

/// Builds statements from ledger snapshots
#[derive(Clone)]
pub struct FinancialStatementBuilder<S: LedgerStorage> {
    ledger: Ledger<S>,
}

impl<S: LedgerStorage + Clone> FinancialStatementBuilder<S> {
    pub fn new(ledger: Ledger<S>) -> Self {
        Self { ledger }
    }

    /// Bilan at `date`.
    ///
    /// Positions come from every entry up to the date. The result of the
    /// exercise runs from the start of `period_id`, or of the period
    /// covering the date (its calendar year when none does).
    pub async fn bilan(&self, date: NaiveDate, period_id: Option<&str>) -> LedgerResult<Bilan> {
        let exercise_start = match period_id {
            Some(id) => self.ledger.periods().get(id).await?.start_date,
            None => match self.ledger.periods().period_for_date(date).await? {
                Some(period) => period.start_date,
                None => NaiveDate::from_ymd_opt(date.year(), 1, 1)
                    .ok_or_else(|| LedgerError::Validation(format!("Invalid date {date}")))?,
            },
        };

        let snapshot = self.ledger.snapshot(DateRange::until(date), None).await?;
        let cumulative = aggregate_balances(&snapshot.accounts, &snapshot.entries);
        let exercise = aggregate_balances(
            &snapshot.accounts,
            snapshot.entries.iter().filter(|e| e.date >= exercise_start),
        );
        build_bilan(date, period_id.map(str::to_string), &cumulative, &exercise)
    }

    /// CPC over a range, narrowed to `period_id` when given
    pub async fn cpc(&self, range: DateRange, period_id: Option<&str>) -> LedgerResult<Cpc> {
        Ok(self.cpc_with_snapshot(range, period_id).await?.0)
    }

    /// CPC together with the ledger snapshot it was built from
    pub(crate) async fn cpc_with_snapshot(
        &self,
        range: DateRange,
        period_id: Option<&str>,
    ) -> LedgerResult<(Cpc, LedgerSnapshot)> {
        let range = match period_id {
            Some(id) => range.intersect(&self.ledger.periods().get(id).await?.range()),
            None => range,
        };
        let snapshot = self.ledger.snapshot(range, period_id).await?;
        let balances = aggregate_balances(&snapshot.accounts, &snapshot.entries);
        let cpc = build_cpc(range, period_id.map(str::to_string), &balances);
        Ok((cpc, snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balance(code: &str, account_type: AccountType, debit: i64, credit: i64) -> AccountBalance {
        let total_debit = BigDecimal::from(debit);
        let total_credit = BigDecimal::from(credit);
        AccountBalance {
            code: code.to_string(),
            label: code.to_string(),
            class: code[..1].parse().unwrap(),
            account_type,
            solde: account_type.solde(&total_debit, &total_credit),
            total_debit,
            total_credit,
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 12, 31).unwrap()
    }

    #[test]
    fn test_cpc_heading_longest_prefix() {
        assert_eq!(cpc_heading("6312"), Some(CpcHeading::ImpotSurResultats));
        assert_eq!(cpc_heading("6311"), Some(CpcHeading::ChargesExploitation));
        assert_eq!(cpc_heading("6211"), Some(CpcHeading::ChargesFinancieres));
        assert_eq!(cpc_heading("6711"), Some(CpcHeading::ChargesNonCourantes));
        assert_eq!(cpc_heading("7611"), Some(CpcHeading::ProduitsFinanciers));
        assert_eq!(cpc_heading("7511"), Some(CpcHeading::ProduitsNonCourants));
        assert_eq!(cpc_heading("7121"), Some(CpcHeading::ProduitsExploitation));
        assert_eq!(cpc_heading("5141"), None);
    }

    #[test]
    fn test_bilan_sections() {
        // Capital 10 000 into the bank, a sale of 1 200 TTC, a purchase of 480 TTC
        let balances = vec![
            balance("1111", AccountType::Liability, 0, 10_000),
            balance("41111", AccountType::Asset, 1_200, 0),
            balance("4456", AccountType::Asset, 80, 0),
            balance("44111", AccountType::Liability, 0, 480),
            balance("4457", AccountType::Liability, 0, 200),
            balance("5141", AccountType::Treasury, 10_000, 0),
            balance("6114", AccountType::Expense, 400, 0),
            balance("7121", AccountType::Revenue, 0, 1_000),
        ];
        let bilan = build_bilan(date(), None, &balances, &balances).unwrap();
        assert_eq!(bilan.amount(BilanSection::Creances), BigDecimal::from(1_280));
        assert_eq!(bilan.amount(BilanSection::TresorerieActif), BigDecimal::from(10_000));
        assert_eq!(bilan.amount(BilanSection::CapitauxPropres), BigDecimal::from(10_000));
        assert_eq!(bilan.amount(BilanSection::Dettes), BigDecimal::from(680));
        assert_eq!(bilan.amount(BilanSection::ResultatExercice), BigDecimal::from(600));
        assert_eq!(bilan.total_actif, BigDecimal::from(11_280));
        assert_eq!(bilan.total_actif, bilan.total_passif);
    }

    #[test]
    fn test_overdraft_goes_to_passif() {
        let balances = vec![
            balance("5141", AccountType::Treasury, 0, 300),
            balance("6132", AccountType::Expense, 300, 0),
        ];
        let bilan = build_bilan(date(), None, &balances, &balances).unwrap();
        assert_eq!(bilan.amount(BilanSection::TresoreriePassif), BigDecimal::from(300));
        assert_eq!(bilan.amount(BilanSection::ResultatExercice), BigDecimal::from(-300));
        assert_eq!(bilan.total_actif, BigDecimal::from(0));
    }

    #[test]
    fn test_earlier_results_move_to_capitaux_propres() {
        // Two exercises of 1 000 revenue each, the first one collected
        let cumulative = vec![
            balance("41111", AccountType::Asset, 2_400, 1_200),
            balance("4457", AccountType::Liability, 0, 400),
            balance("5141", AccountType::Treasury, 1_200, 0),
            balance("7121", AccountType::Revenue, 0, 2_000),
        ];
        let exercise = vec![
            balance("41111", AccountType::Asset, 1_200, 0),
            balance("4457", AccountType::Liability, 0, 200),
            balance("7121", AccountType::Revenue, 0, 1_000),
        ];
        let bilan = build_bilan(date(), None, &cumulative, &exercise).unwrap();
        assert_eq!(bilan.amount(BilanSection::Creances), BigDecimal::from(1_200));
        assert_eq!(bilan.amount(BilanSection::TresorerieActif), BigDecimal::from(1_200));
        assert_eq!(bilan.amount(BilanSection::ResultatExercice), BigDecimal::from(1_000));
        assert_eq!(bilan.amount(BilanSection::CapitauxPropres), BigDecimal::from(1_000));
        assert_eq!(bilan.amount(BilanSection::Dettes), BigDecimal::from(400));
        assert_eq!(bilan.total_actif, bilan.total_passif);
    }

    #[test]
    fn test_unbalanced_data_is_an_integrity_violation() {
        let balances = vec![balance("5141", AccountType::Treasury, 500, 0)];
        let err = build_bilan(date(), None, &balances, &balances).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Integrity);
    }

    #[test]
    fn test_cpc_breakdown_sums_to_result() {
        let balances = vec![
            balance("7121", AccountType::Revenue, 0, 50_000),
            balance("7611", AccountType::Revenue, 0, 1_000),
            balance("6114", AccountType::Expense, 30_000, 0),
            balance("6211", AccountType::Expense, 2_000, 0),
            balance("6711", AccountType::Expense, 500, 0),
            balance("6312", AccountType::Expense, 1_500, 0),
        ];
        let cpc = build_cpc(DateRange::all(), None, &balances);
        assert_eq!(cpc.produits, BigDecimal::from(51_000));
        assert_eq!(cpc.charges, BigDecimal::from(34_000));
        assert_eq!(cpc.resultat, BigDecimal::from(17_000));
        assert_eq!(cpc.breakdown.resultat_exploitation, BigDecimal::from(20_000));
        assert_eq!(cpc.breakdown.resultat_financier, BigDecimal::from(-1_000));
        assert_eq!(cpc.breakdown.resultat_avant_impot, BigDecimal::from(18_500));
        assert_eq!(cpc.breakdown.resultat_net, cpc.resultat);
    }
}
