//! Chart of accounts management

use tracing::{debug, info};

use crate::traits::*;
use crate::types::*;
use crate::types::AccountType::{Asset, Expense, Liability, Revenue, Treasury};

/// One row of a chart seed table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedAccount {
    pub code: &'static str,
    pub label: &'static str,
    pub class: u8,
    pub account_type: AccountType,
    pub parent: Option<&'static str>,
}

const fn seed(
    code: &'static str,
    label: &'static str,
    class: u8,
    account_type: AccountType,
) -> SeedAccount {
    SeedAccount {
        code,
        label,
        class,
        account_type,
        parent: None,
    }
}

const fn child(
    code: &'static str,
    label: &'static str,
    class: u8,
    account_type: AccountType,
    parent: &'static str,
) -> SeedAccount {
    SeedAccount {
        code,
        label,
        class,
        account_type,
        parent: Some(parent),
    }
}

/// Standard Moroccan chart (CGNC), classes 1 to 7
pub static STANDARD_CHART: &[SeedAccount] = &[
    // Capitaux propres
    seed("1111", "Capital social", 1, Liability),
    seed("1140", "Réserves", 1, Liability),
    seed("1151", "Résultat net de l'exercice", 1, Liability),
    seed("1181", "Report à nouveau", 1, Liability),
    // Immobilisations
    seed("2111", "Terrains", 2, Asset),
    seed("2112", "Constructions", 2, Asset),
    seed("2230", "Matériel de transport", 2, Asset),
    seed("2240", "Matériel informatique", 2, Asset),
    seed("2811", "Amortissements terrains", 2, Asset),
    seed("2812", "Amortissements constructions", 2, Asset),
    // Stocks
    seed("3111", "Matières premières", 3, Asset),
    seed("3112", "Matières et fournitures consommables", 3, Asset),
    seed("3121", "Produits en cours", 3, Asset),
    seed("3131", "Produits finis", 3, Asset),
    seed("3151", "Marchandises", 3, Asset),
    // Tiers
    seed("4111", "Clients", 4, Asset),
    child("41111", "Clients - Ventes", 4, Asset, "4111"),
    child("41119", "Clients - Autres", 4, Asset, "4111"),
    seed("4411", "Fournisseurs", 4, Liability),
    child("44111", "Fournisseurs - Achats", 4, Liability, "4411"),
    child("44119", "Fournisseurs - Autres", 4, Liability, "4411"),
    seed("4455", "TVA à payer", 4, Liability),
    seed("4456", "TVA déductible", 4, Asset),
    seed("4457", "TVA collectée", 4, Liability),
    seed("4441", "État - Impôts sur les bénéfices", 4, Liability),
    seed("4442", "État - Autres impôts", 4, Liability),
    seed("4443", "État - TVA à payer", 4, Liability),
    seed("4444", "État - TVA crédit", 4, Asset),
    seed("4211", "Personnel - Rémunérations dues", 4, Liability),
    seed("4251", "Organismes sociaux - Charges à payer", 4, Liability),
    // Trésorerie
    seed("5141", "Banques", 5, Treasury),
    seed("5161", "Caisse", 5, Treasury),
    seed("5311", "Valeurs mobilières de placement", 5, Asset),
    // Charges
    seed("6111", "Achats de matières premières", 6, Expense),
    seed("6112", "Achats de matières et fournitures consommables", 6, Expense),
    seed("6113", "Achats d'emballages", 6, Expense),
    seed("6114", "Achats de marchandises", 6, Expense),
    seed("6121", "Variations de stocks de matières premières", 6, Expense),
    seed("6122", "Variations de stocks de matières et fournitures", 6, Expense),
    seed("6123", "Variations de stocks d'emballages", 6, Expense),
    seed("6124", "Variations de stocks de marchandises", 6, Expense),
    seed("6131", "Services extérieurs", 6, Expense),
    seed("6132", "Locations et charges locatives", 6, Expense),
    seed("6133", "Assurances", 6, Expense),
    seed("6134", "Charges de personnel extérieur", 6, Expense),
    seed("6135", "Publicité, publications et relations publiques", 6, Expense),
    seed("6136", "Transports", 6, Expense),
    seed("6137", "Télécommunications", 6, Expense),
    seed("6138", "Eau, électricité et autres charges", 6, Expense),
    seed("6171", "Salaires", 6, Expense),
    seed("6172", "Charges sociales", 6, Expense),
    seed("6173", "Autres charges de personnel", 6, Expense),
    seed("6181", "Dotations aux amortissements", 6, Expense),
    seed("6182", "Dotations aux provisions", 6, Expense),
    seed("6191", "Pertes sur créances irrécouvrables", 6, Expense),
    seed("6211", "Intérêts et charges assimilées", 6, Expense),
    seed("6311", "Impôts, taxes et droits assimilés", 6, Expense),
    seed("6312", "Impôt sur les bénéfices", 6, Expense),
    seed("6511", "Pertes sur créances clients", 6, Expense),
    seed("6711", "Charges exceptionnelles", 6, Expense),
    // Produits
    seed("7111", "Ventes de produits finis", 7, Revenue),
    seed("7112", "Ventes de produits intermédiaires", 7, Revenue),
    seed("7113", "Ventes de produits résiduels", 7, Revenue),
    seed("7121", "Ventes de marchandises", 7, Revenue),
    seed("7131", "Variations de stocks de produits finis", 7, Revenue),
    seed("7132", "Variations de stocks de produits intermédiaires", 7, Revenue),
    seed("7133", "Variations de stocks de produits résiduels", 7, Revenue),
    seed("7134", "Variations de stocks de marchandises", 7, Revenue),
    seed("7211", "Produits accessoires", 7, Revenue),
    seed("7311", "Revenus des créances", 7, Revenue),
    seed("7411", "Subventions d'exploitation", 7, Revenue),
    seed("7511", "Produits exceptionnels", 7, Revenue),
    seed("7611", "Produits financiers", 7, Revenue),
];

/// Check a seed table before anything is written.
///
/// Rejects class digits outside 1 to 7, codes not starting with their class
/// digit, duplicate codes and parents that are not earlier rows prefixing the
/// child code.
pub fn validate_seed(table: &[SeedAccount]) -> LedgerResult<()> {
    for (i, row) in table.iter().enumerate() {
        if !(1..=7).contains(&row.class) {
            return Err(LedgerError::SeedCorrupted(format!(
                "account {} has class {}",
                row.code, row.class
            )));
        }
        let class_digit = char::from(b'0' + row.class);
        if !row.code.starts_with(class_digit) || !row.code.chars().all(|c| c.is_ascii_digit()) {
            return Err(LedgerError::SeedCorrupted(format!(
                "account code {} does not match class {}",
                row.code, row.class
            )));
        }
        let earlier = &table[..i];
        if earlier.iter().any(|r| r.code == row.code) {
            return Err(LedgerError::SeedCorrupted(format!(
                "duplicate account code {}",
                row.code
            )));
        }
        if let Some(parent) = row.parent {
            if !earlier.iter().any(|r| r.code == parent) || !row.code.starts_with(parent) {
                return Err(LedgerError::SeedCorrupted(format!(
                    "account {} has unknown parent {}",
                    row.code, parent
                )));
            }
        }
    }
    Ok(())
}

/// Chart of accounts backed by ledger storage
#[derive(Clone)]
pub struct ChartOfAccounts<S: LedgerStorage> {
    storage: S,
}

impl<S: LedgerStorage> ChartOfAccounts<S> {
    /// Create a new chart of accounts
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Seed the standard chart; returns the number of accounts created
    pub async fn initialize(&mut self) -> LedgerResult<usize> {
        self.initialize_from(STANDARD_CHART).await
    }

    /// Seed from a custom table.
    ///
    /// Idempotent: existing accounts are left untouched, totals included.
    pub async fn initialize_from(&mut self, table: &[SeedAccount]) -> LedgerResult<usize> {
        validate_seed(table)?;

        let mut created = 0;
        for row in table {
            if self.storage.get_account(row.code).await?.is_some() {
                continue;
            }
            let account = Account::new(
                row.code.to_string(),
                row.label.to_string(),
                row.class,
                row.account_type,
                row.parent.map(str::to_string),
            );
            self.storage.save_account(&account).await?;
            created += 1;
        }

        if created > 0 {
            info!(created, total = table.len(), "chart of accounts seeded");
        } else {
            debug!("chart of accounts already initialized");
        }
        Ok(created)
    }

    /// Active accounts sorted by code
    pub async fn get_active(&self) -> LedgerResult<Vec<Account>> {
        let mut accounts: Vec<Account> = self
            .storage
            .list_accounts(None)
            .await?
            .into_iter()
            .filter(|a| a.active)
            .collect();
        accounts.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(accounts)
    }

    /// Get an account by code, returning an error if not found
    pub async fn get_by_code(&self, code: &str) -> LedgerResult<Account> {
        self.storage
            .get_account(code)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(code.to_string()))
    }

    /// Refuse further postings on an account. Accounts are never deleted.
    pub async fn deactivate(&mut self, code: &str) -> LedgerResult<Account> {
        let mut account = self.get_by_code(code).await?;
        if account.active {
            account.active = false;
            account.updated_at = chrono::Utc::now().naive_utc();
            self.storage.update_account(&account).await?;
            info!(code, "account deactivated");
        }
        Ok(account)
    }

    /// Direct sub-accounts of an account
    pub async fn children(&self, code: &str) -> LedgerResult<Vec<Account>> {
        let mut children: Vec<Account> = self
            .storage
            .list_accounts(None)
            .await?
            .into_iter()
            .filter(|account| account.parent_code.as_deref() == Some(code))
            .collect();
        children.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(children)
    }

    /// Path from the root collective account down to `code`
    pub async fn account_path(&self, code: &str) -> LedgerResult<Vec<Account>> {
        let mut path = Vec::new();
        let mut current = Some(code.to_string());

        while let Some(code) = current {
            let account = self.get_by_code(&code).await?;
            current = account.parent_code.clone();
            path.insert(0, account);
        }

        Ok(path)
    }
}
