//! Chart of accounts management

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::traits::*;
use crate::types::*;

/// Input for creating an account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAccount {
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    pub subtype: String,
    pub parent_id: Option<Uuid>,
    pub description: Option<String>,
}

impl NewAccount {
    pub fn new(code: &str, name: &str, account_type: AccountType) -> Self {
        Self {
            code: code.to_string(),
            name: name.to_string(),
            account_type,
            subtype: String::new(),
            parent_id: None,
            description: None,
        }
    }

    pub fn subtype(mut self, subtype: &str) -> Self {
        self.subtype = subtype.to_string();
        self
    }

    pub fn parent(mut self, parent_id: Uuid) -> Self {
        self.parent_id = Some(parent_id);
        self
    }
}

/// Patch for an account's descriptive fields; `None` leaves a field untouched.
/// `parent_id: Some(None)` detaches the account from its parent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountUpdate {
    pub code: Option<String>,
    pub name: Option<String>,
    pub subtype: Option<String>,
    pub description: Option<String>,
    pub parent_id: Option<Option<Uuid>>,
    pub is_active: Option<bool>,
}

/// Filters for listing accounts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountFilter {
    pub account_type: Option<AccountType>,
    pub subtype: Option<String>,
    /// Case-insensitive match on code or name
    pub search: Option<String>,
    pub is_active: Option<bool>,
    pub parent_id: Option<Uuid>,
}

impl AccountFilter {
    pub fn matches(&self, account: &Account) -> bool {
        if account.is_deleted {
            return false;
        }
        if self.account_type.is_some_and(|t| account.account_type != t) {
            return false;
        }
        if let Some(subtype) = &self.subtype {
            if &account.subtype != subtype {
                return false;
            }
        }
        if self.is_active.is_some_and(|a| account.is_active != a) {
            return false;
        }
        if self.parent_id.is_some() && account.parent_id != self.parent_id {
            return false;
        }
        if let Some(search) = &self.search {
            let needle = search.to_lowercase();
            if !account.code.to_lowercase().contains(&needle)
                && !account.name.to_lowercase().contains(&needle)
            {
                return false;
            }
        }
        true
    }
}

/// Presentation view of the account hierarchy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountNode {
    pub account: Account,
    pub children: Vec<AccountNode>,
}

/// Account manager for handling chart of accounts operations
pub struct AccountManager<S: LedgerStorage> {
    pub(crate) storage: S,
    validator: Box<dyn AccountValidator>,
}

impl<S: LedgerStorage> AccountManager<S> {
    /// Create a new account manager
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            validator: Box::new(DefaultAccountValidator),
        }
    }

    /// Create a new account manager with custom validator
    pub fn with_validator(storage: S, validator: Box<dyn AccountValidator>) -> Self {
        Self { storage, validator }
    }

    /// Create a new account
    pub async fn create_account(
        &mut self,
        tenant_id: TenantId,
        input: NewAccount,
    ) -> LedgerResult<Account> {
        let mut account = Account::new(
            tenant_id,
            input.code.trim().to_string(),
            input.name.trim().to_string(),
            input.account_type,
            input.parent_id,
        );
        account.subtype = input.subtype;
        account.description = input.description;

        self.validator.validate_account(&account)?;

        if self
            .storage
            .find_account_by_code(tenant_id, &account.code)
            .await?
            .is_some()
        {
            return Err(LedgerError::DuplicateAccountCode(account.code));
        }

        if let Some(parent_id) = account.parent_id {
            self.check_parent(tenant_id, parent_id, account.account_type)
                .await?;
        }

        self.storage.insert_account(&account).await?;
        tracing::info!(
            tenant = %tenant_id,
            code = %account.code,
            account_type = ?account.account_type,
            "account created"
        );

        Ok(account)
    }

    /// Get an account by ID
    pub async fn get_account(
        &self,
        tenant_id: TenantId,
        account_id: Uuid,
    ) -> LedgerResult<Option<Account>> {
        Ok(self
            .storage
            .get_account(tenant_id, account_id)
            .await?
            .filter(|a| !a.is_deleted))
    }

    /// Get an account by ID, returning an error if not found
    pub async fn get_account_required(
        &self,
        tenant_id: TenantId,
        account_id: Uuid,
    ) -> LedgerResult<Account> {
        self.get_account(tenant_id, account_id)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))
    }

    /// Get a live account by its code
    pub async fn find_by_code(
        &self,
        tenant_id: TenantId,
        code: &str,
    ) -> LedgerResult<Option<Account>> {
        self.storage.find_account_by_code(tenant_id, code).await
    }

    /// List accounts matching a filter, ordered by code
    pub async fn list_accounts(
        &self,
        tenant_id: TenantId,
        filter: &AccountFilter,
    ) -> LedgerResult<Vec<Account>> {
        self.storage.list_accounts(tenant_id, filter).await
    }

    /// Update an account's descriptive fields
    pub async fn update_account(
        &mut self,
        tenant_id: TenantId,
        account_id: Uuid,
        update: AccountUpdate,
    ) -> LedgerResult<Account> {
        let mut account = self.get_account_required(tenant_id, account_id).await?;
        if account.is_system {
            return Err(LedgerError::SystemAccountProtected(account.code));
        }

        if let Some(code) = update.code {
            let code = code.trim().to_string();
            if code != account.code {
                if self
                    .storage
                    .find_account_by_code(tenant_id, &code)
                    .await?
                    .is_some()
                {
                    return Err(LedgerError::DuplicateAccountCode(code));
                }
                account.code = code;
            }
        }
        if let Some(name) = update.name {
            account.name = name.trim().to_string();
        }
        if let Some(subtype) = update.subtype {
            account.subtype = subtype;
        }
        if let Some(description) = update.description {
            account.description = Some(description);
        }
        if let Some(is_active) = update.is_active {
            account.is_active = is_active;
        }
        if let Some(parent_id) = update.parent_id {
            if let Some(parent_id) = parent_id {
                self.check_parent(tenant_id, parent_id, account.account_type)
                    .await?;
                self.check_no_cycle(tenant_id, account.id, parent_id).await?;
            }
            account.parent_id = parent_id;
        }

        self.validator.validate_account(&account)?;
        account.updated_at = now();
        self.storage.update_account(&account).await?;

        Ok(account)
    }

    /// Soft-delete an account that was never posted to. The checks and the
    /// tombstone happen in one storage write, so a concurrent posting either
    /// lands first and blocks the delete or finds the account gone.
    pub async fn delete_account(&mut self, tenant_id: TenantId, account_id: Uuid) -> LedgerResult<()> {
        self.get_account_required(tenant_id, account_id).await?;
        let account = self.storage.tombstone_account(tenant_id, account_id).await?;
        tracing::info!(tenant = %tenant_id, code = %account.code, "account deleted");
        Ok(())
    }

    /// Build the account hierarchy from the flat account list
    pub async fn account_tree(&self, tenant_id: TenantId) -> LedgerResult<Vec<AccountNode>> {
        let accounts = self
            .storage
            .list_accounts(tenant_id, &AccountFilter::default())
            .await?;
        Ok(build_tree(accounts))
    }

    /// Get the chain of accounts from the root down to `account_id`
    pub async fn account_path(
        &self,
        tenant_id: TenantId,
        account_id: Uuid,
    ) -> LedgerResult<Vec<Account>> {
        let mut path = Vec::new();
        let mut seen = HashSet::new();
        let mut current = Some(account_id);

        while let Some(id) = current {
            if !seen.insert(id) {
                return Err(LedgerError::Validation(format!(
                    "account hierarchy contains a cycle at {}",
                    id
                )));
            }
            let account = self.get_account_required(tenant_id, id).await?;
            current = account.parent_id;
            path.insert(0, account);
        }

        Ok(path)
    }

    /// Seed the default chart of accounts. Codes that already exist are left
    /// alone, so calling this twice creates nothing the second time.
    pub async fn seed_default_chart(
        &mut self,
        tenant_id: TenantId,
    ) -> LedgerResult<HashMap<String, Account>> {
        let mut accounts = HashMap::new();
        let mut created = 0usize;

        for seed in DEFAULT_CHART {
            let account = match self.storage.find_account_by_code(tenant_id, seed.code).await? {
                Some(existing) => existing,
                None => {
                    let parent_id = match seed.parent_code {
                        Some(code) => self
                            .storage
                            .find_account_by_code(tenant_id, code)
                            .await?
                            .map(|parent| parent.id),
                        None => None,
                    };
                    let mut account = Account::new(
                        tenant_id,
                        seed.code.to_string(),
                        seed.name.to_string(),
                        seed.account_type,
                        parent_id,
                    );
                    account.subtype = seed.subtype.to_string();
                    account.is_system = true;
                    self.storage.insert_account(&account).await?;
                    created += 1;
                    account
                }
            };
            accounts.insert(seed.key.to_string(), account);
        }

        tracing::info!(tenant = %tenant_id, created, "default chart of accounts seeded");
        Ok(accounts)
    }

    /// Get account balance, recomputed from history when a date is given
    pub async fn get_balance(
        &self,
        tenant_id: TenantId,
        account_id: Uuid,
        as_of_date: Option<chrono::NaiveDate>,
    ) -> LedgerResult<bigdecimal::BigDecimal> {
        self.storage
            .get_account_balance(tenant_id, account_id, as_of_date)
            .await
    }

    async fn check_parent(
        &self,
        tenant_id: TenantId,
        parent_id: Uuid,
        account_type: AccountType,
    ) -> LedgerResult<()> {
        let parent = self
            .get_account(tenant_id, parent_id)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(parent_id.to_string()))?;
        if parent.account_type != account_type {
            return Err(LedgerError::Validation(format!(
                "parent account {} is {:?}, expected {:?}",
                parent.code, parent.account_type, account_type
            )));
        }
        Ok(())
    }

    async fn check_no_cycle(
        &self,
        tenant_id: TenantId,
        account_id: Uuid,
        new_parent_id: Uuid,
    ) -> LedgerResult<()> {
        let ancestors = self.account_path(tenant_id, new_parent_id).await?;
        if ancestors.iter().any(|a| a.id == account_id) {
            return Err(LedgerError::Validation(
                "an account cannot be moved under itself or its descendants".to_string(),
            ));
        }
        Ok(())
    }
}

/// Arrange a flat account list into a tree. Accounts whose parent is not in
/// the list become roots. Siblings are ordered by code.
pub fn build_tree(mut accounts: Vec<Account>) -> Vec<AccountNode> {
    accounts.sort_by(|a, b| a.code.cmp(&b.code));
    let present: HashSet<Uuid> = accounts.iter().map(|a| a.id).collect();

    let mut children_of: HashMap<Uuid, Vec<Account>> = HashMap::new();
    let mut roots = Vec::new();
    for account in accounts {
        match account.parent_id {
            Some(parent) if present.contains(&parent) && parent != account.id => {
                children_of.entry(parent).or_default().push(account)
            }
            _ => roots.push(account),
        }
    }

    fn attach(account: Account, children_of: &mut HashMap<Uuid, Vec<Account>>) -> AccountNode {
        let children = children_of
            .remove(&account.id)
            .unwrap_or_default()
            .into_iter()
            .map(|child| attach(child, children_of))
            .collect();
        AccountNode { account, children }
    }

    roots
        .into_iter()
        .map(|root| attach(root, &mut children_of))
        .collect()
}

struct SeedAccount {
    key: &'static str,
    code: &'static str,
    name: &'static str,
    account_type: AccountType,
    subtype: &'static str,
    parent_code: Option<&'static str>,
}

const fn seed(
    key: &'static str,
    code: &'static str,
    name: &'static str,
    account_type: AccountType,
    subtype: &'static str,
    parent_code: Option<&'static str>,
) -> SeedAccount {
    SeedAccount {
        key,
        code,
        name,
        account_type,
        subtype,
        parent_code,
    }
}

// Parents are listed before their children.
const DEFAULT_CHART: &[SeedAccount] = &[
    seed("cash", "1000", "Cash", AccountType::Asset, "cash", None),
    seed("bank", "1100", "Bank Accounts", AccountType::Asset, "bank", None),
    seed("accounts_receivable", "1200", "Accounts Receivable", AccountType::Asset, "receivable", None),
    seed("inventory", "1300", "Inventory", AccountType::Asset, "inventory", None),
    seed("input_tax", "1400", "Input Tax Credit", AccountType::Asset, "tax", None),
    seed("prepaid_expenses", "1500", "Prepaid Expenses", AccountType::Asset, "current_asset", None),
    seed("fixed_assets", "1600", "Fixed Assets", AccountType::Asset, "fixed_asset", None),
    seed("accumulated_depreciation", "1610", "Accumulated Depreciation", AccountType::Asset, "fixed_asset", Some("1600")),
    seed("accounts_payable", "2000", "Accounts Payable", AccountType::Liability, "payable", None),
    seed("output_tax", "2100", "Output Tax Payable", AccountType::Liability, "tax", None),
    seed("tds_payable", "2200", "TDS Payable", AccountType::Liability, "tax", None),
    seed("accrued_expenses", "2300", "Accrued Expenses", AccountType::Liability, "current_liability", None),
    seed("loans_payable", "2500", "Loans Payable", AccountType::Liability, "long_term_liability", None),
    seed("owners_equity", "3000", "Owner's Equity", AccountType::Equity, "capital", None),
    seed("owners_drawings", "3100", "Owner's Drawings", AccountType::Equity, "drawings", Some("3000")),
    seed("retained_earnings", "3200", "Retained Earnings", AccountType::Equity, "retained_earnings", None),
    seed("sales_revenue", "4000", "Sales Revenue", AccountType::Income, "operating_income", None),
    seed("service_revenue", "4100", "Service Revenue", AccountType::Income, "operating_income", None),
    seed("other_income", "4200", "Other Income", AccountType::Income, "other_income", None),
    seed("cost_of_goods_sold", "5000", "Cost of Goods Sold", AccountType::Expense, "cost_of_sales", None),
    seed("rent_expense", "6000", "Rent Expense", AccountType::Expense, "operating_expense", None),
    seed("utilities_expense", "6100", "Utilities Expense", AccountType::Expense, "operating_expense", None),
    seed("salaries_expense", "6200", "Salaries and Wages", AccountType::Expense, "operating_expense", None),
    seed("bank_charges", "6300", "Bank Charges", AccountType::Expense, "operating_expense", None),
    seed("general_expense", "6900", "General Expenses", AccountType::Expense, "operating_expense", None),
];
