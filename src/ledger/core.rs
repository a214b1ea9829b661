//! Main ledger orchestrator that coordinates accounts and transactions

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::config::{EngineConfig, QuickEntryConfig};
use crate::ledger::{
    patterns, AccountFilter, AccountManager, AccountNode, AccountUpdate, NewAccount,
    TransactionFilter, TransactionManager,
};
use crate::traits::*;
use crate::types::*;

/// Input for the quick sale / quick expense helpers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuickEntry {
    pub date: NaiveDate,
    pub amount: BigDecimal,
    pub description: String,
    pub party_name: Option<String>,
    pub reference: Option<String>,
    /// Cash or bank account; defaults to the configured cash account
    pub payment_account_id: Option<Uuid>,
    /// Revenue or expense account; defaults to the configured one
    pub category_account_id: Option<Uuid>,
    pub created_by: Option<Uuid>,
}

impl QuickEntry {
    pub fn new(date: NaiveDate, amount: BigDecimal, description: &str) -> Self {
        Self {
            date,
            amount,
            description: description.to_string(),
            party_name: None,
            reference: None,
            payment_account_id: None,
            category_account_id: None,
            created_by: None,
        }
    }
}

/// Posted totals for one calendar day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub sales: BigDecimal,
    pub purchases: BigDecimal,
    pub expenses: BigDecimal,
    pub receipts: BigDecimal,
    pub payments: BigDecimal,
    pub transaction_count: usize,
}

/// Report on ledger integrity and validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerIntegrityReport {
    pub is_valid: bool,
    pub issues: Vec<String>,
    pub total_debits: BigDecimal,
    pub total_credits: BigDecimal,
    pub accounts_checked: usize,
}

/// Main ledger system that orchestrates all accounting operations
pub struct Ledger<S: LedgerStorage> {
    account_manager: AccountManager<S>,
    transaction_manager: TransactionManager<S>,
    quick_entry: QuickEntryConfig,
}

impl<S: LedgerStorage + Clone> Ledger<S> {
    /// Create a new ledger with the given storage backend
    pub fn new(storage: S) -> Self {
        Self::with_config(storage, &EngineConfig::default())
    }

    /// Create a new ledger using the quick-entry defaults from `config`
    pub fn with_config(storage: S, config: &EngineConfig) -> Self {
        Self {
            account_manager: AccountManager::new(storage.clone()),
            transaction_manager: TransactionManager::new(storage),
            quick_entry: config.quick_entry.clone(),
        }
    }

    /// Create a new ledger with custom validators
    pub fn with_validators(
        storage: S,
        account_validator: Box<dyn AccountValidator>,
        transaction_validator: Box<dyn TransactionValidator>,
    ) -> Self {
        Self {
            account_manager: AccountManager::with_validator(storage.clone(), account_validator),
            transaction_manager: TransactionManager::with_validator(storage, transaction_validator),
            quick_entry: QuickEntryConfig::default(),
        }
    }

    pub fn accounts(&self) -> &AccountManager<S> {
        &self.account_manager
    }

    pub fn transactions(&self) -> &TransactionManager<S> {
        &self.transaction_manager
    }

    pub fn transactions_mut(&mut self) -> &mut TransactionManager<S> {
        &mut self.transaction_manager
    }

    // Account operations
    pub async fn create_account(
        &mut self,
        tenant_id: TenantId,
        input: NewAccount,
    ) -> LedgerResult<Account> {
        self.account_manager.create_account(tenant_id, input).await
    }

    pub async fn get_account(
        &self,
        tenant_id: TenantId,
        account_id: Uuid,
    ) -> LedgerResult<Option<Account>> {
        self.account_manager.get_account(tenant_id, account_id).await
    }

    pub async fn list_accounts(
        &self,
        tenant_id: TenantId,
        filter: &AccountFilter,
    ) -> LedgerResult<Vec<Account>> {
        self.account_manager.list_accounts(tenant_id, filter).await
    }

    pub async fn update_account(
        &mut self,
        tenant_id: TenantId,
        account_id: Uuid,
        update: AccountUpdate,
    ) -> LedgerResult<Account> {
        self.account_manager
            .update_account(tenant_id, account_id, update)
            .await
    }

    pub async fn delete_account(&mut self, tenant_id: TenantId, account_id: Uuid) -> LedgerResult<()> {
        self.account_manager.delete_account(tenant_id, account_id).await
    }

    pub async fn account_tree(&self, tenant_id: TenantId) -> LedgerResult<Vec<AccountNode>> {
        self.account_manager.account_tree(tenant_id).await
    }

    /// Seed the default chart of accounts for a new tenant
    pub async fn seed_default_chart(
        &mut self,
        tenant_id: TenantId,
    ) -> LedgerResult<HashMap<String, Account>> {
        self.account_manager.seed_default_chart(tenant_id).await
    }

    // Transaction operations
    pub async fn create_transaction(
        &mut self,
        tenant_id: TenantId,
        input: NewTransaction,
    ) -> LedgerResult<Transaction> {
        self.transaction_manager
            .create_transaction(tenant_id, input)
            .await
    }

    pub async fn void_transaction(
        &mut self,
        tenant_id: TenantId,
        transaction_id: Uuid,
        reason: Option<String>,
    ) -> LedgerResult<Transaction> {
        self.transaction_manager
            .void_transaction(tenant_id, transaction_id, reason)
            .await
    }

    pub async fn get_transaction(
        &self,
        tenant_id: TenantId,
        transaction_id: Uuid,
    ) -> LedgerResult<Option<Transaction>> {
        self.transaction_manager
            .get_transaction(tenant_id, transaction_id)
            .await
    }

    pub async fn list_transactions(
        &self,
        tenant_id: TenantId,
        filter: &TransactionFilter,
        page: PageRequest,
    ) -> LedgerResult<Page<Transaction>> {
        self.transaction_manager
            .list_transactions(tenant_id, filter, page)
            .await
    }

    /// Record a cash sale: debit cash, credit sales revenue
    pub async fn quick_sale(
        &mut self,
        tenant_id: TenantId,
        entry: QuickEntry,
    ) -> LedgerResult<Transaction> {
        let cash = self
            .resolve(tenant_id, entry.payment_account_id, &self.quick_entry.cash_account_code)
            .await?;
        let revenue = self
            .resolve(tenant_id, entry.category_account_id, &self.quick_entry.sales_account_code)
            .await?;

        let mut input = patterns::sale(entry.date, &entry.description, cash, revenue, entry.amount)?;
        input.party_name = entry.party_name;
        input.reference = entry.reference;
        input.created_by = entry.created_by;
        self.create_transaction(tenant_id, input).await
    }

    /// Record a cash expense: debit the expense account, credit cash
    pub async fn quick_expense(
        &mut self,
        tenant_id: TenantId,
        entry: QuickEntry,
    ) -> LedgerResult<Transaction> {
        let cash = self
            .resolve(tenant_id, entry.payment_account_id, &self.quick_entry.cash_account_code)
            .await?;
        let expense = self
            .resolve(tenant_id, entry.category_account_id, &self.quick_entry.expense_account_code)
            .await?;

        let mut input =
            patterns::expense(entry.date, &entry.description, expense, cash, entry.amount)?;
        input.party_name = entry.party_name;
        input.reference = entry.reference;
        input.created_by = entry.created_by;
        self.create_transaction(tenant_id, input).await
    }

    /// Totals of posted transactions for one day, by type
    pub async fn daily_summary(
        &self,
        tenant_id: TenantId,
        date: NaiveDate,
    ) -> LedgerResult<DailySummary> {
        let transactions = self
            .transaction_manager
            .storage
            .list_transactions(tenant_id, &TransactionFilter::posted_between(date, date))
            .await?;

        let mut summary = DailySummary {
            date,
            sales: zero(),
            purchases: zero(),
            expenses: zero(),
            receipts: zero(),
            payments: zero(),
            transaction_count: transactions.len(),
        };
        for transaction in &transactions {
            let bucket = match transaction.transaction_type {
                TransactionType::Sale => &mut summary.sales,
                TransactionType::Purchase => &mut summary.purchases,
                TransactionType::Expense => &mut summary.expenses,
                TransactionType::Receipt => &mut summary.receipts,
                TransactionType::Payment => &mut summary.payments,
                TransactionType::Journal | TransactionType::Transfer => continue,
            };
            *bucket += &transaction.total_amount;
        }

        Ok(summary)
    }

    /// Point-in-time balance recomputed from posted lines dated on or before `as_of`
    pub async fn account_balance_as_of(
        &self,
        tenant_id: TenantId,
        account_id: Uuid,
        as_of: NaiveDate,
    ) -> LedgerResult<BigDecimal> {
        self.account_manager
            .get_balance(tenant_id, account_id, Some(as_of))
            .await
    }

    /// Current running balance of an account
    pub async fn account_balance(
        &self,
        tenant_id: TenantId,
        account_id: Uuid,
    ) -> LedgerResult<BigDecimal> {
        self.account_manager
            .get_balance(tenant_id, account_id, None)
            .await
    }

    /// Trial balance as of a date
    pub async fn trial_balance(
        &self,
        tenant_id: TenantId,
        as_of_date: NaiveDate,
    ) -> LedgerResult<TrialBalance> {
        let accounts = self
            .account_manager
            .list_accounts(tenant_id, &AccountFilter::default())
            .await?;
        let mut balances = Vec::with_capacity(accounts.len());
        let mut total_debits = zero();
        let mut total_credits = zero();

        for account in accounts {
            let balance = self
                .account_balance_as_of(tenant_id, account.id, as_of_date)
                .await?;
            let entry = AccountBalance::from_signed(account, balance);
            if let Some(debit) = &entry.debit_balance {
                total_debits += debit;
            }
            if let Some(credit) = &entry.credit_balance {
                total_credits += credit;
            }
            balances.push(entry);
        }

        let is_balanced = total_debits == total_credits;
        Ok(TrialBalance {
            as_of_date,
            balances,
            total_debits,
            total_credits,
            is_balanced,
        })
    }

    /// Check that every running balance equals the sum of its posted history
    /// and that total debits equal total credits
    pub async fn verify_integrity(&self, tenant_id: TenantId) -> LedgerResult<LedgerIntegrityReport> {
        let accounts = self
            .account_manager
            .list_accounts(tenant_id, &AccountFilter::default())
            .await?;
        let posted = self
            .transaction_manager
            .storage
            .list_transactions(
                tenant_id,
                &TransactionFilter {
                    status: Some(TransactionStatus::Posted),
                    ..Default::default()
                },
            )
            .await?;

        let mut issues = Vec::new();
        let mut history: HashMap<Uuid, BigDecimal> = HashMap::new();
        let mut total_debits = zero();
        let mut total_credits = zero();
        for transaction in &posted {
            if !transaction.is_balanced() {
                issues.push(format!("transaction {} is not balanced", transaction.number));
            }
            for line in &transaction.lines {
                total_debits += &line.debit;
                total_credits += &line.credit;
                *history.entry(line.account_id).or_insert_with(zero) += line.balance_delta();
            }
        }

        for account in &accounts {
            let expected = history.remove(&account.id).unwrap_or_else(zero);
            if expected != account.current_balance {
                issues.push(format!(
                    "account {} balance {} differs from posted history {}",
                    account.code, account.current_balance, expected
                ));
            }
        }
        if total_debits != total_credits {
            issues.push(format!(
                "total debits {} differ from total credits {}",
                total_debits, total_credits
            ));
        }

        if !issues.is_empty() {
            tracing::warn!(tenant = %tenant_id, issues = issues.len(), "ledger integrity check failed");
        }
        Ok(LedgerIntegrityReport {
            is_valid: issues.is_empty(),
            issues,
            total_debits,
            total_credits,
            accounts_checked: accounts.len(),
        })
    }

    async fn resolve(
        &self,
        tenant_id: TenantId,
        explicit: Option<Uuid>,
        default_code: &str,
    ) -> LedgerResult<Uuid> {
        if let Some(id) = explicit {
            return Ok(id);
        }
        self.account_manager
            .find_by_code(tenant_id, default_code)
            .await?
            .map(|account| account.id)
            .ok_or_else(|| LedgerError::AccountNotFound(format!("code {}", default_code)))
    }
}
