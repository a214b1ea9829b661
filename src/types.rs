//! Core types and data structures for the ledger engine

use bigdecimal::BigDecimal;
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::utils::validation;

/// Identifier of the tenant that owns a set of books
pub type TenantId = Uuid;

pub(crate) fn zero() -> BigDecimal {
    BigDecimal::from(0)
}

pub(crate) fn now() -> NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

/// Account types following standard accounting principles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    /// Assets - what the business owns (Cash, Inventory, Equipment, etc.)
    Asset,
    /// Liabilities - what the business owes (Loans, Accounts Payable, etc.)
    Liability,
    /// Equity - owner's interest in the business (Capital, Retained Earnings, etc.)
    Equity,
    /// Income/Revenue - money earned by the business
    Income,
    /// Expenses - costs incurred by the business
    Expense,
}

impl AccountType {
    /// Returns the normal balance type for this account type
    /// Assets and Expenses normally have debit balances
    /// Liabilities, Equity, and Income normally have credit balances
    pub fn normal_balance(&self) -> EntryType {
        match self {
            AccountType::Asset | AccountType::Expense => EntryType::Debit,
            AccountType::Liability | AccountType::Equity | AccountType::Income => EntryType::Credit,
        }
    }
}

/// Side of a transaction line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Debit,
    Credit,
}

/// A node in a tenant's chart of accounts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub tenant_id: TenantId,
    /// Sortable key, unique per tenant (e.g. "1000")
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    /// Free-form refinement of the type ("cash", "bank", "receivable", ...)
    pub subtype: String,
    pub parent_id: Option<Uuid>,
    pub description: Option<String>,
    /// Signed sum of `debit - credit` over every posted line against this account.
    /// Only the storage posting/voiding primitives write this field.
    pub current_balance: BigDecimal,
    pub is_active: bool,
    /// Seeded accounts cannot be edited or deleted
    pub is_system: bool,
    pub is_deleted: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Account {
    /// Create a new active, zero-balance account
    pub fn new(
        tenant_id: TenantId,
        code: String,
        name: String,
        account_type: AccountType,
        parent_id: Option<Uuid>,
    ) -> Self {
        let now = now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            code,
            name,
            account_type,
            subtype: String::new(),
            parent_id,
            description: None,
            current_balance: zero(),
            is_active: true,
            is_system: false,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Balance expressed on the account's normal side: positive cash is a
    /// positive asset, positive revenue is a positive income.
    pub fn natural_balance(&self) -> BigDecimal {
        match self.account_type.normal_balance() {
            EntryType::Debit => self.current_balance.clone(),
            EntryType::Credit => -self.current_balance.clone(),
        }
    }

    /// Whether lines may be posted against this account
    pub fn is_postable(&self) -> bool {
        self.is_active && !self.is_deleted
    }

    pub(crate) fn apply_delta(&mut self, delta: &BigDecimal) {
        self.current_balance += delta;
        self.updated_at = now();
    }
}

/// One debit or credit line of a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionLine {
    pub account_id: Uuid,
    pub debit: BigDecimal,
    pub credit: BigDecimal,
    pub description: Option<String>,
}

impl TransactionLine {
    /// Create a debit line
    pub fn debit(account_id: Uuid, amount: BigDecimal, description: Option<String>) -> Self {
        Self {
            account_id,
            debit: amount,
            credit: zero(),
            description,
        }
    }

    /// Create a credit line
    pub fn credit(account_id: Uuid, amount: BigDecimal, description: Option<String>) -> Self {
        Self {
            account_id,
            debit: zero(),
            credit: amount,
            description,
        }
    }

    pub fn entry_type(&self) -> EntryType {
        if self.debit > zero() {
            EntryType::Debit
        } else {
            EntryType::Credit
        }
    }

    /// Effect of this line on the account's `current_balance`
    pub fn balance_delta(&self) -> BigDecimal {
        &self.debit - &self.credit
    }
}

/// Business classification of a transaction; drives numbering and summaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Sale,
    Purchase,
    Receipt,
    Payment,
    Expense,
    Journal,
    Transfer,
}

impl TransactionType {
    /// Prefix used in human-readable transaction numbers
    pub fn prefix(&self) -> &'static str {
        match self {
            TransactionType::Sale => "SAL",
            TransactionType::Purchase => "PUR",
            TransactionType::Receipt => "RCT",
            TransactionType::Payment => "PAY",
            TransactionType::Expense => "EXP",
            TransactionType::Journal => "JNL",
            TransactionType::Transfer => "TRF",
        }
    }

    /// Money direction implied by the type, if any.
    /// `Some(true)` means cash comes in.
    pub fn is_inflow(&self) -> Option<bool> {
        match self {
            TransactionType::Sale | TransactionType::Receipt => Some(true),
            TransactionType::Purchase | TransactionType::Payment | TransactionType::Expense => {
                Some(false)
            }
            TransactionType::Journal | TransactionType::Transfer => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Draft,
    Posted,
    Void,
}

/// Input for creating a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTransaction {
    pub transaction_type: TransactionType,
    pub date: NaiveDate,
    pub description: String,
    pub reference: Option<String>,
    pub party_name: Option<String>,
    /// `Draft` or `Posted`; anything else is rejected
    pub status: TransactionStatus,
    pub lines: Vec<TransactionLine>,
    /// Idempotency key, unique per tenant when present
    pub source_key: Option<String>,
    pub metadata: HashMap<String, String>,
    pub created_by: Option<Uuid>,
}

impl NewTransaction {
    pub fn new(transaction_type: TransactionType, date: NaiveDate, description: String) -> Self {
        Self {
            transaction_type,
            date,
            description,
            reference: None,
            party_name: None,
            status: TransactionStatus::Posted,
            lines: Vec::new(),
            source_key: None,
            metadata: HashMap::new(),
            created_by: None,
        }
    }

    pub fn total_debits(&self) -> BigDecimal {
        self.lines.iter().map(|l| &l.debit).sum()
    }

    pub fn total_credits(&self) -> BigDecimal {
        self.lines.iter().map(|l| &l.credit).sum()
    }

    /// Validate shape and balance of the lines
    pub fn validate(&self) -> LedgerResult<()> {
        if self.status == TransactionStatus::Void {
            return Err(LedgerError::Validation(
                "Transactions cannot be created in void status".to_string(),
            ));
        }
        validation::validate_transaction_description(&self.description)?;
        validation::validate_lines(&self.lines)
    }
}

/// A recorded double-entry transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub tenant_id: TenantId,
    /// Human-readable number, e.g. "SAL-2026-00001"
    pub number: String,
    pub transaction_type: TransactionType,
    pub date: NaiveDate,
    pub status: TransactionStatus,
    pub total_amount: BigDecimal,
    pub description: String,
    pub reference: Option<String>,
    pub party_name: Option<String>,
    pub lines: Vec<TransactionLine>,
    pub source_key: Option<String>,
    pub metadata: HashMap<String, String>,
    pub created_by: Option<Uuid>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub voided_at: Option<NaiveDateTime>,
    pub void_reason: Option<String>,
}

impl Transaction {
    /// Materialize a validated input with its allocated sequence number
    pub fn from_new(tenant_id: TenantId, sequence: u64, input: NewTransaction) -> Self {
        let now = now();
        let total_amount = input.total_debits();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            number: Self::format_number(input.transaction_type, input.date.year(), sequence),
            transaction_type: input.transaction_type,
            date: input.date,
            status: input.status,
            total_amount,
            description: input.description,
            reference: input.reference,
            party_name: input.party_name,
            lines: input.lines,
            source_key: input.source_key,
            metadata: input.metadata,
            created_by: input.created_by,
            created_at: now,
            updated_at: now,
            voided_at: None,
            void_reason: None,
        }
    }

    pub fn format_number(transaction_type: TransactionType, year: i32, sequence: u64) -> String {
        format!("{}-{}-{:05}", transaction_type.prefix(), year, sequence)
    }

    pub fn total_debits(&self) -> BigDecimal {
        self.lines.iter().map(|l| &l.debit).sum()
    }

    pub fn total_credits(&self) -> BigDecimal {
        self.lines.iter().map(|l| &l.credit).sum()
    }

    /// Check if the transaction is balanced (debits = credits)
    pub fn is_balanced(&self) -> bool {
        self.total_debits() == self.total_credits()
    }

    /// Net effect of this transaction on one account
    pub fn effect_on(&self, account_id: Uuid) -> BigDecimal {
        self.lines
            .iter()
            .filter(|l| l.account_id == account_id)
            .map(|l| l.balance_delta())
            .sum()
    }

    pub fn touches(&self, account_id: Uuid) -> bool {
        self.lines.iter().any(|l| l.account_id == account_id)
    }
}

/// Trial Balance - snapshot of all account balances at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialBalance {
    pub as_of_date: NaiveDate,
    pub balances: Vec<AccountBalance>,
    pub total_debits: BigDecimal,
    pub total_credits: BigDecimal,
    pub is_balanced: bool,
}

/// Account balance information for trial balance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub account: Account,
    pub debit_balance: Option<BigDecimal>,
    pub credit_balance: Option<BigDecimal>,
}

impl AccountBalance {
    /// Split a signed `debit - credit` balance onto its side
    pub fn from_signed(account: Account, balance: BigDecimal) -> Self {
        if balance >= zero() {
            Self {
                account,
                debit_balance: Some(balance),
                credit_balance: None,
            }
        } else {
            Self {
                account,
                debit_balance: None,
                credit_balance: Some(balance.abs()),
            }
        }
    }

    /// Get the balance amount regardless of debit/credit
    pub fn balance_amount(&self) -> BigDecimal {
        self.debit_balance
            .clone()
            .or_else(|| self.credit_balance.clone())
            .unwrap_or_else(zero)
    }
}

/// Paging parameters for list operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 50,
        }
    }
}

impl PageRequest {
    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.clamp(1, 500),
        }
    }

    pub fn offset(&self) -> usize {
        (self.page.max(1) as usize - 1) * self.per_page as usize
    }
}

/// One page of results plus the total count across all pages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: u32,
    pub per_page: u32,
}

impl<T> Page<T> {
    /// Slice an already filtered and ordered result set
    pub fn from_vec(all: Vec<T>, request: PageRequest) -> Self {
        let total = all.len();
        let items = all
            .into_iter()
            .skip(request.offset())
            .take(request.per_page as usize)
            .collect();
        Self {
            items,
            total,
            page: request.page,
            per_page: request.per_page,
        }
    }
}

/// Errors that can occur in the ledger engine
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Transaction is not balanced: debits = {debits}, credits = {credits}")]
    NotBalanced {
        debits: BigDecimal,
        credits: BigDecimal,
    },
    #[error("Account not found: {0}")]
    AccountNotFound(String),
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),
    #[error("Recurring definition not found: {0}")]
    RecurringDefinitionNotFound(String),
    #[error("Bank account not found: {0}")]
    BankAccountNotFound(String),
    #[error("Bank transaction not found: {0}")]
    BankTransactionNotFound(String),
    #[error("Cannot modify: {0}")]
    CannotModify(String),
    #[error("Cannot void: {0}")]
    CannotVoid(String),
    #[error("Already reconciled: {0}")]
    AlreadyReconciled(String),
    #[error("Invalid recurrence: {0}")]
    InvalidRecurrence(String),
    #[error("System account is protected: {0}")]
    SystemAccountProtected(String),
    #[error("Account has a non-zero balance: {0}")]
    AccountHasBalance(String),
    #[error("Account code already exists: {0}")]
    DuplicateAccountCode(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Collaborator error: {0}")]
    Collaborator(String),
    #[error("Storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    /// Stable machine-readable code for API responses
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::NotBalanced { .. } => "not_balanced",
            LedgerError::AccountNotFound(_) => "account_not_found",
            LedgerError::TransactionNotFound(_) => "transaction_not_found",
            LedgerError::RecurringDefinitionNotFound(_) => "recurring_definition_not_found",
            LedgerError::BankAccountNotFound(_) => "bank_account_not_found",
            LedgerError::BankTransactionNotFound(_) => "bank_transaction_not_found",
            LedgerError::CannotModify(_) => "cannot_modify",
            LedgerError::CannotVoid(_) => "cannot_void",
            LedgerError::AlreadyReconciled(_) => "already_reconciled",
            LedgerError::InvalidRecurrence(_) => "invalid_recurrence",
            LedgerError::SystemAccountProtected(_) => "system_account_protected",
            LedgerError::AccountHasBalance(_) => "account_has_balance",
            LedgerError::DuplicateAccountCode(_) => "duplicate_account_code",
            LedgerError::Validation(_) => "validation",
            LedgerError::Conflict(_) => "conflict",
            LedgerError::Config(_) | LedgerError::Collaborator(_) | LedgerError::Storage(_) => {
                "internal"
            }
        }
    }

    /// Message safe to show external callers; backend detail is withheld
    pub fn public_message(&self) -> String {
        match self {
            LedgerError::Config(_) | LedgerError::Collaborator(_) | LedgerError::Storage(_) => {
                "internal error".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<::config::ConfigError> for LedgerError {
    fn from(err: ::config::ConfigError) -> Self {
        LedgerError::Config(err.to_string())
    }
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;
