//! Traits for storage abstraction and external collaborators

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ledger::{AccountFilter, TransactionFilter};
use crate::reconciliation::{
    BankAccount, BankTransaction, BankTransactionFilter, MatchTarget, Reconciliation,
};
use crate::recurring::{
    GeneratedOccurrence, RecurringDefinition, RecurringStatus, RecurringTemplate,
};
use crate::types::*;
use crate::utils::validation;

/// Storage abstraction for accounts and transactions
///
/// Implementations must make `insert_transaction`, `post_draft` and
/// `void_transaction` all-or-nothing: the transaction row, its lines and every
/// balance delta are applied together or not at all. These three methods are
/// the only writers of `Account::current_balance`.
#[async_trait]
pub trait LedgerStorage: Send + Sync {
    /// Save a new account; fails with `DuplicateAccountCode` if the tenant
    /// already has a live account with the same code
    async fn insert_account(&mut self, account: &Account) -> LedgerResult<()>;

    /// Get an account by ID within a tenant (tombstoned accounts included)
    async fn get_account(&self, tenant_id: TenantId, account_id: Uuid)
        -> LedgerResult<Option<Account>>;

    /// Get a live account by code
    async fn find_account_by_code(
        &self,
        tenant_id: TenantId,
        code: &str,
    ) -> LedgerResult<Option<Account>>;

    /// List live accounts matching the filter, ordered by code
    async fn list_accounts(
        &self,
        tenant_id: TenantId,
        filter: &AccountFilter,
    ) -> LedgerResult<Vec<Account>>;

    /// Persist descriptive fields of an account. The stored balance is kept.
    async fn update_account(&mut self, account: &Account) -> LedgerResult<()>;

    /// Soft-delete a live account and return it. Under the same write as the
    /// tombstone the account must be non-system, at zero balance, free of
    /// transaction lines and without live children.
    async fn tombstone_account(&mut self, tenant_id: TenantId, account_id: Uuid)
        -> LedgerResult<Account>;

    /// Allocate the next number in the (tenant, type, year) sequence
    async fn next_transaction_number(
        &mut self,
        tenant_id: TenantId,
        transaction_type: TransactionType,
        year: i32,
    ) -> LedgerResult<u64>;

    /// Persist a transaction; posted transactions apply their balance deltas
    async fn insert_transaction(&mut self, transaction: &Transaction) -> LedgerResult<()>;

    /// Get a transaction by ID
    async fn get_transaction(
        &self,
        tenant_id: TenantId,
        transaction_id: Uuid,
    ) -> LedgerResult<Option<Transaction>>;

    /// Find the transaction created under an idempotency key
    async fn find_transaction_by_source_key(
        &self,
        tenant_id: TenantId,
        source_key: &str,
    ) -> LedgerResult<Option<Transaction>>;

    /// List transactions matching the filter, newest first
    async fn list_transactions(
        &self,
        tenant_id: TenantId,
        filter: &TransactionFilter,
    ) -> LedgerResult<Vec<Transaction>>;

    /// Flip a draft to posted and apply its balance deltas
    async fn post_draft(&mut self, tenant_id: TenantId, transaction_id: Uuid)
        -> LedgerResult<Transaction>;

    /// Apply the inverse balance deltas and flip a posted transaction to void.
    /// Fails with `CannotVoid` while a bank line is reconciled to it.
    async fn void_transaction(
        &mut self,
        tenant_id: TenantId,
        transaction_id: Uuid,
        reason: Option<String>,
    ) -> LedgerResult<Transaction>;

    /// Remove a draft transaction
    async fn delete_draft(&mut self, tenant_id: TenantId, transaction_id: Uuid)
        -> LedgerResult<()>;

    /// Signed `debit - credit` balance. With a date, the balance is recomputed
    /// from posted lines dated on or before it; without one, the running
    /// balance is returned.
    async fn get_account_balance(
        &self,
        tenant_id: TenantId,
        account_id: Uuid,
        as_of_date: Option<NaiveDate>,
    ) -> LedgerResult<BigDecimal>;
}

/// Storage for recurring definitions of one template kind
#[async_trait]
pub trait RecurringStorage<T: RecurringTemplate>: Send + Sync {
    async fn insert_definition(&mut self, definition: &RecurringDefinition<T>) -> LedgerResult<()>;

    async fn get_definition(
        &self,
        tenant_id: TenantId,
        definition_id: Uuid,
    ) -> LedgerResult<Option<RecurringDefinition<T>>>;

    /// List non-deleted definitions, optionally by status
    async fn list_definitions(
        &self,
        tenant_id: TenantId,
        status: Option<RecurringStatus>,
    ) -> LedgerResult<Vec<RecurringDefinition<T>>>;

    /// Replace a definition wholesale, template included. Fails with
    /// `Conflict` if a lease is live at `now` or an occurrence was generated
    /// since the caller read it.
    async fn replace_definition(
        &mut self,
        definition: &RecurringDefinition<T>,
        now: NaiveDateTime,
    ) -> LedgerResult<()>;

    /// Active definitions due on `today` that no live claim holds, across tenants
    async fn due_definitions(
        &self,
        today: NaiveDate,
        now: NaiveDateTime,
    ) -> LedgerResult<Vec<RecurringDefinition<T>>>;

    /// Active definitions that can never run again: the end date is before
    /// `today` or the occurrence limit is reached. Across tenants.
    async fn lapsed_definitions(&self, today: NaiveDate) -> LedgerResult<Vec<RecurringDefinition<T>>>;

    /// Take an exclusive lease on a definition. Returns `None` when another
    /// worker holds a live lease.
    async fn claim_definition(
        &mut self,
        tenant_id: TenantId,
        definition_id: Uuid,
        worker: &str,
        now: NaiveDateTime,
        lease_until: NaiveDateTime,
    ) -> LedgerResult<Option<RecurringDefinition<T>>>;

    async fn release_claim(
        &mut self,
        tenant_id: TenantId,
        definition_id: Uuid,
        worker: &str,
    ) -> LedgerResult<()>;

    /// Store the advanced definition and its audit row together, releasing the
    /// claim. Fails with `Conflict` unless `worker` still holds the claim and
    /// the stored occurrence count equals `expected_count`.
    async fn complete_generation(
        &mut self,
        worker: &str,
        expected_count: u32,
        updated: &RecurringDefinition<T>,
        occurrence: &GeneratedOccurrence,
    ) -> LedgerResult<()>;

    /// Generated occurrences of a definition, by occurrence number
    async fn list_occurrences(
        &self,
        tenant_id: TenantId,
        definition_id: Uuid,
    ) -> LedgerResult<Vec<GeneratedOccurrence>>;
}

/// Storage for bank accounts and imported statement lines
#[async_trait]
pub trait BankStorage: Send + Sync {
    async fn insert_bank_account(&mut self, account: &BankAccount) -> LedgerResult<()>;

    async fn get_bank_account(
        &self,
        tenant_id: TenantId,
        bank_account_id: Uuid,
    ) -> LedgerResult<Option<BankAccount>>;

    async fn list_bank_accounts(&self, tenant_id: TenantId) -> LedgerResult<Vec<BankAccount>>;

    async fn update_bank_account(&mut self, account: &BankAccount) -> LedgerResult<()>;

    /// Insert one chunk of statement lines atomically, skipping any whose
    /// dedup key is already stored for the bank account. Returns the IDs of
    /// the inserted lines.
    async fn insert_bank_transactions(
        &mut self,
        lines: &[BankTransaction],
    ) -> LedgerResult<Vec<Uuid>>;

    async fn get_bank_transaction(
        &self,
        tenant_id: TenantId,
        bank_transaction_id: Uuid,
    ) -> LedgerResult<Option<BankTransaction>>;

    /// Lines matching the filter, ordered by date then import order
    async fn list_bank_transactions(
        &self,
        tenant_id: TenantId,
        filter: &BankTransactionFilter,
    ) -> LedgerResult<Vec<BankTransaction>>;

    /// Link a line to its match. Fails with `AlreadyReconciled` if the line
    /// is reconciled or the target is linked to another line.
    async fn set_reconciliation(
        &mut self,
        tenant_id: TenantId,
        bank_transaction_id: Uuid,
        reconciliation: Reconciliation,
    ) -> LedgerResult<BankTransaction>;

    /// Clear the link, reconciler and timestamp of a line together
    async fn clear_reconciliation(
        &mut self,
        tenant_id: TenantId,
        bank_transaction_id: Uuid,
    ) -> LedgerResult<BankTransaction>;

    /// Every target currently linked to a bank line in the tenant
    async fn reconciled_targets(&self, tenant_id: TenantId) -> LedgerResult<Vec<MatchTarget>>;
}

/// Kinds of documents owned by the invoice/bill collaborators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Invoice,
    Bill,
    Expense,
}

/// A document with money still outstanding (or, for expenses, not yet
/// matched to a bank line)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenDocument {
    pub kind: DocumentKind,
    pub id: Uuid,
    pub number: String,
    pub party_name: String,
    pub issue_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub total: BigDecimal,
    pub amount_due: BigDecimal,
}

impl OpenDocument {
    pub fn match_target(&self) -> MatchTarget {
        match self.kind {
            DocumentKind::Invoice => MatchTarget::Invoice(self.id),
            DocumentKind::Bill => MatchTarget::Bill(self.id),
            DocumentKind::Expense => MatchTarget::Expense(self.id),
        }
    }
}

/// Read access to the invoice, bill and expense collaborators
#[async_trait]
pub trait DocumentDirectory: Send + Sync {
    async fn open_documents(
        &self,
        tenant_id: TenantId,
        kind: DocumentKind,
    ) -> LedgerResult<Vec<OpenDocument>>;
}

/// Line item of an invoice requested from the invoice collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceDraftItem {
    pub description: String,
    pub quantity: BigDecimal,
    pub unit_price: BigDecimal,
    /// Opaque tax code resolved by the tax collaborator
    pub tax_code: Option<String>,
}

/// Invoice creation request sent to the invoice collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceDraft {
    pub tenant_id: TenantId,
    pub customer_id: Uuid,
    pub customer_name: String,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub items: Vec<InvoiceDraftItem>,
    pub notes: Option<String>,
    /// Repeated requests with the same key must return the same invoice
    pub idempotency_key: String,
}

/// Invoice collaborator: creates invoice documents on request
#[async_trait]
pub trait InvoiceService: Send + Sync {
    async fn create_invoice(&self, draft: &InvoiceDraft) -> LedgerResult<Uuid>;
}

/// Trait for implementing custom account validation rules
pub trait AccountValidator: Send + Sync {
    /// Validate an account before saving
    fn validate_account(&self, account: &Account) -> LedgerResult<()>;
}

/// Trait for implementing custom transaction validation rules
pub trait TransactionValidator: Send + Sync {
    /// Validate a transaction before it reaches storage
    fn validate_transaction(&self, transaction: &NewTransaction) -> LedgerResult<()>;
}

/// Default account validator with basic rules
pub struct DefaultAccountValidator;

impl AccountValidator for DefaultAccountValidator {
    fn validate_account(&self, account: &Account) -> LedgerResult<()> {
        validation::validate_account_code(&account.code)?;
        validation::validate_account_name(&account.name)
    }
}

/// Default transaction validator with double-entry rules
pub struct DefaultTransactionValidator;

impl TransactionValidator for DefaultTransactionValidator {
    fn validate_transaction(&self, transaction: &NewTransaction) -> LedgerResult<()> {
        transaction.validate()
    }
}
