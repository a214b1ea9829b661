//! Transaction posting, voiding and lookup

use bigdecimal::BigDecimal;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::traits::*;
use crate::types::*;

/// Filters for listing transactions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionFilter {
    pub transaction_type: Option<TransactionType>,
    pub status: Option<TransactionStatus>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    /// Only transactions with a line against this account
    pub account_id: Option<Uuid>,
    /// Case-insensitive match on number, description, reference or party
    pub search: Option<String>,
}

impl TransactionFilter {
    pub fn posted_between(from: NaiveDate, to: NaiveDate) -> Self {
        Self {
            status: Some(TransactionStatus::Posted),
            from: Some(from),
            to: Some(to),
            ..Default::default()
        }
    }

    pub fn matches(&self, transaction: &Transaction) -> bool {
        if self
            .transaction_type
            .is_some_and(|t| transaction.transaction_type != t)
        {
            return false;
        }
        if self.status.is_some_and(|s| transaction.status != s) {
            return false;
        }
        if self.from.is_some_and(|from| transaction.date < from) {
            return false;
        }
        if self.to.is_some_and(|to| transaction.date > to) {
            return false;
        }
        if let Some(account_id) = self.account_id {
            if !transaction.touches(account_id) {
                return false;
            }
        }
        if let Some(search) = &self.search {
            let needle = search.to_lowercase();
            let hit = transaction.number.to_lowercase().contains(&needle)
                || transaction.description.to_lowercase().contains(&needle)
                || transaction
                    .reference
                    .as_deref()
                    .is_some_and(|r| r.to_lowercase().contains(&needle))
                || transaction
                    .party_name
                    .as_deref()
                    .is_some_and(|p| p.to_lowercase().contains(&needle));
            if !hit {
                return false;
            }
        }
        true
    }
}

/// Transaction manager for handling transaction operations
pub struct TransactionManager<S: LedgerStorage> {
    pub(crate) storage: S,
    validator: Box<dyn TransactionValidator>,
}

impl<S: LedgerStorage> TransactionManager<S> {
    /// Create a new transaction manager
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            validator: Box::new(DefaultTransactionValidator),
        }
    }

    /// Create a new transaction manager with custom validator
    pub fn with_validator(storage: S, validator: Box<dyn TransactionValidator>) -> Self {
        Self { storage, validator }
    }

    /// Validate, number and persist a transaction.
    ///
    /// Posted transactions apply `debit - credit` to every referenced account in
    /// the same storage call that writes the transaction. Nothing is written
    /// when validation fails.
    pub async fn create_transaction(
        &mut self,
        tenant_id: TenantId,
        input: NewTransaction,
    ) -> LedgerResult<Transaction> {
        self.validator.validate_transaction(&input)?;
        self.check_accounts(tenant_id, &input.lines).await?;

        if let Some(key) = &input.source_key {
            if self
                .storage
                .find_transaction_by_source_key(tenant_id, key)
                .await?
                .is_some()
            {
                return Err(LedgerError::Conflict(format!(
                    "a transaction already exists for source key {}",
                    key
                )));
            }
        }

        let sequence = self
            .storage
            .next_transaction_number(tenant_id, input.transaction_type, input.date.year())
            .await?;
        let transaction = Transaction::from_new(tenant_id, sequence, input);

        self.storage.insert_transaction(&transaction).await?;
        tracing::info!(
            tenant = %tenant_id,
            number = %transaction.number,
            status = ?transaction.status,
            amount = %transaction.total_amount,
            "transaction recorded"
        );

        Ok(transaction)
    }

    /// Post a draft, applying its balance effects
    pub async fn post_draft(
        &mut self,
        tenant_id: TenantId,
        transaction_id: Uuid,
    ) -> LedgerResult<Transaction> {
        let draft = self
            .get_transaction_required(tenant_id, transaction_id)
            .await?;
        if draft.status != TransactionStatus::Draft {
            return Err(LedgerError::CannotModify(format!(
                "transaction {} is {:?}, only drafts can be posted",
                draft.number, draft.status
            )));
        }
        crate::utils::validation::validate_lines(&draft.lines)?;
        self.check_accounts(tenant_id, &draft.lines).await?;

        let posted = self.storage.post_draft(tenant_id, transaction_id).await?;
        tracing::info!(tenant = %tenant_id, number = %posted.number, "draft posted");
        Ok(posted)
    }

    /// Reverse a posted transaction's balance effects and mark it void.
    ///
    /// Voiding twice fails with `CannotVoid`; drafts are deleted, not voided.
    pub async fn void_transaction(
        &mut self,
        tenant_id: TenantId,
        transaction_id: Uuid,
        reason: Option<String>,
    ) -> LedgerResult<Transaction> {
        let transaction = self
            .get_transaction_required(tenant_id, transaction_id)
            .await?;
        match transaction.status {
            TransactionStatus::Posted => {}
            TransactionStatus::Void => {
                return Err(LedgerError::CannotVoid(format!(
                    "transaction {} is already void",
                    transaction.number
                )))
            }
            TransactionStatus::Draft => {
                return Err(LedgerError::CannotVoid(format!(
                    "transaction {} is a draft; delete it instead",
                    transaction.number
                )))
            }
        }

        let voided = self
            .storage
            .void_transaction(tenant_id, transaction_id, reason)
            .await?;
        tracing::info!(tenant = %tenant_id, number = %voided.number, "transaction voided");
        Ok(voided)
    }

    /// Delete a draft transaction outright
    pub async fn delete_draft(&mut self, tenant_id: TenantId, transaction_id: Uuid) -> LedgerResult<()> {
        let transaction = self
            .get_transaction_required(tenant_id, transaction_id)
            .await?;
        if transaction.status != TransactionStatus::Draft {
            return Err(LedgerError::CannotModify(format!(
                "transaction {} is {:?}; posted history is never deleted",
                transaction.number, transaction.status
            )));
        }
        self.storage.delete_draft(tenant_id, transaction_id).await
    }

    /// Get a transaction by ID
    pub async fn get_transaction(
        &self,
        tenant_id: TenantId,
        transaction_id: Uuid,
    ) -> LedgerResult<Option<Transaction>> {
        self.storage.get_transaction(tenant_id, transaction_id).await
    }

    /// Get a transaction by ID, returning an error if not found
    pub async fn get_transaction_required(
        &self,
        tenant_id: TenantId,
        transaction_id: Uuid,
    ) -> LedgerResult<Transaction> {
        self.storage
            .get_transaction(tenant_id, transaction_id)
            .await?
            .ok_or_else(|| LedgerError::TransactionNotFound(transaction_id.to_string()))
    }

    /// Find the transaction created under an idempotency key
    pub async fn find_by_source_key(
        &self,
        tenant_id: TenantId,
        source_key: &str,
    ) -> LedgerResult<Option<Transaction>> {
        self.storage
            .find_transaction_by_source_key(tenant_id, source_key)
            .await
    }

    /// List transactions, newest first
    pub async fn list_transactions(
        &self,
        tenant_id: TenantId,
        filter: &TransactionFilter,
        page: PageRequest,
    ) -> LedgerResult<Page<Transaction>> {
        let all = self.storage.list_transactions(tenant_id, filter).await?;
        Ok(Page::from_vec(all, page))
    }

    async fn check_accounts(
        &self,
        tenant_id: TenantId,
        lines: &[TransactionLine],
    ) -> LedgerResult<()> {
        let ids: HashSet<Uuid> = lines.iter().map(|l| l.account_id).collect();
        for account_id in ids {
            match self.storage.get_account(tenant_id, account_id).await? {
                Some(account) if account.is_postable() => {}
                _ => return Err(LedgerError::AccountNotFound(account_id.to_string())),
            }
        }
        Ok(())
    }
}

/// Transaction builder for creating multi-line transactions
#[derive(Debug)]
pub struct TransactionBuilder {
    transaction: NewTransaction,
}

impl TransactionBuilder {
    /// Create a new transaction builder
    pub fn new(transaction_type: TransactionType, date: NaiveDate, description: &str) -> Self {
        Self {
            transaction: NewTransaction::new(transaction_type, date, description.to_string()),
        }
    }

    /// Set the reference for the transaction
    pub fn reference(mut self, reference: &str) -> Self {
        self.transaction.reference = Some(reference.to_string());
        self
    }

    /// Set the counterparty name
    pub fn party(mut self, party_name: &str) -> Self {
        self.transaction.party_name = Some(party_name.to_string());
        self
    }

    /// Keep the transaction as a draft with no balance effect
    pub fn draft(mut self) -> Self {
        self.transaction.status = TransactionStatus::Draft;
        self
    }

    pub fn source_key(mut self, key: String) -> Self {
        self.transaction.source_key = Some(key);
        self
    }

    pub fn created_by(mut self, user_id: Uuid) -> Self {
        self.transaction.created_by = Some(user_id);
        self
    }

    /// Add metadata to the transaction
    pub fn metadata(mut self, key: &str, value: String) -> Self {
        self.transaction.metadata.insert(key.to_string(), value);
        self
    }

    /// Add a debit line
    pub fn debit(mut self, account_id: Uuid, amount: BigDecimal, description: Option<String>) -> Self {
        self.transaction
            .lines
            .push(TransactionLine::debit(account_id, amount, description));
        self
    }

    /// Add a credit line
    pub fn credit(
        mut self,
        account_id: Uuid,
        amount: BigDecimal,
        description: Option<String>,
    ) -> Self {
        self.transaction
            .lines
            .push(TransactionLine::credit(account_id, amount, description));
        self
    }

    /// Add a prepared line
    pub fn line(mut self, line: TransactionLine) -> Self {
        self.transaction.lines.push(line);
        self
    }

    /// Build the transaction without validating it
    pub fn build_unchecked(self) -> NewTransaction {
        self.transaction
    }

    /// Build the transaction
    pub fn build(self) -> LedgerResult<NewTransaction> {
        self.transaction.validate()?;
        Ok(self.transaction)
    }
}

/// Common two-line transaction shapes
pub mod patterns {
    use super::*;

    /// Sale: debit cash/receivables, credit revenue
    pub fn sale(
        date: NaiveDate,
        description: &str,
        cash_or_receivables_account_id: Uuid,
        revenue_account_id: Uuid,
        amount: BigDecimal,
    ) -> LedgerResult<NewTransaction> {
        TransactionBuilder::new(TransactionType::Sale, date, description)
            .debit(cash_or_receivables_account_id, amount.clone(), None)
            .credit(revenue_account_id, amount, None)
            .build()
    }

    /// Expense paid: debit expense, credit cash/payables
    pub fn expense(
        date: NaiveDate,
        description: &str,
        expense_account_id: Uuid,
        cash_or_payables_account_id: Uuid,
        amount: BigDecimal,
    ) -> LedgerResult<NewTransaction> {
        TransactionBuilder::new(TransactionType::Expense, date, description)
            .debit(expense_account_id, amount.clone(), None)
            .credit(cash_or_payables_account_id, amount, None)
            .build()
    }

    /// Customer payment received: debit cash, credit receivables
    pub fn receipt(
        date: NaiveDate,
        description: &str,
        cash_account_id: Uuid,
        receivables_account_id: Uuid,
        amount: BigDecimal,
    ) -> LedgerResult<NewTransaction> {
        TransactionBuilder::new(TransactionType::Receipt, date, description)
            .debit(cash_account_id, amount.clone(), Some("Cash received".to_string()))
            .credit(receivables_account_id, amount, Some("Receivable settled".to_string()))
            .build()
    }

    /// Supplier payment made: debit payables, credit cash
    pub fn payment(
        date: NaiveDate,
        description: &str,
        payables_account_id: Uuid,
        cash_account_id: Uuid,
        amount: BigDecimal,
    ) -> LedgerResult<NewTransaction> {
        TransactionBuilder::new(TransactionType::Payment, date, description)
            .debit(payables_account_id, amount.clone(), Some("Payable settled".to_string()))
            .credit(cash_account_id, amount, Some("Cash paid".to_string()))
            .build()
    }

    /// Move money between two asset accounts
    pub fn transfer(
        date: NaiveDate,
        description: &str,
        to_account_id: Uuid,
        from_account_id: Uuid,
        amount: BigDecimal,
    ) -> LedgerResult<NewTransaction> {
        TransactionBuilder::new(TransactionType::Transfer, date, description)
            .debit(to_account_id, amount.clone(), None)
            .credit(from_account_id, amount, None)
            .build()
    }
}
