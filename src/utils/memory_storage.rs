//! In-memory storage implementation for testing and development
//!
//! Every collection sits behind one lock. Each trait method takes the lock
//! once, so multi-row writes (posting, voiding, chunk inserts, reconciling,
//! completing a generation) are all-or-nothing and clones of a
//! `MemoryStorage` behave like connections to the same database.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use crate::ledger::{AccountFilter, TransactionFilter};
use crate::reconciliation::{
    BankAccount, BankTransaction, BankTransactionFilter, MatchTarget, Reconciliation,
};
use crate::recurring::{
    GeneratedOccurrence, InvoiceTemplate, JournalTemplate, RecurringDefinition,
    RecurringInvoice, RecurringJournal, RecurringStatus,
};
use crate::traits::*;
use crate::types::*;

#[derive(Debug, Default)]
struct StorageState {
    accounts: HashMap<Uuid, Account>,
    /// Insertion order, used to break date ties when listing
    transactions: Vec<Transaction>,
    sequences: HashMap<(TenantId, TransactionType, i32), u64>,
    recurring_journals: HashMap<Uuid, RecurringJournal>,
    recurring_invoices: HashMap<Uuid, RecurringInvoice>,
    occurrences: HashMap<Uuid, Vec<GeneratedOccurrence>>,
    bank_accounts: HashMap<Uuid, BankAccount>,
    /// Import order
    bank_transactions: Vec<BankTransaction>,
}

impl StorageState {
    fn transaction_mut(&mut self, tenant_id: TenantId, id: Uuid) -> LedgerResult<&mut Transaction> {
        self.transactions
            .iter_mut()
            .find(|t| t.tenant_id == tenant_id && t.id == id)
            .ok_or_else(|| LedgerError::TransactionNotFound(id.to_string()))
    }

    /// Add `sign * (debit - credit)` of every line to its account. Nothing is
    /// changed unless every account exists and accepts postings.
    fn apply_lines(
        &mut self,
        tenant_id: TenantId,
        lines: &[TransactionLine],
        reverse: bool,
    ) -> LedgerResult<()> {
        for line in lines {
            match self.accounts.get(&line.account_id) {
                Some(account) if account.tenant_id == tenant_id && !account.is_deleted => {}
                _ => return Err(LedgerError::AccountNotFound(line.account_id.to_string())),
            }
        }
        for line in lines {
            let delta = if reverse {
                -line.balance_delta()
            } else {
                line.balance_delta()
            };
            if let Some(account) = self.accounts.get_mut(&line.account_id) {
                account.apply_delta(&delta);
            }
        }
        Ok(())
    }

    fn check_postable(&self, tenant_id: TenantId, lines: &[TransactionLine]) -> LedgerResult<()> {
        for line in lines {
            match self.accounts.get(&line.account_id) {
                Some(account) if account.tenant_id == tenant_id && account.is_postable() => {}
                _ => return Err(LedgerError::AccountNotFound(line.account_id.to_string())),
            }
        }
        Ok(())
    }

    fn code_taken(&self, tenant_id: TenantId, code: &str, except: Uuid) -> bool {
        self.accounts.values().any(|a| {
            a.tenant_id == tenant_id && !a.is_deleted && a.code == code && a.id != except
        })
    }
}

/// In-memory storage implementation for testing and development
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    state: Arc<RwLock<StorageState>>,
}

impl MemoryStorage {
    /// Create a new memory storage instance
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> LedgerResult<RwLockReadGuard<'_, StorageState>> {
        self.state
            .read()
            .map_err(|_| LedgerError::Storage("memory storage lock poisoned".to_string()))
    }

    fn write(&self) -> LedgerResult<RwLockWriteGuard<'_, StorageState>> {
        self.state
            .write()
            .map_err(|_| LedgerError::Storage("memory storage lock poisoned".to_string()))
    }
}

#[async_trait]
impl LedgerStorage for MemoryStorage {
    async fn insert_account(&mut self, account: &Account) -> LedgerResult<()> {
        let mut state = self.write()?;
        if state.code_taken(account.tenant_id, &account.code, account.id) {
            return Err(LedgerError::DuplicateAccountCode(account.code.clone()));
        }
        state.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn get_account(
        &self,
        tenant_id: TenantId,
        account_id: Uuid,
    ) -> LedgerResult<Option<Account>> {
        Ok(self
            .read()?
            .accounts
            .get(&account_id)
            .filter(|a| a.tenant_id == tenant_id)
            .cloned())
    }

    async fn find_account_by_code(
        &self,
        tenant_id: TenantId,
        code: &str,
    ) -> LedgerResult<Option<Account>> {
        Ok(self
            .read()?
            .accounts
            .values()
            .find(|a| a.tenant_id == tenant_id && !a.is_deleted && a.code == code)
            .cloned())
    }

    async fn list_accounts(
        &self,
        tenant_id: TenantId,
        filter: &AccountFilter,
    ) -> LedgerResult<Vec<Account>> {
        let state = self.read()?;
        let mut accounts: Vec<Account> = state
            .accounts
            .values()
            .filter(|a| a.tenant_id == tenant_id && filter.matches(a))
            .cloned()
            .collect();
        accounts.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(accounts)
    }

    async fn update_account(&mut self, account: &Account) -> LedgerResult<()> {
        let mut state = self.write()?;
        let balance = match state.accounts.get(&account.id) {
            Some(existing) if existing.tenant_id == account.tenant_id => {
                existing.current_balance.clone()
            }
            _ => return Err(LedgerError::AccountNotFound(account.id.to_string())),
        };
        if !account.is_deleted && state.code_taken(account.tenant_id, &account.code, account.id) {
            return Err(LedgerError::DuplicateAccountCode(account.code.clone()));
        }
        let mut updated = account.clone();
        updated.current_balance = balance;
        state.accounts.insert(updated.id, updated);
        Ok(())
    }

    async fn tombstone_account(
        &mut self,
        tenant_id: TenantId,
        account_id: Uuid,
    ) -> LedgerResult<Account> {
        let mut state = self.write()?;
        let account = state
            .accounts
            .get(&account_id)
            .filter(|a| a.tenant_id == tenant_id && !a.is_deleted)
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))?;
        if account.is_system {
            return Err(LedgerError::SystemAccountProtected(account.code.clone()));
        }
        if account.current_balance != zero() {
            return Err(LedgerError::AccountHasBalance(format!(
                "{} ({})",
                account.code, account.current_balance
            )));
        }
        if state
            .transactions
            .iter()
            .any(|t| t.tenant_id == tenant_id && t.touches(account_id))
        {
            return Err(LedgerError::CannotModify(format!(
                "account {} is referenced by transactions",
                account.code
            )));
        }
        if state
            .accounts
            .values()
            .any(|a| a.parent_id == Some(account_id) && !a.is_deleted)
        {
            return Err(LedgerError::CannotModify(format!(
                "account {} has child accounts",
                account.code
            )));
        }

        let stored = state
            .accounts
            .get_mut(&account_id)
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))?;
        stored.is_deleted = true;
        stored.is_active = false;
        stored.updated_at = now();
        Ok(stored.clone())
    }

    async fn next_transaction_number(
        &mut self,
        tenant_id: TenantId,
        transaction_type: TransactionType,
        year: i32,
    ) -> LedgerResult<u64> {
        let mut state = self.write()?;
        let counter = state
            .sequences
            .entry((tenant_id, transaction_type, year))
            .or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn insert_transaction(&mut self, transaction: &Transaction) -> LedgerResult<()> {
        let mut state = self.write()?;
        if let Some(key) = &transaction.source_key {
            if state
                .transactions
                .iter()
                .any(|t| t.tenant_id == transaction.tenant_id && t.source_key.as_ref() == Some(key))
            {
                return Err(LedgerError::Conflict(format!(
                    "a transaction already exists for source key {}",
                    key
                )));
            }
        }
        match transaction.status {
            TransactionStatus::Posted => {
                if !transaction.is_balanced() {
                    return Err(LedgerError::NotBalanced {
                        debits: transaction.total_debits(),
                        credits: transaction.total_credits(),
                    });
                }
                state.check_postable(transaction.tenant_id, &transaction.lines)?;
                state.apply_lines(transaction.tenant_id, &transaction.lines, false)?;
            }
            TransactionStatus::Draft => {
                state.check_postable(transaction.tenant_id, &transaction.lines)?;
            }
            TransactionStatus::Void => {
                return Err(LedgerError::Validation(
                    "void transactions cannot be inserted".to_string(),
                ))
            }
        }
        state.transactions.push(transaction.clone());
        Ok(())
    }

    async fn get_transaction(
        &self,
        tenant_id: TenantId,
        transaction_id: Uuid,
    ) -> LedgerResult<Option<Transaction>> {
        Ok(self
            .read()?
            .transactions
            .iter()
            .find(|t| t.tenant_id == tenant_id && t.id == transaction_id)
            .cloned())
    }

    async fn find_transaction_by_source_key(
        &self,
        tenant_id: TenantId,
        source_key: &str,
    ) -> LedgerResult<Option<Transaction>> {
        Ok(self
            .read()?
            .transactions
            .iter()
            .find(|t| t.tenant_id == tenant_id && t.source_key.as_deref() == Some(source_key))
            .cloned())
    }

    async fn list_transactions(
        &self,
        tenant_id: TenantId,
        filter: &TransactionFilter,
    ) -> LedgerResult<Vec<Transaction>> {
        let state = self.read()?;
        let mut transactions: Vec<Transaction> = state
            .transactions
            .iter()
            .rev()
            .filter(|t| t.tenant_id == tenant_id && filter.matches(t))
            .cloned()
            .collect();
        // Stable sort keeps later inserts first within a date
        transactions.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(transactions)
    }

    async fn post_draft(
        &mut self,
        tenant_id: TenantId,
        transaction_id: Uuid,
    ) -> LedgerResult<Transaction> {
        let mut state = self.write()?;
        let draft = state.transaction_mut(tenant_id, transaction_id)?.clone();
        if draft.status != TransactionStatus::Draft {
            return Err(LedgerError::CannotModify(format!(
                "transaction {} is not a draft",
                draft.number
            )));
        }
        if !draft.is_balanced() {
            return Err(LedgerError::NotBalanced {
                debits: draft.total_debits(),
                credits: draft.total_credits(),
            });
        }
        state.check_postable(tenant_id, &draft.lines)?;
        state.apply_lines(tenant_id, &draft.lines, false)?;

        let stored = state.transaction_mut(tenant_id, transaction_id)?;
        stored.status = TransactionStatus::Posted;
        stored.updated_at = now();
        Ok(stored.clone())
    }

    async fn void_transaction(
        &mut self,
        tenant_id: TenantId,
        transaction_id: Uuid,
        reason: Option<String>,
    ) -> LedgerResult<Transaction> {
        let mut state = self.write()?;
        let posted = state.transaction_mut(tenant_id, transaction_id)?.clone();
        if posted.status != TransactionStatus::Posted {
            return Err(LedgerError::CannotVoid(format!(
                "transaction {} is {:?}",
                posted.number, posted.status
            )));
        }
        let target = MatchTarget::Transaction(transaction_id);
        if state.bank_transactions.iter().any(|t| {
            t.tenant_id == tenant_id && t.reconciliation.as_ref().is_some_and(|r| r.target == target)
        }) {
            return Err(LedgerError::CannotVoid(format!(
                "transaction {} is reconciled to a bank line",
                posted.number
            )));
        }
        state.apply_lines(tenant_id, &posted.lines, true)?;

        let now = now();
        let stored = state.transaction_mut(tenant_id, transaction_id)?;
        stored.status = TransactionStatus::Void;
        stored.voided_at = Some(now);
        stored.void_reason = reason;
        stored.updated_at = now;
        Ok(stored.clone())
    }

    async fn delete_draft(&mut self, tenant_id: TenantId, transaction_id: Uuid) -> LedgerResult<()> {
        let mut state = self.write()?;
        let status = state.transaction_mut(tenant_id, transaction_id)?.status;
        if status != TransactionStatus::Draft {
            return Err(LedgerError::CannotModify(format!(
                "transaction {} is not a draft",
                transaction_id
            )));
        }
        state.transactions.retain(|t| t.id != transaction_id);
        Ok(())
    }

    async fn get_account_balance(
        &self,
        tenant_id: TenantId,
        account_id: Uuid,
        as_of_date: Option<NaiveDate>,
    ) -> LedgerResult<BigDecimal> {
        let state = self.read()?;
        let account = state
            .accounts
            .get(&account_id)
            .filter(|a| a.tenant_id == tenant_id)
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))?;

        let Some(as_of) = as_of_date else {
            return Ok(account.current_balance.clone());
        };
        Ok(state
            .transactions
            .iter()
            .filter(|t| {
                t.tenant_id == tenant_id && t.status == TransactionStatus::Posted && t.date <= as_of
            })
            .map(|t| t.effect_on(account_id))
            .sum())
    }
}

macro_rules! memory_recurring_storage {
    ($template:ty, $field:ident) => {
        #[async_trait]
        impl RecurringStorage<$template> for MemoryStorage {
            async fn insert_definition(
                &mut self,
                definition: &RecurringDefinition<$template>,
            ) -> LedgerResult<()> {
                self.write()?
                    .$field
                    .insert(definition.id, definition.clone());
                Ok(())
            }

            async fn get_definition(
                &self,
                tenant_id: TenantId,
                definition_id: Uuid,
            ) -> LedgerResult<Option<RecurringDefinition<$template>>> {
                Ok(self
                    .read()?
                    .$field
                    .get(&definition_id)
                    .filter(|d| d.tenant_id == tenant_id)
                    .cloned())
            }

            async fn list_definitions(
                &self,
                tenant_id: TenantId,
                status: Option<RecurringStatus>,
            ) -> LedgerResult<Vec<RecurringDefinition<$template>>> {
                let state = self.read()?;
                let mut definitions: Vec<_> = state
                    .$field
                    .values()
                    .filter(|d| {
                        d.tenant_id == tenant_id
                            && !d.is_deleted
                            && status.is_none_or(|s| d.status == s)
                    })
                    .cloned()
                    .collect();
                definitions.sort_by(|a, b| {
                    a.schedule
                        .next_run_date
                        .cmp(&b.schedule.next_run_date)
                        .then_with(|| a.name.cmp(&b.name))
                });
                Ok(definitions)
            }

            async fn replace_definition(
                &mut self,
                definition: &RecurringDefinition<$template>,
                now: NaiveDateTime,
            ) -> LedgerResult<()> {
                let mut state = self.write()?;
                let stored = state
                    .$field
                    .get_mut(&definition.id)
                    .filter(|d| d.tenant_id == definition.tenant_id)
                    .ok_or_else(|| {
                        LedgerError::RecurringDefinitionNotFound(definition.id.to_string())
                    })?;
                if stored.is_claimed(now) {
                    return Err(LedgerError::Conflict(format!(
                        "recurring definition {} is being generated",
                        definition.id
                    )));
                }
                if stored.schedule.occurrence_count != definition.schedule.occurrence_count {
                    return Err(LedgerError::Conflict(format!(
                        "recurring definition {} generated an occurrence concurrently",
                        definition.id
                    )));
                }
                *stored = RecurringDefinition {
                    claimed_by: None,
                    claim_expires_at: None,
                    ..definition.clone()
                };
                Ok(())
            }

            async fn due_definitions(
                &self,
                today: NaiveDate,
                now: NaiveDateTime,
            ) -> LedgerResult<Vec<RecurringDefinition<$template>>> {
                let state = self.read()?;
                let mut due: Vec<_> = state
                    .$field
                    .values()
                    .filter(|d| d.is_due(today) && !d.is_claimed(now))
                    .cloned()
                    .collect();
                due.sort_by(|a, b| {
                    a.schedule
                        .next_run_date
                        .cmp(&b.schedule.next_run_date)
                        .then_with(|| a.id.cmp(&b.id))
                });
                Ok(due)
            }

            async fn lapsed_definitions(
                &self,
                today: NaiveDate,
            ) -> LedgerResult<Vec<RecurringDefinition<$template>>> {
                Ok(self
                    .read()?
                    .$field
                    .values()
                    .filter(|d| {
                        d.status == RecurringStatus::Active
                            && !d.is_deleted
                            && (d.schedule.is_lapsed(today) || d.schedule.is_exhausted())
                    })
                    .cloned()
                    .collect())
            }

            async fn claim_definition(
                &mut self,
                tenant_id: TenantId,
                definition_id: Uuid,
                worker: &str,
                now: NaiveDateTime,
                lease_until: NaiveDateTime,
            ) -> LedgerResult<Option<RecurringDefinition<$template>>> {
                let mut state = self.write()?;
                let stored = state
                    .$field
                    .get_mut(&definition_id)
                    .filter(|d| d.tenant_id == tenant_id && !d.is_deleted)
                    .ok_or_else(|| {
                        LedgerError::RecurringDefinitionNotFound(definition_id.to_string())
                    })?;
                if stored.is_claimed(now) && stored.claimed_by.as_deref() != Some(worker) {
                    return Ok(None);
                }
                stored.claimed_by = Some(worker.to_string());
                stored.claim_expires_at = Some(lease_until);
                Ok(Some(stored.clone()))
            }

            async fn release_claim(
                &mut self,
                tenant_id: TenantId,
                definition_id: Uuid,
                worker: &str,
            ) -> LedgerResult<()> {
                let mut state = self.write()?;
                if let Some(stored) = state
                    .$field
                    .get_mut(&definition_id)
                    .filter(|d| d.tenant_id == tenant_id)
                {
                    if stored.claimed_by.as_deref() == Some(worker) {
                        stored.claimed_by = None;
                        stored.claim_expires_at = None;
                    }
                }
                Ok(())
            }

            async fn complete_generation(
                &mut self,
                worker: &str,
                expected_count: u32,
                updated: &RecurringDefinition<$template>,
                occurrence: &GeneratedOccurrence,
            ) -> LedgerResult<()> {
                let mut state = self.write()?;
                let stored = state
                    .$field
                    .get_mut(&updated.id)
                    .filter(|d| d.tenant_id == updated.tenant_id)
                    .ok_or_else(|| {
                        LedgerError::RecurringDefinitionNotFound(updated.id.to_string())
                    })?;
                if stored.claimed_by.as_deref() != Some(worker) {
                    return Err(LedgerError::Conflict(format!(
                        "worker {} no longer holds recurring definition {}",
                        worker, updated.id
                    )));
                }
                if stored.schedule.occurrence_count != expected_count {
                    return Err(LedgerError::Conflict(format!(
                        "recurring definition {} moved past occurrence {}",
                        updated.id, expected_count
                    )));
                }
                *stored = RecurringDefinition {
                    claimed_by: None,
                    claim_expires_at: None,
                    ..updated.clone()
                };
                state
                    .occurrences
                    .entry(updated.id)
                    .or_default()
                    .push(occurrence.clone());
                Ok(())
            }

            async fn list_occurrences(
                &self,
                tenant_id: TenantId,
                definition_id: Uuid,
            ) -> LedgerResult<Vec<GeneratedOccurrence>> {
                let state = self.read()?;
                let mut occurrences: Vec<GeneratedOccurrence> = state
                    .occurrences
                    .get(&definition_id)
                    .map(|list| {
                        list.iter()
                            .filter(|o| o.tenant_id == tenant_id)
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();
                occurrences.sort_by_key(|o| o.occurrence_number);
                Ok(occurrences)
            }
        }
    };
}

memory_recurring_storage!(JournalTemplate, recurring_journals);
memory_recurring_storage!(InvoiceTemplate, recurring_invoices);

#[async_trait]
impl BankStorage for MemoryStorage {
    async fn insert_bank_account(&mut self, account: &BankAccount) -> LedgerResult<()> {
        self.write()?.bank_accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn get_bank_account(
        &self,
        tenant_id: TenantId,
        bank_account_id: Uuid,
    ) -> LedgerResult<Option<BankAccount>> {
        Ok(self
            .read()?
            .bank_accounts
            .get(&bank_account_id)
            .filter(|a| a.tenant_id == tenant_id)
            .cloned())
    }

    async fn list_bank_accounts(&self, tenant_id: TenantId) -> LedgerResult<Vec<BankAccount>> {
        let state = self.read()?;
        let mut accounts: Vec<BankAccount> = state
            .bank_accounts
            .values()
            .filter(|a| a.tenant_id == tenant_id)
            .cloned()
            .collect();
        accounts.sort_by(|a, b| {
            a.bank_name
                .cmp(&b.bank_name)
                .then_with(|| a.account_name.cmp(&b.account_name))
        });
        Ok(accounts)
    }

    async fn update_bank_account(&mut self, account: &BankAccount) -> LedgerResult<()> {
        let mut state = self.write()?;
        match state.bank_accounts.get_mut(&account.id) {
            Some(stored) if stored.tenant_id == account.tenant_id => {
                *stored = account.clone();
                Ok(())
            }
            _ => Err(LedgerError::BankAccountNotFound(account.id.to_string())),
        }
    }

    async fn insert_bank_transactions(
        &mut self,
        lines: &[BankTransaction],
    ) -> LedgerResult<Vec<Uuid>> {
        let mut state = self.write()?;
        for line in lines {
            match state.bank_accounts.get(&line.bank_account_id) {
                Some(account) if account.tenant_id == line.tenant_id => {}
                _ => {
                    return Err(LedgerError::BankAccountNotFound(
                        line.bank_account_id.to_string(),
                    ))
                }
            }
        }

        let mut known: HashSet<String> = state
            .bank_transactions
            .iter()
            .map(|t| t.dedup_key.clone())
            .collect();
        let mut inserted = Vec::new();
        for line in lines {
            if known.insert(line.dedup_key.clone()) {
                state.bank_transactions.push(line.clone());
                inserted.push(line.id);
            }
        }
        Ok(inserted)
    }

    async fn get_bank_transaction(
        &self,
        tenant_id: TenantId,
        bank_transaction_id: Uuid,
    ) -> LedgerResult<Option<BankTransaction>> {
        Ok(self
            .read()?
            .bank_transactions
            .iter()
            .find(|t| t.tenant_id == tenant_id && t.id == bank_transaction_id)
            .cloned())
    }

    async fn list_bank_transactions(
        &self,
        tenant_id: TenantId,
        filter: &BankTransactionFilter,
    ) -> LedgerResult<Vec<BankTransaction>> {
        let state = self.read()?;
        let mut lines: Vec<BankTransaction> = state
            .bank_transactions
            .iter()
            .filter(|t| t.tenant_id == tenant_id && filter.matches(t))
            .cloned()
            .collect();
        lines.sort_by_key(|t| t.date);
        Ok(lines)
    }

    async fn set_reconciliation(
        &mut self,
        tenant_id: TenantId,
        bank_transaction_id: Uuid,
        reconciliation: Reconciliation,
    ) -> LedgerResult<BankTransaction> {
        let mut state = self.write()?;
        let target_taken = state.bank_transactions.iter().any(|t| {
            t.tenant_id == tenant_id
                && t.id != bank_transaction_id
                && t.reconciliation
                    .as_ref()
                    .is_some_and(|r| r.target == reconciliation.target)
        });
        let line = state
            .bank_transactions
            .iter_mut()
            .find(|t| t.tenant_id == tenant_id && t.id == bank_transaction_id)
            .ok_or_else(|| LedgerError::BankTransactionNotFound(bank_transaction_id.to_string()))?;
        if line.is_reconciled() {
            return Err(LedgerError::AlreadyReconciled(format!(
                "bank transaction {} is already reconciled",
                bank_transaction_id
            )));
        }
        if target_taken {
            return Err(LedgerError::AlreadyReconciled(format!(
                "{:?} is already matched to another bank transaction",
                reconciliation.target
            )));
        }
        line.reconciliation = Some(reconciliation);
        Ok(line.clone())
    }

    async fn clear_reconciliation(
        &mut self,
        tenant_id: TenantId,
        bank_transaction_id: Uuid,
    ) -> LedgerResult<BankTransaction> {
        let mut state = self.write()?;
        let line = state
            .bank_transactions
            .iter_mut()
            .find(|t| t.tenant_id == tenant_id && t.id == bank_transaction_id)
            .ok_or_else(|| LedgerError::BankTransactionNotFound(bank_transaction_id.to_string()))?;
        if line.reconciliation.take().is_none() {
            return Err(LedgerError::CannotModify(format!(
                "bank transaction {} is not reconciled",
                bank_transaction_id
            )));
        }
        Ok(line.clone())
    }

    async fn reconciled_targets(&self, tenant_id: TenantId) -> LedgerResult<Vec<MatchTarget>> {
        Ok(self
            .read()?
            .bank_transactions
            .iter()
            .filter(|t| t.tenant_id == tenant_id)
            .filter_map(|t| t.reconciliation.as_ref().map(|r| r.target))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(tenant: TenantId, code: &str) -> Account {
        Account::new(tenant, code.to_string(), format!("Account {}", code), AccountType::Asset, None)
    }

    #[tokio::test]
    async fn test_update_account_keeps_stored_balance() {
        let tenant = Uuid::new_v4();
        let mut storage = MemoryStorage::new();
        let cash = account(tenant, "1000");
        let other = account(tenant, "1100");
        storage.insert_account(&cash).await.unwrap();
        storage.insert_account(&other).await.unwrap();

        let mut posted = NewTransaction::new(
            TransactionType::Transfer,
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            "Move".to_string(),
        );
        posted.lines = vec![
            TransactionLine::debit(cash.id, BigDecimal::from(10), None),
            TransactionLine::credit(other.id, BigDecimal::from(10), None),
        ];
        storage
            .insert_transaction(&Transaction::from_new(tenant, 1, posted))
            .await
            .unwrap();

        let mut stale = cash.clone();
        stale.name = "Petty cash".to_string();
        storage.update_account(&stale).await.unwrap();

        let stored = storage.get_account(tenant, cash.id).await.unwrap().unwrap();
        assert_eq!(stored.name, "Petty cash");
        assert_eq!(stored.current_balance, BigDecimal::from(10));
    }

    #[tokio::test]
    async fn test_failed_insert_leaves_balances_untouched() {
        let tenant = Uuid::new_v4();
        let mut storage = MemoryStorage::new();
        let cash = account(tenant, "1000");
        storage.insert_account(&cash).await.unwrap();

        let mut input = NewTransaction::new(
            TransactionType::Journal,
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            "Orphan".to_string(),
        );
        input.lines = vec![
            TransactionLine::debit(cash.id, BigDecimal::from(10), None),
            TransactionLine::credit(Uuid::new_v4(), BigDecimal::from(10), None),
        ];
        let result = storage
            .insert_transaction(&Transaction::from_new(tenant, 1, input))
            .await;

        assert!(matches!(result, Err(LedgerError::AccountNotFound(_))));
        let balance = storage.get_account_balance(tenant, cash.id, None).await.unwrap();
        assert_eq!(balance, BigDecimal::from(0));
    }

    #[tokio::test]
    async fn test_replace_definition_judges_leases_by_the_callers_clock() {
        use crate::recurring::{Frequency, Schedule};

        let tenant = Uuid::new_v4();
        let mut storage = MemoryStorage::new();
        let schedule = Schedule::new(
            Frequency::Monthly,
            1,
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
        );
        let definition = RecurringDefinition::new(
            tenant,
            "Rent",
            schedule,
            JournalTemplate::new("Rent", Vec::new()),
        );
        storage.insert_definition(&definition).await.unwrap();

        let claimed_at = NaiveDate::from_ymd_opt(2026, 1, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let lease_until = claimed_at + chrono::Duration::minutes(10);
        RecurringStorage::<JournalTemplate>::claim_definition(
            &mut storage,
            tenant,
            definition.id,
            "worker-a",
            claimed_at,
            lease_until,
        )
        .await
        .unwrap()
        .unwrap();

        let mut renamed = definition.clone();
        renamed.name = "Office rent".to_string();
        let held = storage
            .replace_definition(&renamed, claimed_at + chrono::Duration::minutes(5))
            .await;
        assert!(matches!(held, Err(LedgerError::Conflict(_))));

        storage
            .replace_definition(&renamed, lease_until + chrono::Duration::seconds(1))
            .await
            .unwrap();
        let stored = RecurringStorage::<JournalTemplate>::get_definition(&storage, tenant, definition.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.name, "Office rent");
        assert_eq!(stored.claimed_by, None);
    }

    #[tokio::test]
    async fn test_tenants_are_isolated() {
        let mut storage = MemoryStorage::new();
        let ours = Uuid::new_v4();
        let theirs = Uuid::new_v4();
        let cash = account(ours, "1000");
        storage.insert_account(&cash).await.unwrap();
        storage.insert_account(&account(theirs, "1000")).await.unwrap();

        assert!(storage.get_account(theirs, cash.id).await.unwrap().is_none());
        assert_eq!(
            storage
                .list_accounts(ours, &AccountFilter::default())
                .await
                .unwrap()
                .len(),
            1
        );
    }
}
