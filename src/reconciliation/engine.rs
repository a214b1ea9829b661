//! Bank statement import and reconciliation against the ledger

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::ReconciliationConfig;
use crate::ledger::TransactionFilter;
use crate::reconciliation::matcher::{self, MatchCandidate, MatchSuggestion};
use crate::reconciliation::*;
use crate::traits::*;
use crate::types::*;
use crate::utils::validation;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoMatch {
    pub bank_transaction_id: Uuid,
    pub target: MatchTarget,
    pub confidence: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutoReconcileReport {
    pub examined: usize,
    pub reconciled: Vec<AutoMatch>,
    /// Lines whose top suggestion was below the threshold, or had none
    pub below_threshold: usize,
    /// Lines with two or more equally good top suggestions
    pub ambiguous: usize,
    /// Lines another writer reconciled while this run was matching them
    pub conflicts: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationSummary {
    pub bank_account_id: Uuid,
    pub as_of: NaiveDate,
    pub bank_balance: BigDecimal,
    pub ledger_balance: BigDecimal,
    pub difference: BigDecimal,
    pub unreconciled_count: usize,
    /// Money in on unreconciled lines
    pub unreconciled_credits: BigDecimal,
    /// Money out on unreconciled lines
    pub unreconciled_debits: BigDecimal,
    pub is_reconciled: bool,
}

/// Imports bank statements and links their lines to ledger transactions or
/// collaborator documents
pub struct ReconciliationEngine<B: BankStorage, L: LedgerStorage> {
    bank: B,
    ledger: L,
    documents: Option<Arc<dyn DocumentDirectory>>,
    config: ReconciliationConfig,
}

impl<B: BankStorage, L: LedgerStorage> ReconciliationEngine<B, L> {
    pub fn new(bank: B, ledger: L, config: &ReconciliationConfig) -> Self {
        Self {
            bank,
            ledger,
            documents: None,
            config: config.clone(),
        }
    }

    /// Also offer open invoices, bills and expenses as match targets
    pub fn with_documents(mut self, documents: Arc<dyn DocumentDirectory>) -> Self {
        self.documents = Some(documents);
        self
    }

    pub async fn create_bank_account(
        &mut self,
        tenant_id: TenantId,
        input: NewBankAccount,
    ) -> LedgerResult<BankAccount> {
        require_text("bank name", &input.bank_name)?;
        require_text("account name", &input.account_name)?;
        require_text("account number", &input.account_number)?;
        if input.decimal_places > 8 {
            return Err(LedgerError::Validation(format!(
                "{} decimal places is not a currency precision",
                input.decimal_places
            )));
        }
        if let Some(ledger_account_id) = input.ledger_account_id {
            self.check_ledger_account(tenant_id, ledger_account_id).await?;
        }

        let now = now();
        let account = BankAccount {
            id: Uuid::new_v4(),
            tenant_id,
            bank_name: input.bank_name,
            account_name: input.account_name,
            account_number: input.account_number,
            routing_code: input.routing_code,
            account_type: input.account_type,
            currency: input.currency,
            decimal_places: input.decimal_places,
            current_balance: input.opening_balance.clone(),
            statement_balance: input.opening_balance,
            last_synced_at: None,
            ledger_account_id: input.ledger_account_id,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.bank.insert_bank_account(&account).await?;
        tracing::info!(tenant = %tenant_id, id = %account.id, bank = %account.bank_name, "bank account created");
        Ok(account)
    }

    pub async fn get_bank_account(
        &self,
        tenant_id: TenantId,
        bank_account_id: Uuid,
    ) -> LedgerResult<BankAccount> {
        self.bank
            .get_bank_account(tenant_id, bank_account_id)
            .await?
            .ok_or_else(|| LedgerError::BankAccountNotFound(bank_account_id.to_string()))
    }

    pub async fn list_bank_accounts(&self, tenant_id: TenantId) -> LedgerResult<Vec<BankAccount>> {
        self.bank.list_bank_accounts(tenant_id).await
    }

    pub async fn update_bank_account(
        &mut self,
        tenant_id: TenantId,
        bank_account_id: Uuid,
        update: BankAccountUpdate,
    ) -> LedgerResult<BankAccount> {
        let mut account = self.get_bank_account(tenant_id, bank_account_id).await?;
        if let Some(bank_name) = update.bank_name {
            require_text("bank name", &bank_name)?;
            account.bank_name = bank_name;
        }
        if let Some(account_name) = update.account_name {
            require_text("account name", &account_name)?;
            account.account_name = account_name;
        }
        if let Some(routing_code) = update.routing_code {
            account.routing_code = routing_code;
        }
        if let Some(account_type) = update.account_type {
            account.account_type = account_type;
        }
        if let Some(ledger_account_id) = update.ledger_account_id {
            if let Some(id) = ledger_account_id {
                self.check_ledger_account(tenant_id, id).await?;
            }
            account.ledger_account_id = ledger_account_id;
        }
        if let Some(is_active) = update.is_active {
            account.is_active = is_active;
        }
        account.updated_at = now();
        self.bank.update_bank_account(&account).await?;
        Ok(account)
    }

    pub async fn list_bank_transactions(
        &self,
        tenant_id: TenantId,
        filter: &BankTransactionFilter,
        page: PageRequest,
    ) -> LedgerResult<Page<BankTransaction>> {
        let all = self.bank.list_bank_transactions(tenant_id, filter).await?;
        Ok(Page::from_vec(all, page))
    }

    /// Import statement lines, skipping any already imported for this
    /// account. Identical lines within one statement are separate bank
    /// movements and are all kept; each repeat gets an ordinal in its dedup
    /// key so a re-import lines up with the same rows. Lines are written in
    /// chunks; each chunk is all-or-nothing, so re-running an interrupted
    /// import only adds what is missing.
    pub async fn import_statement(
        &mut self,
        tenant_id: TenantId,
        bank_account_id: Uuid,
        lines: Vec<StatementLine>,
    ) -> LedgerResult<ImportReport> {
        let mut account = self.get_bank_account(tenant_id, bank_account_id).await?;
        if !account.is_active {
            return Err(LedgerError::CannotModify(format!(
                "bank account {} is inactive",
                account.account_name
            )));
        }
        for line in &lines {
            validation::validate_positive_amount(&line.amount)?;
            if line.description.trim().is_empty()
                && line.reference.as_deref().is_none_or(|r| r.trim().is_empty())
            {
                return Err(LedgerError::Validation(format!(
                    "statement line on {} needs a description or reference",
                    line.date
                )));
            }
        }

        let total = lines.len();
        let latest_balance = lines
            .iter()
            .enumerate()
            .filter(|(_, line)| line.running_balance.is_some())
            .max_by_key(|(index, line)| (line.date, *index))
            .and_then(|(_, line)| line.running_balance.clone());

        let imported_at = now();
        let mut repeats: HashMap<String, u32> = HashMap::new();
        let fresh: Vec<BankTransaction> = lines
            .into_iter()
            .map(|line| {
                let mut tx = BankTransaction::from_statement(&account, line, imported_at);
                let seen = repeats.entry(tx.dedup_key.clone()).or_insert(0);
                if *seen > 0 {
                    tx.dedup_key = format!("{}#{}", tx.dedup_key, seen);
                }
                *seen += 1;
                tx
            })
            .collect();

        let mut transaction_ids = Vec::with_capacity(fresh.len());
        for chunk in fresh.chunks(self.config.import_chunk_size.max(1)) {
            let inserted = self.bank.insert_bank_transactions(chunk).await?;
            tracing::debug!(
                bank_account = %bank_account_id,
                inserted = inserted.len(),
                skipped = chunk.len() - inserted.len(),
                "statement chunk written"
            );
            transaction_ids.extend(inserted);
        }

        if let Some(balance) = latest_balance {
            account.statement_balance = balance;
        }
        account.last_synced_at = Some(imported_at);
        account.updated_at = imported_at;
        self.bank.update_bank_account(&account).await?;

        let report = ImportReport {
            imported: transaction_ids.len(),
            duplicates: total - transaction_ids.len(),
            transaction_ids,
        };
        tracing::info!(
            tenant = %tenant_id,
            bank_account = %bank_account_id,
            imported = report.imported,
            duplicates = report.duplicates,
            "bank statement imported"
        );
        Ok(report)
    }

    /// Ranked match candidates for an unreconciled bank line
    pub async fn suggest_matches(
        &self,
        tenant_id: TenantId,
        bank_transaction_id: Uuid,
    ) -> LedgerResult<Vec<MatchSuggestion>> {
        let line = self.get_bank_line(tenant_id, bank_transaction_id).await?;
        if line.is_reconciled() {
            return Err(LedgerError::AlreadyReconciled(format!(
                "bank transaction {} is already reconciled",
                bank_transaction_id
            )));
        }
        let account = self.get_bank_account(tenant_id, line.bank_account_id).await?;
        let candidates = self.candidates(tenant_id, &account, line.direction).await?;
        Ok(matcher::rank(
            &line,
            &candidates,
            account.decimal_places,
            self.config.max_suggestions,
        ))
    }

    /// Link a bank line to a ledger transaction or document
    pub async fn reconcile(
        &mut self,
        tenant_id: TenantId,
        bank_transaction_id: Uuid,
        target: MatchTarget,
        reconciled_by: Uuid,
    ) -> LedgerResult<BankTransaction> {
        let line = self.get_bank_line(tenant_id, bank_transaction_id).await?;
        if line.is_reconciled() {
            return Err(LedgerError::AlreadyReconciled(format!(
                "bank transaction {} is already reconciled",
                bank_transaction_id
            )));
        }
        if let MatchTarget::Transaction(transaction_id) = target {
            let transaction = self
                .ledger
                .get_transaction(tenant_id, transaction_id)
                .await?
                .ok_or_else(|| LedgerError::TransactionNotFound(transaction_id.to_string()))?;
            if transaction.status != TransactionStatus::Posted {
                return Err(LedgerError::CannotModify(format!(
                    "transaction {} is {:?}; only posted transactions can be reconciled",
                    transaction.number, transaction.status
                )));
            }
        }

        let reconciliation = Reconciliation {
            target,
            reconciled_by,
            reconciled_at: now(),
        };
        let reconciled = self
            .bank
            .set_reconciliation(tenant_id, bank_transaction_id, reconciliation)
            .await?;
        tracing::info!(
            tenant = %tenant_id,
            bank_transaction = %bank_transaction_id,
            target = ?target,
            "bank transaction reconciled"
        );
        Ok(reconciled)
    }

    pub async fn reconcile_transaction(
        &mut self,
        tenant_id: TenantId,
        bank_transaction_id: Uuid,
        transaction_id: Uuid,
        reconciled_by: Uuid,
    ) -> LedgerResult<BankTransaction> {
        self.reconcile(
            tenant_id,
            bank_transaction_id,
            MatchTarget::Transaction(transaction_id),
            reconciled_by,
        )
        .await
    }

    pub async fn unreconcile(
        &mut self,
        tenant_id: TenantId,
        bank_transaction_id: Uuid,
    ) -> LedgerResult<BankTransaction> {
        let line = self.get_bank_line(tenant_id, bank_transaction_id).await?;
        if !line.is_reconciled() {
            return Err(LedgerError::CannotModify(format!(
                "bank transaction {} is not reconciled",
                bank_transaction_id
            )));
        }
        let cleared = self
            .bank
            .clear_reconciliation(tenant_id, bank_transaction_id)
            .await?;
        tracing::info!(tenant = %tenant_id, bank_transaction = %bank_transaction_id, "bank transaction unreconciled");
        Ok(cleared)
    }

    /// Reconcile every unreconciled line whose best suggestion clears the
    /// configured threshold and is not tied with the runner-up
    pub async fn auto_reconcile(
        &mut self,
        tenant_id: TenantId,
        bank_account_id: Uuid,
        reconciled_by: Uuid,
    ) -> LedgerResult<AutoReconcileReport> {
        let account = self.get_bank_account(tenant_id, bank_account_id).await?;
        let lines = self
            .bank
            .list_bank_transactions(
                tenant_id,
                &BankTransactionFilter::for_account(bank_account_id).unreconciled(),
            )
            .await?;
        let threshold = self.config.auto_reconcile_threshold;

        let mut report = AutoReconcileReport::default();
        let mut used: HashSet<MatchTarget> = HashSet::new();
        for line in lines {
            report.examined += 1;
            let candidates: Vec<MatchCandidate> = self
                .candidates(tenant_id, &account, line.direction)
                .await?
                .into_iter()
                .filter(|c| !used.contains(&c.target))
                .collect();
            let suggestions = matcher::rank(&line, &candidates, account.decimal_places, 2);

            let Some(top) = suggestions.first() else {
                report.below_threshold += 1;
                continue;
            };
            if top.confidence < threshold {
                report.below_threshold += 1;
                continue;
            }
            if suggestions
                .get(1)
                .is_some_and(|runner_up| runner_up.confidence == top.confidence)
            {
                tracing::debug!(bank_transaction = %line.id, confidence = top.confidence, "ambiguous match skipped");
                report.ambiguous += 1;
                continue;
            }

            let target = top.target;
            let confidence = top.confidence;
            match self.reconcile(tenant_id, line.id, target, reconciled_by).await {
                Ok(_) => {
                    used.insert(target);
                    report.reconciled.push(AutoMatch {
                        bank_transaction_id: line.id,
                        target,
                        confidence,
                    });
                }
                Err(LedgerError::AlreadyReconciled(reason)) => {
                    tracing::debug!(bank_transaction = %line.id, %reason, "auto match lost a race");
                    report.conflicts += 1;
                }
                Err(err) => return Err(err),
            }
        }

        tracing::info!(
            tenant = %tenant_id,
            bank_account = %bank_account_id,
            examined = report.examined,
            reconciled = report.reconciled.len(),
            conflicts = report.conflicts,
            "auto reconciliation finished"
        );
        Ok(report)
    }

    /// Bank against ledger position on a date
    pub async fn reconciliation_summary(
        &self,
        tenant_id: TenantId,
        bank_account_id: Uuid,
        as_of: NaiveDate,
    ) -> LedgerResult<ReconciliationSummary> {
        let account = self.get_bank_account(tenant_id, bank_account_id).await?;
        let lines = self
            .bank
            .list_bank_transactions(
                tenant_id,
                &BankTransactionFilter {
                    bank_account_id: Some(bank_account_id),
                    to: Some(as_of),
                    ..Default::default()
                },
            )
            .await?;

        let bank_balance = lines
            .iter()
            .rev()
            .find_map(|line| line.running_balance.clone())
            .unwrap_or_else(|| account.statement_balance.clone());
        let ledger_balance = match account.ledger_account_id {
            Some(ledger_account_id) => {
                self.ledger
                    .get_account_balance(tenant_id, ledger_account_id, Some(as_of))
                    .await?
            }
            None => account.current_balance.clone(),
        };

        let mut unreconciled_count = 0;
        let mut unreconciled_credits = zero();
        let mut unreconciled_debits = zero();
        for line in lines.iter().filter(|line| !line.is_reconciled()) {
            unreconciled_count += 1;
            match line.direction {
                Direction::Credit => unreconciled_credits += &line.amount,
                Direction::Debit => unreconciled_debits += &line.amount,
            }
        }

        let difference = &bank_balance - &ledger_balance;
        let is_reconciled = unreconciled_count == 0 && difference == zero();
        Ok(ReconciliationSummary {
            bank_account_id,
            as_of,
            bank_balance,
            ledger_balance,
            difference,
            unreconciled_count,
            unreconciled_credits,
            unreconciled_debits,
            is_reconciled,
        })
    }

    async fn get_bank_line(
        &self,
        tenant_id: TenantId,
        bank_transaction_id: Uuid,
    ) -> LedgerResult<BankTransaction> {
        self.bank
            .get_bank_transaction(tenant_id, bank_transaction_id)
            .await?
            .ok_or_else(|| LedgerError::BankTransactionNotFound(bank_transaction_id.to_string()))
    }

    async fn check_ledger_account(&self, tenant_id: TenantId, account_id: Uuid) -> LedgerResult<()> {
        match self.ledger.get_account(tenant_id, account_id).await? {
            Some(account) if !account.is_deleted => Ok(()),
            _ => Err(LedgerError::AccountNotFound(account_id.to_string())),
        }
    }

    /// Unlinked posted transactions and open documents moving money in
    /// `direction`
    async fn candidates(
        &self,
        tenant_id: TenantId,
        account: &BankAccount,
        direction: Direction,
    ) -> LedgerResult<Vec<MatchCandidate>> {
        let linked: HashSet<MatchTarget> = self
            .bank
            .reconciled_targets(tenant_id)
            .await?
            .into_iter()
            .collect();

        let filter = TransactionFilter {
            status: Some(TransactionStatus::Posted),
            account_id: account.ledger_account_id,
            ..Default::default()
        };
        let mut candidates: Vec<MatchCandidate> = self
            .ledger
            .list_transactions(tenant_id, &filter)
            .await?
            .into_iter()
            .filter(|tx| !linked.contains(&MatchTarget::Transaction(tx.id)))
            .filter_map(|tx| ledger_candidate(tx, account.ledger_account_id))
            .filter(|c| c.direction == direction)
            .collect();

        if let Some(documents) = &self.documents {
            let kinds: &[DocumentKind] = match direction {
                Direction::Credit => &[DocumentKind::Invoice],
                Direction::Debit => &[DocumentKind::Bill, DocumentKind::Expense],
            };
            for kind in kinds {
                let open = documents
                    .open_documents(tenant_id, *kind)
                    .await
                    .map_err(|err| match err {
                        LedgerError::Collaborator(_) => err,
                        other => LedgerError::Collaborator(other.to_string()),
                    })?;
                candidates.extend(
                    open.into_iter()
                        .filter(|doc| !linked.contains(&doc.match_target()))
                        .map(|doc| MatchCandidate {
                            target: doc.match_target(),
                            label: doc.number,
                            date: doc.due_date.unwrap_or(doc.issue_date),
                            direction,
                            amount: doc.amount_due,
                            party_name: Some(doc.party_name),
                            reference: None,
                        }),
                );
            }
        }

        Ok(candidates)
    }
}

/// Direction and amount of a ledger transaction as the bank would see it.
/// With a linked ledger account the signed effect on that account decides;
/// otherwise the transaction type does.
fn ledger_candidate(transaction: Transaction, ledger_account_id: Option<Uuid>) -> Option<MatchCandidate> {
    let (direction, amount) = match ledger_account_id {
        Some(account_id) => {
            let effect = transaction.effect_on(account_id);
            if effect > zero() {
                (Direction::Credit, effect)
            } else if effect < zero() {
                (Direction::Debit, -effect)
            } else {
                return None;
            }
        }
        None => {
            let direction = if transaction.transaction_type.is_inflow()? {
                Direction::Credit
            } else {
                Direction::Debit
            };
            (direction, transaction.total_amount.clone())
        }
    };
    Some(MatchCandidate {
        target: MatchTarget::Transaction(transaction.id),
        label: transaction.number,
        date: transaction.date,
        direction,
        amount,
        party_name: transaction.party_name,
        reference: transaction.reference,
    })
}

fn require_text(field: &str, value: &str) -> LedgerResult<()> {
    if value.trim().is_empty() {
        return Err(LedgerError::Validation(format!("{} cannot be empty", field)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{AccountManager, TransactionBuilder, TransactionManager};
    use crate::utils::memory_documents::MemoryDocuments;
    use crate::utils::memory_storage::MemoryStorage;
    use std::collections::HashMap;
    use std::str::FromStr;

    type Engine = ReconciliationEngine<MemoryStorage, MemoryStorage>;

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, m, d).unwrap()
    }

    fn amount(value: &str) -> BigDecimal {
        BigDecimal::from_str(value).unwrap()
    }

    async fn setup(config: &ReconciliationConfig) -> (TenantId, MemoryStorage, HashMap<String, Account>, Engine, BankAccount) {
        let tenant = Uuid::new_v4();
        let storage = MemoryStorage::new();
        let chart = AccountManager::new(storage.clone())
            .seed_default_chart(tenant)
            .await
            .unwrap();
        let mut engine = ReconciliationEngine::new(storage.clone(), storage.clone(), config);
        let bank = engine
            .create_bank_account(
                tenant,
                NewBankAccount::new("HDFC", "Operating", "50100012345").linked_to(chart["bank"].id),
            )
            .await
            .unwrap();
        (tenant, storage, chart, engine, bank)
    }

    async fn receipt(
        storage: &MemoryStorage,
        tenant: TenantId,
        chart: &HashMap<String, Account>,
        on: NaiveDate,
        party: &str,
        value: &str,
    ) -> Transaction {
        let input = TransactionBuilder::new(TransactionType::Receipt, on, "Customer payment")
            .party(party)
            .debit(chart["bank"].id, amount(value), None)
            .credit(chart["accounts_receivable"].id, amount(value), None)
            .build()
            .unwrap();
        TransactionManager::new(storage.clone())
            .create_transaction(tenant, input)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_import_skips_lines_already_stored() {
        let config = ReconciliationConfig {
            import_chunk_size: 1,
            ..ReconciliationConfig::default()
        };
        let (tenant, _, _, mut engine, bank) = setup(&config).await;
        let lines = vec![
            StatementLine::new(date(1, 5), "NEFT CR ACME", Direction::Credit, amount("1500.00"))
                .reference("UTR001")
                .balance(amount("1500.00")),
            StatementLine::new(date(1, 6), "ATM WDL", Direction::Debit, amount("200.00"))
                .balance(amount("1300.00")),
        ];

        let first = engine.import_statement(tenant, bank.id, lines.clone()).await.unwrap();
        assert_eq!(first.imported, 2);
        assert_eq!(first.duplicates, 0);

        let again = engine.import_statement(tenant, bank.id, lines).await.unwrap();
        assert_eq!(again.imported, 0);
        assert_eq!(again.duplicates, 2);

        // The same movement exported with different formatting
        let reformatted = vec![
            StatementLine::new(date(1, 5), "NEFT CR ACME", Direction::Credit, amount("1500"))
                .reference(" utr001 ")
                .balance(amount("1500")),
        ];
        let noisy = engine.import_statement(tenant, bank.id, reformatted).await.unwrap();
        assert_eq!(noisy.imported, 0);
        assert_eq!(noisy.duplicates, 1);

        let account = engine.get_bank_account(tenant, bank.id).await.unwrap();
        assert_eq!(account.statement_balance, amount("1300.00"));
        assert!(account.last_synced_at.is_some());
        let page = engine
            .list_bank_transactions(tenant, &BankTransactionFilter::for_account(bank.id), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(page.total, 2);
    }

    #[tokio::test]
    async fn test_identical_lines_in_one_statement_are_all_kept() {
        let (tenant, _, _, mut engine, bank) = setup(&ReconciliationConfig::default()).await;
        let with_balances = vec![
            StatementLine::new(date(2, 3), "ATM WDL", Direction::Debit, amount("500"))
                .balance(amount("1500")),
            StatementLine::new(date(2, 3), "ATM WDL", Direction::Debit, amount("500"))
                .balance(amount("1000")),
        ];
        let first = engine.import_statement(tenant, bank.id, with_balances.clone()).await.unwrap();
        assert_eq!(first.imported, 2);
        assert_eq!(first.duplicates, 0);

        let summary = engine.reconciliation_summary(tenant, bank.id, date(2, 28)).await.unwrap();
        assert_eq!(summary.unreconciled_count, 2);
        assert_eq!(summary.unreconciled_debits, amount("1000"));
        assert_eq!(summary.bank_balance, amount("1000"));
        let account = engine.get_bank_account(tenant, bank.id).await.unwrap();
        assert_eq!(account.statement_balance, amount("1000"));

        let again = engine.import_statement(tenant, bank.id, with_balances).await.unwrap();
        assert_eq!(again.imported, 0);
        assert_eq!(again.duplicates, 2);

        // Without running balances the repeats are told apart by position
        let bare = vec![
            StatementLine::new(date(2, 4), "SMS CHARGES", Direction::Debit, amount("15")),
            StatementLine::new(date(2, 4), "SMS CHARGES", Direction::Debit, amount("15")),
            StatementLine::new(date(2, 4), "SMS CHARGES", Direction::Debit, amount("15")),
        ];
        let first = engine.import_statement(tenant, bank.id, bare.clone()).await.unwrap();
        assert_eq!(first.imported, 3);
        let again = engine.import_statement(tenant, bank.id, bare).await.unwrap();
        assert_eq!(again.imported, 0);
        assert_eq!(again.duplicates, 3);
    }

    #[tokio::test]
    async fn test_import_rejects_bad_lines_and_inactive_accounts() {
        let (tenant, _, _, mut engine, bank) = setup(&ReconciliationConfig::default()).await;
        let zero = vec![StatementLine::new(date(1, 5), "Fee", Direction::Debit, amount("0"))];
        let err = engine.import_statement(tenant, bank.id, zero).await.unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));

        let blank = vec![StatementLine::new(date(1, 5), "  ", Direction::Debit, amount("5"))];
        let err = engine.import_statement(tenant, bank.id, blank).await.unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));

        engine
            .update_bank_account(
                tenant,
                bank.id,
                BankAccountUpdate {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let line = vec![StatementLine::new(date(1, 5), "Fee", Direction::Debit, amount("5"))];
        let err = engine.import_statement(tenant, bank.id, line).await.unwrap_err();
        assert!(matches!(err, LedgerError::CannotModify(_)));

        let err = engine.import_statement(tenant, Uuid::new_v4(), Vec::new()).await.unwrap_err();
        assert!(matches!(err, LedgerError::BankAccountNotFound(_)));
    }

    #[tokio::test]
    async fn test_suggest_and_reconcile_lifecycle() {
        let (tenant, storage, chart, mut engine, bank) = setup(&ReconciliationConfig::default()).await;
        let acme = receipt(&storage, tenant, &chart, date(1, 10), "Acme Traders", "1500").await;
        receipt(&storage, tenant, &chart, date(1, 20), "Globex", "1500").await;

        let report = engine
            .import_statement(
                tenant,
                bank.id,
                vec![
                    StatementLine::new(date(1, 11), "NEFT CR", Direction::Credit, amount("1500.00"))
                        .counterparty("ACME TRADERS"),
                    StatementLine::new(date(1, 11), "NEFT CR 2", Direction::Credit, amount("1500.00")),
                ],
            )
            .await
            .unwrap();
        let line_id = report.transaction_ids[0];
        let other_id = report.transaction_ids[1];

        let suggestions = engine.suggest_matches(tenant, line_id).await.unwrap();
        assert_eq!(suggestions.len(), 2);
        assert_eq!(suggestions[0].target, MatchTarget::Transaction(acme.id));
        assert_eq!(suggestions[0].confidence, 98);

        let reconciler = Uuid::new_v4();
        let reconciled = engine
            .reconcile_transaction(tenant, line_id, acme.id, reconciler)
            .await
            .unwrap();
        let link = reconciled.reconciliation.unwrap();
        assert_eq!(link.target, MatchTarget::Transaction(acme.id));
        assert_eq!(link.reconciled_by, reconciler);

        let err = engine.reconcile_transaction(tenant, line_id, acme.id, reconciler).await.unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyReconciled(_)));
        let err = engine.reconcile_transaction(tenant, other_id, acme.id, reconciler).await.unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyReconciled(_)));
        let err = engine.suggest_matches(tenant, line_id).await.unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyReconciled(_)));

        // The linked receipt is no longer offered for other lines
        let remaining = engine.suggest_matches(tenant, other_id).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_ne!(remaining[0].target, MatchTarget::Transaction(acme.id));

        let cleared = engine.unreconcile(tenant, line_id).await.unwrap();
        assert!(cleared.reconciliation.is_none());
        let err = engine.unreconcile(tenant, line_id).await.unwrap_err();
        assert!(matches!(err, LedgerError::CannotModify(_)));
    }

    #[tokio::test]
    async fn test_reconcile_requires_posted_transaction() {
        let (tenant, storage, chart, mut engine, bank) = setup(&ReconciliationConfig::default()).await;
        let draft = TransactionBuilder::new(TransactionType::Receipt, date(2, 1), "Pending")
            .draft()
            .debit(chart["bank"].id, amount("10"), None)
            .credit(chart["accounts_receivable"].id, amount("10"), None)
            .build()
            .unwrap();
        let draft = TransactionManager::new(storage.clone())
            .create_transaction(tenant, draft)
            .await
            .unwrap();
        let report = engine
            .import_statement(
                tenant,
                bank.id,
                vec![StatementLine::new(date(2, 1), "CR", Direction::Credit, amount("10"))],
            )
            .await
            .unwrap();
        let line_id = report.transaction_ids[0];

        let err = engine.reconcile_transaction(tenant, line_id, draft.id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, LedgerError::CannotModify(_)));
        let err = engine
            .reconcile_transaction(tenant, line_id, Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::TransactionNotFound(_)));
        let err = engine
            .reconcile_transaction(tenant, Uuid::new_v4(), draft.id, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::BankTransactionNotFound(_)));
    }

    #[tokio::test]
    async fn test_auto_reconcile_skips_weak_and_ambiguous_matches() {
        let (tenant, storage, chart, mut engine, bank) = setup(&ReconciliationConfig::default()).await;
        let acme = receipt(&storage, tenant, &chart, date(3, 2), "Acme", "1500").await;
        receipt(&storage, tenant, &chart, date(3, 4), "Globex", "700").await;
        receipt(&storage, tenant, &chart, date(3, 4), "Globex", "700").await;

        let report = engine
            .import_statement(
                tenant,
                bank.id,
                vec![
                    StatementLine::new(date(3, 2), "NEFT CR", Direction::Credit, amount("1500")).counterparty("Acme"),
                    StatementLine::new(date(3, 4), "IMPS CR", Direction::Credit, amount("700")).counterparty("Globex"),
                    StatementLine::new(date(3, 5), "INTEREST", Direction::Credit, amount("42")),
                ],
            )
            .await
            .unwrap();

        let auto = engine.auto_reconcile(tenant, bank.id, Uuid::new_v4()).await.unwrap();
        assert_eq!(auto.examined, 3);
        assert_eq!(auto.reconciled.len(), 1);
        assert_eq!(auto.reconciled[0].bank_transaction_id, report.transaction_ids[0]);
        assert_eq!(auto.reconciled[0].target, MatchTarget::Transaction(acme.id));
        assert_eq!(auto.ambiguous, 1);
        assert_eq!(auto.below_threshold, 1);
        assert_eq!(auto.conflicts, 0);
    }

    /// Bank storage where another writer links every line just before this
    /// engine does
    struct ContendedBank {
        inner: MemoryStorage,
    }

    #[async_trait::async_trait]
    impl BankStorage for ContendedBank {
        async fn insert_bank_account(&mut self, account: &BankAccount) -> LedgerResult<()> {
            self.inner.insert_bank_account(account).await
        }

        async fn get_bank_account(&self, tenant_id: TenantId, id: Uuid) -> LedgerResult<Option<BankAccount>> {
            self.inner.get_bank_account(tenant_id, id).await
        }

        async fn list_bank_accounts(&self, tenant_id: TenantId) -> LedgerResult<Vec<BankAccount>> {
            self.inner.list_bank_accounts(tenant_id).await
        }

        async fn update_bank_account(&mut self, account: &BankAccount) -> LedgerResult<()> {
            self.inner.update_bank_account(account).await
        }

        async fn insert_bank_transactions(&mut self, lines: &[BankTransaction]) -> LedgerResult<Vec<Uuid>> {
            self.inner.insert_bank_transactions(lines).await
        }

        async fn get_bank_transaction(&self, tenant_id: TenantId, id: Uuid) -> LedgerResult<Option<BankTransaction>> {
            self.inner.get_bank_transaction(tenant_id, id).await
        }

        async fn list_bank_transactions(
            &self,
            tenant_id: TenantId,
            filter: &BankTransactionFilter,
        ) -> LedgerResult<Vec<BankTransaction>> {
            self.inner.list_bank_transactions(tenant_id, filter).await
        }

        async fn set_reconciliation(
            &mut self,
            tenant_id: TenantId,
            id: Uuid,
            reconciliation: Reconciliation,
        ) -> LedgerResult<BankTransaction> {
            let rival = Reconciliation {
                target: MatchTarget::Expense(Uuid::new_v4()),
                reconciled_by: Uuid::new_v4(),
                reconciled_at: reconciliation.reconciled_at,
            };
            self.inner.set_reconciliation(tenant_id, id, rival).await?;
            self.inner.set_reconciliation(tenant_id, id, reconciliation).await
        }

        async fn clear_reconciliation(&mut self, tenant_id: TenantId, id: Uuid) -> LedgerResult<BankTransaction> {
            self.inner.clear_reconciliation(tenant_id, id).await
        }

        async fn reconciled_targets(&self, tenant_id: TenantId) -> LedgerResult<Vec<MatchTarget>> {
            self.inner.reconciled_targets(tenant_id).await
        }
    }

    #[tokio::test]
    async fn test_auto_reconcile_counts_lines_taken_by_another_writer() {
        let tenant = Uuid::new_v4();
        let storage = MemoryStorage::new();
        let chart = AccountManager::new(storage.clone())
            .seed_default_chart(tenant)
            .await
            .unwrap();
        let mut engine = ReconciliationEngine::new(
            ContendedBank { inner: storage.clone() },
            storage.clone(),
            &ReconciliationConfig::default(),
        );
        let bank = engine
            .create_bank_account(
                tenant,
                NewBankAccount::new("HDFC", "Operating", "50100012345").linked_to(chart["bank"].id),
            )
            .await
            .unwrap();
        receipt(&storage, tenant, &chart, date(3, 2), "Acme", "1500").await;
        engine
            .import_statement(
                tenant,
                bank.id,
                vec![StatementLine::new(date(3, 2), "NEFT CR", Direction::Credit, amount("1500")).counterparty("Acme")],
            )
            .await
            .unwrap();

        let auto = engine.auto_reconcile(tenant, bank.id, Uuid::new_v4()).await.unwrap();
        assert_eq!(auto.examined, 1);
        assert!(auto.reconciled.is_empty());
        assert_eq!(auto.conflicts, 1);
        assert_eq!(auto.examined, auto.reconciled.len() + auto.below_threshold + auto.ambiguous + auto.conflicts);
    }

    #[tokio::test]
    async fn test_reconciled_transaction_cannot_be_voided() {
        let (tenant, storage, chart, mut engine, bank) = setup(&ReconciliationConfig::default()).await;
        let paid = receipt(&storage, tenant, &chart, date(4, 1), "Acme", "100").await;
        let report = engine
            .import_statement(
                tenant,
                bank.id,
                vec![StatementLine::new(date(4, 1), "NEFT CR ACME", Direction::Credit, amount("100"))],
            )
            .await
            .unwrap();
        let line_id = report.transaction_ids[0];
        engine
            .reconcile_transaction(tenant, line_id, paid.id, Uuid::new_v4())
            .await
            .unwrap();

        let mut transactions = TransactionManager::new(storage.clone());
        let err = transactions
            .void_transaction(tenant, paid.id, Some("entered twice".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::CannotVoid(_)));
        let still_posted = transactions.get_transaction_required(tenant, paid.id).await.unwrap();
        assert_eq!(still_posted.status, TransactionStatus::Posted);
        let bank_balance = storage.get_account_balance(tenant, chart["bank"].id, None).await.unwrap();
        assert_eq!(bank_balance, amount("100"));

        // Unlinking first makes the void legal
        engine.unreconcile(tenant, line_id).await.unwrap();
        let voided = transactions.void_transaction(tenant, paid.id, None).await.unwrap();
        assert_eq!(voided.status, TransactionStatus::Void);
        let summary = engine.reconciliation_summary(tenant, bank.id, date(4, 30)).await.unwrap();
        assert_eq!(summary.unreconciled_count, 1);
    }

    #[tokio::test]
    async fn test_summary_balances_bank_against_ledger() {
        let (tenant, storage, chart, mut engine, bank) = setup(&ReconciliationConfig::default()).await;
        let acme = receipt(&storage, tenant, &chart, date(1, 10), "Acme", "1500").await;
        let report = engine
            .import_statement(
                tenant,
                bank.id,
                vec![StatementLine::new(date(1, 10), "NEFT CR", Direction::Credit, amount("1500.00"))
                    .balance(amount("1500.00"))],
            )
            .await
            .unwrap();

        let before = engine.reconciliation_summary(tenant, bank.id, date(1, 31)).await.unwrap();
        assert_eq!(before.unreconciled_count, 1);
        assert_eq!(before.unreconciled_credits, amount("1500"));
        assert!(!before.is_reconciled);

        engine
            .reconcile_transaction(tenant, report.transaction_ids[0], acme.id, Uuid::new_v4())
            .await
            .unwrap();
        let after = engine.reconciliation_summary(tenant, bank.id, date(1, 31)).await.unwrap();
        assert_eq!(after.bank_balance, amount("1500"));
        assert_eq!(after.ledger_balance, amount("1500"));
        assert_eq!(after.difference, zero());
        assert!(after.is_reconciled);
    }

    #[tokio::test]
    async fn test_open_documents_are_match_targets() {
        let (tenant, _, _, engine, bank) = setup(&ReconciliationConfig::default()).await;
        let documents = MemoryDocuments::new();
        let bill = documents.add_open(tenant, DocumentKind::Bill, "Power Co", date(2, 1), Some(date(2, 15)), amount("240"));
        documents.add_open(tenant, DocumentKind::Invoice, "Power Co", date(2, 1), Some(date(2, 15)), amount("240"));
        let mut engine = engine.with_documents(Arc::new(documents.clone()));

        let report = engine
            .import_statement(
                tenant,
                bank.id,
                vec![StatementLine::new(date(2, 15), "ACH DR POWER CO", Direction::Debit, amount("240"))],
            )
            .await
            .unwrap();
        let line_id = report.transaction_ids[0];

        let suggestions = engine.suggest_matches(tenant, line_id).await.unwrap();
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].target, MatchTarget::Bill(bill));
        assert_eq!(suggestions[0].confidence, 100);

        engine
            .reconcile(tenant, line_id, MatchTarget::Bill(bill), Uuid::new_v4())
            .await
            .unwrap();

        documents.set_failing(true);
        engine.unreconcile(tenant, line_id).await.unwrap();
        let err = engine.suggest_matches(tenant, line_id).await.unwrap_err();
        assert_eq!(err.kind(), "internal");
    }
}
