//! Recurring definition lifecycle and occurrence generation

use async_trait::async_trait;
use chrono::{Days, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::ledger::{TransactionBuilder, TransactionManager};
use crate::recurring::{
    Frequency, GeneratedOccurrence, GeneratedOutput, InvoiceTemplate, JournalTemplate,
    RecurringDefinition, RecurringStatus, RecurringTemplate, Schedule, TickFailure, TickReport,
};
use crate::traits::*;
use crate::types::*;

/// Fields accepted by `create` and `update`. `update` replaces all of them,
/// the template included, in one write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringInput<T> {
    pub name: String,
    pub frequency: Frequency,
    pub interval: u32,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub max_occurrences: Option<u32>,
    pub template: T,
}

impl<T> RecurringInput<T> {
    pub fn new(
        name: &str,
        frequency: Frequency,
        interval: u32,
        start_date: NaiveDate,
        template: T,
    ) -> Self {
        Self {
            name: name.to_string(),
            frequency,
            interval,
            start_date,
            end_date: None,
            max_occurrences: None,
            template,
        }
    }

    pub fn until(mut self, end_date: NaiveDate) -> Self {
        self.end_date = Some(end_date);
        self
    }

    pub fn limit(mut self, max_occurrences: u32) -> Self {
        self.max_occurrences = Some(max_occurrences);
        self
    }
}

/// Turns one occurrence of a definition into a ledger transaction or invoice
#[async_trait]
pub trait Materializer<T: RecurringTemplate>: Send + Sync {
    /// Checks that need collaborators, run on create and update
    async fn validate_template(&self, tenant_id: TenantId, template: &T) -> LedgerResult<()>;

    /// Produce the output of occurrence `occurrence_number`. Calling this
    /// again for the same occurrence must return the same output.
    async fn materialize(
        &self,
        definition: &RecurringDefinition<T>,
        occurrence_number: u32,
        effective_date: NaiveDate,
    ) -> LedgerResult<GeneratedOutput>;
}

/// Posts recurring journals through the transaction ledger
#[derive(Clone)]
pub struct JournalMaterializer<S> {
    storage: S,
}

impl<S: LedgerStorage + Clone> JournalMaterializer<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl<S: LedgerStorage + Clone> Materializer<JournalTemplate> for JournalMaterializer<S> {
    async fn validate_template(
        &self,
        tenant_id: TenantId,
        template: &JournalTemplate,
    ) -> LedgerResult<()> {
        template.validate()?;
        for line in &template.lines {
            match self.storage.get_account(tenant_id, line.account_id).await? {
                Some(account) if account.is_postable() => {}
                _ => return Err(LedgerError::AccountNotFound(line.account_id.to_string())),
            }
        }
        Ok(())
    }

    async fn materialize(
        &self,
        definition: &RecurringDefinition<JournalTemplate>,
        occurrence_number: u32,
        effective_date: NaiveDate,
    ) -> LedgerResult<GeneratedOutput> {
        let source_key = definition.occurrence_key(occurrence_number);
        let mut transactions = TransactionManager::new(self.storage.clone());
        if let Some(existing) = transactions
            .find_by_source_key(definition.tenant_id, &source_key)
            .await?
        {
            tracing::debug!(%source_key, number = %existing.number, "occurrence already posted");
            return Ok(GeneratedOutput::Transaction(existing.id));
        }

        let template = &definition.template;
        let mut builder =
            TransactionBuilder::new(template.transaction_type, effective_date, &template.description)
                .source_key(source_key)
                .metadata("recurring_definition_id", definition.id.to_string())
                .metadata("occurrence_number", occurrence_number.to_string());
        if let Some(reference) = &template.reference {
            builder = builder.reference(reference);
        }
        if let Some(party) = &template.party_name {
            builder = builder.party(party);
        }
        for line in &template.lines {
            builder = builder.line(line.clone());
        }

        let transaction = transactions
            .create_transaction(definition.tenant_id, builder.build()?)
            .await?;
        Ok(GeneratedOutput::Transaction(transaction.id))
    }
}

/// Requests recurring invoices from the invoice collaborator
#[derive(Clone)]
pub struct InvoiceMaterializer {
    service: Arc<dyn InvoiceService>,
}

impl InvoiceMaterializer {
    pub fn new(service: Arc<dyn InvoiceService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Materializer<InvoiceTemplate> for InvoiceMaterializer {
    async fn validate_template(
        &self,
        _tenant_id: TenantId,
        template: &InvoiceTemplate,
    ) -> LedgerResult<()> {
        template.validate()
    }

    async fn materialize(
        &self,
        definition: &RecurringDefinition<InvoiceTemplate>,
        occurrence_number: u32,
        effective_date: NaiveDate,
    ) -> LedgerResult<GeneratedOutput> {
        let template = &definition.template;
        let due_date = effective_date
            .checked_add_days(Days::new(u64::from(template.payment_terms_days)))
            .ok_or_else(|| {
                LedgerError::Validation(format!(
                    "payment terms of {} days overflow the calendar",
                    template.payment_terms_days
                ))
            })?;
        let draft = InvoiceDraft {
            tenant_id: definition.tenant_id,
            customer_id: template.customer_id,
            customer_name: template.customer_name.clone(),
            issue_date: effective_date,
            due_date,
            items: template
                .items
                .iter()
                .map(|item| InvoiceDraftItem {
                    description: item.description.clone(),
                    quantity: item.quantity.clone(),
                    unit_price: item.unit_price.clone(),
                    tax_code: item.tax_code.clone(),
                })
                .collect(),
            notes: template.notes.clone(),
            idempotency_key: definition.occurrence_key(occurrence_number),
        };

        let invoice_id = self.service.create_invoice(&draft).await?;
        Ok(GeneratedOutput::Invoice(invoice_id))
    }
}

/// Manages recurring definitions of one template kind and generates their
/// occurrences.
///
/// Each manager identifies itself with a worker id. Generation claims the
/// definition under that id first, so several managers over the same storage
/// never produce the same occurrence twice.
pub struct RecurringManager<T, S, M> {
    storage: S,
    materializer: M,
    worker_id: String,
    claim_lease: chrono::Duration,
    max_catch_up: u32,
    _template: PhantomData<fn() -> T>,
}

impl<T, S, M> RecurringManager<T, S, M>
where
    T: RecurringTemplate,
    S: RecurringStorage<T>,
    M: Materializer<T>,
{
    pub fn new(storage: S, materializer: M, config: &SchedulerConfig) -> Self {
        Self {
            storage,
            materializer,
            worker_id: format!("worker-{}", Uuid::new_v4()),
            claim_lease: chrono::Duration::seconds(config.claim_lease_secs),
            max_catch_up: config.max_catch_up,
            _template: PhantomData,
        }
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub async fn create(
        &mut self,
        tenant_id: TenantId,
        input: RecurringInput<T>,
    ) -> LedgerResult<RecurringDefinition<T>> {
        validate_name(&input.name)?;
        let mut schedule = Schedule::new(input.frequency, input.interval, input.start_date);
        schedule.end_date = input.end_date;
        schedule.max_occurrences = input.max_occurrences;
        schedule.validate()?;
        input.template.validate()?;
        self.materializer
            .validate_template(tenant_id, &input.template)
            .await?;

        let definition = RecurringDefinition::new(tenant_id, &input.name, schedule, input.template);
        self.storage.insert_definition(&definition).await?;
        tracing::info!(
            tenant = %tenant_id,
            kind = T::KIND,
            id = %definition.id,
            next_run = %definition.schedule.next_run_date,
            "recurring definition created"
        );
        Ok(definition)
    }

    pub async fn get(
        &self,
        tenant_id: TenantId,
        definition_id: Uuid,
    ) -> LedgerResult<Option<RecurringDefinition<T>>> {
        Ok(self
            .storage
            .get_definition(tenant_id, definition_id)
            .await?
            .filter(|d| !d.is_deleted))
    }

    pub async fn get_required(
        &self,
        tenant_id: TenantId,
        definition_id: Uuid,
    ) -> LedgerResult<RecurringDefinition<T>> {
        self.get(tenant_id, definition_id)
            .await?
            .ok_or_else(|| LedgerError::RecurringDefinitionNotFound(definition_id.to_string()))
    }

    pub async fn list(
        &self,
        tenant_id: TenantId,
        status: Option<RecurringStatus>,
        page: PageRequest,
    ) -> LedgerResult<Page<RecurringDefinition<T>>> {
        let all = self.storage.list_definitions(tenant_id, status).await?;
        Ok(Page::from_vec(all, page))
    }

    /// Replace name, schedule and template. Generation history is kept: the
    /// occurrence count carries over and the next run date is recomputed
    /// from the new anchor when the timing changed.
    pub async fn update(
        &mut self,
        tenant_id: TenantId,
        definition_id: Uuid,
        input: RecurringInput<T>,
    ) -> LedgerResult<RecurringDefinition<T>> {
        let current = self.get_required(tenant_id, definition_id).await?;
        if matches!(
            current.status,
            RecurringStatus::Completed | RecurringStatus::Cancelled
        ) {
            return Err(LedgerError::CannotModify(format!(
                "recurring definition {} is {:?}",
                current.name, current.status
            )));
        }
        validate_name(&input.name)?;
        input.template.validate()?;
        self.materializer
            .validate_template(tenant_id, &input.template)
            .await?;

        let previous = &current.schedule;
        let mut schedule = Schedule {
            frequency: input.frequency,
            interval: input.interval,
            start_date: input.start_date,
            next_run_date: input.start_date,
            end_date: input.end_date,
            max_occurrences: input.max_occurrences,
            occurrence_count: previous.occurrence_count,
            last_run_date: previous.last_run_date,
            last_scheduled_date: previous.last_scheduled_date,
        };
        let timing_changed = previous.frequency != schedule.frequency
            || previous.interval != schedule.interval
            || previous.start_date != schedule.start_date;
        if !timing_changed {
            schedule.next_run_date = previous.next_run_date;
        } else if let Some(covered) = previous.last_scheduled_date.max(previous.last_run_date) {
            // Slots up to the latest generated one are already covered, even
            // when that output was produced early. An invalid interval is
            // reported by validate below.
            if schedule.interval > 0 {
                schedule.next_run_date = schedule.next_after(covered)?;
            }
        }
        schedule.validate()?;
        if schedule
            .max_occurrences
            .is_some_and(|max| max <= schedule.occurrence_count)
        {
            return Err(LedgerError::InvalidRecurrence(format!(
                "{} occurrences were already generated",
                schedule.occurrence_count
            )));
        }

        let now = now();
        let updated = RecurringDefinition {
            name: input.name,
            schedule,
            template: input.template,
            updated_at: now,
            ..current
        };
        self.storage.replace_definition(&updated, now).await?;
        tracing::info!(tenant = %tenant_id, kind = T::KIND, id = %definition_id, "recurring definition updated");
        Ok(updated)
    }

    /// Tombstone a definition; it is cancelled and hidden from lists
    pub async fn delete(&mut self, tenant_id: TenantId, definition_id: Uuid) -> LedgerResult<()> {
        let mut definition = self.get_required(tenant_id, definition_id).await?;
        definition.is_deleted = true;
        definition.status = RecurringStatus::Cancelled;
        definition.updated_at = now();
        self.storage
            .replace_definition(&definition, definition.updated_at)
            .await?;
        tracing::info!(tenant = %tenant_id, kind = T::KIND, id = %definition_id, "recurring definition deleted");
        Ok(())
    }

    pub async fn pause(
        &mut self,
        tenant_id: TenantId,
        definition_id: Uuid,
    ) -> LedgerResult<RecurringDefinition<T>> {
        self.transition(
            tenant_id,
            definition_id,
            &[RecurringStatus::Active],
            RecurringStatus::Paused,
        )
        .await
    }

    pub async fn resume(
        &mut self,
        tenant_id: TenantId,
        definition_id: Uuid,
    ) -> LedgerResult<RecurringDefinition<T>> {
        self.transition(
            tenant_id,
            definition_id,
            &[RecurringStatus::Paused],
            RecurringStatus::Active,
        )
        .await
    }

    pub async fn cancel(
        &mut self,
        tenant_id: TenantId,
        definition_id: Uuid,
    ) -> LedgerResult<RecurringDefinition<T>> {
        self.transition(
            tenant_id,
            definition_id,
            &[RecurringStatus::Active, RecurringStatus::Paused],
            RecurringStatus::Cancelled,
        )
        .await
    }

    /// Generate the next occurrence immediately, whether or not it is due.
    /// The output is dated `min(today, next_run_date)`.
    pub async fn generate_now(
        &mut self,
        tenant_id: TenantId,
        definition_id: Uuid,
        today: NaiveDate,
    ) -> LedgerResult<GeneratedOccurrence> {
        self.get_required(tenant_id, definition_id).await?;
        self.generate(tenant_id, definition_id, today, now(), false)
            .await?
            .ok_or_else(|| {
                LedgerError::CannotModify(format!(
                    "recurring definition {} has no pending occurrence",
                    definition_id
                ))
            })
    }

    /// Generated occurrences, by occurrence number
    pub async fn history(
        &self,
        tenant_id: TenantId,
        definition_id: Uuid,
    ) -> LedgerResult<Vec<GeneratedOccurrence>> {
        self.get_required(tenant_id, definition_id).await?;
        self.storage.list_occurrences(tenant_id, definition_id).await
    }

    /// Mark active definitions that can never run again as completed
    pub async fn expire_lapsed(
        &mut self,
        today: NaiveDate,
        now: NaiveDateTime,
    ) -> LedgerResult<usize> {
        let mut expired = 0;
        for mut definition in self.storage.lapsed_definitions(today).await? {
            if definition.is_claimed(now) {
                continue;
            }
            definition.status = RecurringStatus::Completed;
            definition.updated_at = now;
            match self.storage.replace_definition(&definition, now).await {
                Ok(()) => {
                    expired += 1;
                    tracing::info!(
                        tenant = %definition.tenant_id,
                        kind = T::KIND,
                        id = %definition.id,
                        "recurring definition completed"
                    );
                }
                Err(LedgerError::Conflict(reason)) => {
                    tracing::debug!(id = %definition.id, %reason, "expiry skipped");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(expired)
    }

    /// One scheduler pass for this kind: expire lapsed definitions, then
    /// generate every due definition up to the catch-up limit
    pub async fn run_due(&mut self, today: NaiveDate, now: NaiveDateTime) -> TickReport {
        let mut report = TickReport::default();

        match self.expire_lapsed(today, now).await {
            Ok(expired) => report.expired += expired,
            Err(err) => report.failures.push(TickFailure::new(T::KIND, None, &err)),
        }

        let due = match self.storage.due_definitions(today, now).await {
            Ok(due) => due,
            Err(err) => {
                tracing::warn!(kind = T::KIND, error = %err, "loading due definitions failed");
                report.failures.push(TickFailure::new(T::KIND, None, &err));
                return report;
            }
        };

        for definition in due {
            for _ in 0..self.max_catch_up {
                match self
                    .generate(definition.tenant_id, definition.id, today, now, true)
                    .await
                {
                    Ok(Some(occurrence)) => report.generated.push(occurrence),
                    Ok(None) => break,
                    Err(LedgerError::Conflict(reason)) => {
                        tracing::debug!(id = %definition.id, %reason, "definition held by another worker");
                        report.skipped += 1;
                        break;
                    }
                    Err(err) => {
                        tracing::warn!(
                            tenant = %definition.tenant_id,
                            kind = T::KIND,
                            id = %definition.id,
                            error = %err,
                            "recurring generation failed"
                        );
                        report.failures.push(TickFailure::new(
                            T::KIND,
                            Some((definition.tenant_id, definition.id)),
                            &err,
                        ));
                        break;
                    }
                }
            }
        }

        report
    }

    async fn transition(
        &mut self,
        tenant_id: TenantId,
        definition_id: Uuid,
        allowed_from: &[RecurringStatus],
        to: RecurringStatus,
    ) -> LedgerResult<RecurringDefinition<T>> {
        let mut definition = self.get_required(tenant_id, definition_id).await?;
        if !allowed_from.contains(&definition.status) {
            return Err(LedgerError::CannotModify(format!(
                "recurring definition {} cannot go from {:?} to {:?}",
                definition.name, definition.status, to
            )));
        }
        definition.status = to;
        definition.updated_at = now();
        self.storage
            .replace_definition(&definition, definition.updated_at)
            .await?;
        tracing::info!(tenant = %tenant_id, kind = T::KIND, id = %definition_id, status = ?to, "recurring status changed");
        Ok(definition)
    }

    /// Claim, materialize, then record the occurrence. `Ok(None)` means the
    /// definition was not due once claimed. The claim is released on failure.
    async fn generate(
        &mut self,
        tenant_id: TenantId,
        definition_id: Uuid,
        today: NaiveDate,
        now: NaiveDateTime,
        require_due: bool,
    ) -> LedgerResult<Option<GeneratedOccurrence>> {
        let lease_until = now + self.claim_lease;
        let claimed = self
            .storage
            .claim_definition(tenant_id, definition_id, &self.worker_id, now, lease_until)
            .await?
            .ok_or_else(|| {
                LedgerError::Conflict(format!(
                    "recurring definition {} is claimed by another worker",
                    definition_id
                ))
            })?;

        let result = self.generate_claimed(&claimed, today, now, require_due).await;
        if !matches!(result, Ok(Some(_))) {
            if let Err(err) = self
                .storage
                .release_claim(tenant_id, definition_id, &self.worker_id)
                .await
            {
                tracing::warn!(id = %definition_id, error = %err, "releasing claim failed");
            }
        }
        result
    }

    async fn generate_claimed(
        &mut self,
        claimed: &RecurringDefinition<T>,
        today: NaiveDate,
        now: NaiveDateTime,
        require_due: bool,
    ) -> LedgerResult<Option<GeneratedOccurrence>> {
        if require_due && !claimed.is_due(today) {
            return Ok(None);
        }
        if claimed.status != RecurringStatus::Active {
            return Err(LedgerError::CannotModify(format!(
                "recurring definition {} is {:?}",
                claimed.name, claimed.status
            )));
        }
        if claimed.schedule.is_exhausted() {
            return Ok(None);
        }

        let expected_count = claimed.schedule.occurrence_count;
        let occurrence_number = expected_count + 1;
        let scheduled_for = claimed.schedule.next_run_date;
        let effective_date = today.min(scheduled_for);

        let mut updated = claimed.clone();
        updated.schedule.advance(effective_date)?;
        if updated.schedule.is_exhausted() {
            updated.status = RecurringStatus::Completed;
        }
        updated.claimed_by = None;
        updated.claim_expires_at = None;
        updated.updated_at = now;

        let output = self
            .materializer
            .materialize(claimed, occurrence_number, effective_date)
            .await?;
        let occurrence = GeneratedOccurrence {
            id: Uuid::new_v4(),
            definition_id: claimed.id,
            tenant_id: claimed.tenant_id,
            occurrence_number,
            scheduled_for,
            effective_date,
            generated_at: now,
            output,
        };

        self.storage
            .complete_generation(&self.worker_id, expected_count, &updated, &occurrence)
            .await?;
        tracing::info!(
            tenant = %claimed.tenant_id,
            kind = T::KIND,
            id = %claimed.id,
            occurrence = occurrence_number,
            effective = %effective_date,
            next_run = %updated.schedule.next_run_date,
            status = ?updated.status,
            "recurring occurrence generated"
        );
        Ok(Some(occurrence))
    }
}

fn validate_name(name: &str) -> LedgerResult<()> {
    if name.trim().is_empty() {
        return Err(LedgerError::Validation(
            "recurring definition name cannot be empty".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{AccountManager, TransactionFilter};
    use crate::recurring::InvoiceTemplateItem;
    use crate::utils::memory_documents::MemoryDocuments;
    use crate::utils::memory_storage::MemoryStorage;
    use bigdecimal::BigDecimal;
    use std::collections::HashMap;

    type JournalManager = RecurringManager<JournalTemplate, MemoryStorage, JournalMaterializer<MemoryStorage>>;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn wall_clock() -> NaiveDateTime {
        chrono::Utc::now().naive_utc()
    }

    async fn setup(config: &SchedulerConfig) -> (TenantId, MemoryStorage, HashMap<String, Account>, JournalManager) {
        let tenant = Uuid::new_v4();
        let storage = MemoryStorage::new();
        let chart = AccountManager::new(storage.clone())
            .seed_default_chart(tenant)
            .await
            .unwrap();
        let manager = RecurringManager::new(
            storage.clone(),
            JournalMaterializer::new(storage.clone()),
            config,
        );
        (tenant, storage, chart, manager)
    }

    fn rent(chart: &HashMap<String, Account>) -> JournalTemplate {
        JournalTemplate::new(
            "Office rent",
            vec![
                TransactionLine::debit(chart["rent_expense"].id, BigDecimal::from(1200), None),
                TransactionLine::credit(chart["bank"].id, BigDecimal::from(1200), None),
            ],
        )
    }

    #[tokio::test]
    async fn test_create_rejects_bad_schedule_and_unknown_accounts() {
        let (tenant, _, chart, mut manager) = setup(&SchedulerConfig::default()).await;

        let zero_interval = RecurringInput::new("Rent", Frequency::Monthly, 0, date(2026, 1, 1), rent(&chart));
        let err = manager.create(tenant, zero_interval).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidRecurrence(_)));

        let ends_early = RecurringInput::new("Rent", Frequency::Monthly, 1, date(2026, 3, 1), rent(&chart))
            .until(date(2026, 2, 1));
        let err = manager.create(tenant, ends_early).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidRecurrence(_)));

        let mut template = rent(&chart);
        template.lines[1].account_id = Uuid::new_v4();
        let unknown = RecurringInput::new("Rent", Frequency::Monthly, 1, date(2026, 1, 1), template);
        let err = manager.create(tenant, unknown).await.unwrap_err();
        assert!(matches!(err, LedgerError::AccountNotFound(_)));
    }

    #[tokio::test]
    async fn test_catch_up_posts_each_missed_month_end() {
        let (tenant, storage, chart, mut manager) = setup(&SchedulerConfig::default()).await;
        let definition = manager
            .create(
                tenant,
                RecurringInput::new("Rent", Frequency::Monthly, 1, date(2026, 1, 31), rent(&chart)),
            )
            .await
            .unwrap();

        let report = manager.run_due(date(2026, 4, 15), wall_clock()).await;
        assert!(report.failures.is_empty());
        let effective: Vec<NaiveDate> = report.generated.iter().map(|o| o.effective_date).collect();
        assert_eq!(effective, vec![date(2026, 1, 31), date(2026, 2, 28), date(2026, 3, 31)]);

        let stored = manager.get_required(tenant, definition.id).await.unwrap();
        assert_eq!(stored.schedule.occurrence_count, 3);
        assert_eq!(stored.schedule.next_run_date, date(2026, 4, 30));
        assert_eq!(stored.claimed_by, None);

        let history = manager.history(tenant, definition.id).await.unwrap();
        let numbers: Vec<u32> = history.iter().map(|o| o.occurrence_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);

        let posted = TransactionManager::new(storage.clone())
            .list_transactions(tenant, &TransactionFilter::default(), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(posted.total, 3);
        let bank = storage.get_account_balance(tenant, chart["bank"].id, None).await.unwrap();
        assert_eq!(bank, BigDecimal::from(-3600));

        // Nothing left to do on the same day
        let again = manager.run_due(date(2026, 4, 15), wall_clock()).await;
        assert!(again.generated.is_empty());
    }

    #[tokio::test]
    async fn test_catch_up_is_bounded_per_tick() {
        let config = SchedulerConfig {
            max_catch_up: 2,
            ..SchedulerConfig::default()
        };
        let (tenant, _, chart, mut manager) = setup(&config).await;
        manager
            .create(
                tenant,
                RecurringInput::new("Rent", Frequency::Weekly, 1, date(2026, 1, 1), rent(&chart)),
            )
            .await
            .unwrap();

        let first = manager.run_due(date(2026, 3, 1), wall_clock()).await;
        assert_eq!(first.generated.len(), 2);
        let second = manager.run_due(date(2026, 3, 1), wall_clock()).await;
        assert_eq!(second.generated.len(), 2);
        assert_eq!(second.generated[0].occurrence_number, 3);
    }

    #[tokio::test]
    async fn test_occurrence_limit_completes_definition() {
        let (tenant, _, chart, mut manager) = setup(&SchedulerConfig::default()).await;
        let definition = manager
            .create(
                tenant,
                RecurringInput::new("Rent", Frequency::Monthly, 1, date(2026, 1, 1), rent(&chart)).limit(2),
            )
            .await
            .unwrap();

        let report = manager.run_due(date(2026, 6, 1), wall_clock()).await;
        assert_eq!(report.generated.len(), 2);

        let stored = manager.get_required(tenant, definition.id).await.unwrap();
        assert_eq!(stored.status, RecurringStatus::Completed);
        let err = manager.generate_now(tenant, definition.id, date(2026, 6, 1)).await.unwrap_err();
        assert!(matches!(err, LedgerError::CannotModify(_)));
    }

    #[tokio::test]
    async fn test_lapsed_definition_expires() {
        let (tenant, _, chart, mut manager) = setup(&SchedulerConfig::default()).await;
        let definition = manager
            .create(
                tenant,
                RecurringInput::new("Rent", Frequency::Monthly, 1, date(2026, 1, 1), rent(&chart))
                    .until(date(2026, 1, 31)),
            )
            .await
            .unwrap();

        let report = manager.run_due(date(2026, 3, 1), wall_clock()).await;
        assert_eq!(report.expired, 1);
        assert!(report.generated.is_empty());
        let stored = manager.get_required(tenant, definition.id).await.unwrap();
        assert_eq!(stored.status, RecurringStatus::Completed);
    }

    #[tokio::test]
    async fn test_pause_resume_and_cancel() {
        let (tenant, _, chart, mut manager) = setup(&SchedulerConfig::default()).await;
        let definition = manager
            .create(
                tenant,
                RecurringInput::new("Rent", Frequency::Monthly, 1, date(2026, 1, 1), rent(&chart)),
            )
            .await
            .unwrap();

        manager.pause(tenant, definition.id).await.unwrap();
        let paused = manager.run_due(date(2026, 1, 10), wall_clock()).await;
        assert!(paused.generated.is_empty());
        let err = manager.generate_now(tenant, definition.id, date(2026, 1, 10)).await.unwrap_err();
        assert!(matches!(err, LedgerError::CannotModify(_)));

        manager.resume(tenant, definition.id).await.unwrap();
        let resumed = manager.run_due(date(2026, 1, 10), wall_clock()).await;
        assert_eq!(resumed.generated.len(), 1);

        manager.cancel(tenant, definition.id).await.unwrap();
        let err = manager.resume(tenant, definition.id).await.unwrap_err();
        assert!(matches!(err, LedgerError::CannotModify(_)));
        let err = manager.cancel(tenant, definition.id).await.unwrap_err();
        assert!(matches!(err, LedgerError::CannotModify(_)));
    }

    #[tokio::test]
    async fn test_generate_now_ahead_of_schedule() {
        let (tenant, _, chart, mut manager) = setup(&SchedulerConfig::default()).await;
        let definition = manager
            .create(
                tenant,
                RecurringInput::new("Rent", Frequency::Monthly, 1, date(2026, 5, 1), rent(&chart)),
            )
            .await
            .unwrap();

        let occurrence = manager
            .generate_now(tenant, definition.id, date(2026, 4, 20))
            .await
            .unwrap();
        assert_eq!(occurrence.scheduled_for, date(2026, 5, 1));
        assert_eq!(occurrence.effective_date, date(2026, 4, 20));

        let stored = manager.get_required(tenant, definition.id).await.unwrap();
        assert_eq!(stored.schedule.next_run_date, date(2026, 6, 1));
        assert_eq!(stored.schedule.last_run_date, Some(date(2026, 4, 20)));
    }

    #[tokio::test]
    async fn test_update_keeps_history_and_refuses_finished_definitions() {
        let (tenant, _, chart, mut manager) = setup(&SchedulerConfig::default()).await;
        let definition = manager
            .create(
                tenant,
                RecurringInput::new("Rent", Frequency::Monthly, 1, date(2026, 1, 15), rent(&chart)),
            )
            .await
            .unwrap();
        manager.run_due(date(2026, 2, 20), wall_clock()).await;

        let mut template = rent(&chart);
        template.lines[0].debit = BigDecimal::from(1500);
        template.lines[1].credit = BigDecimal::from(1500);
        let updated = manager
            .update(
                tenant,
                definition.id,
                RecurringInput::new("Rent (revised)", Frequency::Monthly, 1, date(2026, 1, 15), template),
            )
            .await
            .unwrap();
        assert_eq!(updated.schedule.occurrence_count, 2);
        assert_eq!(updated.schedule.next_run_date, date(2026, 3, 15));
        assert_eq!(updated.template.lines[0].debit, BigDecimal::from(1500));

        let err = manager
            .update(
                tenant,
                definition.id,
                RecurringInput::new("Rent", Frequency::Monthly, 1, date(2026, 1, 15), rent(&chart)).limit(2),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidRecurrence(_)));

        manager.cancel(tenant, definition.id).await.unwrap();
        let err = manager
            .update(
                tenant,
                definition.id,
                RecurringInput::new("Rent", Frequency::Monthly, 1, date(2026, 1, 15), rent(&chart)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::CannotModify(_)));
    }

    #[tokio::test]
    async fn test_update_after_early_generation_does_not_repeat_the_slot() {
        let (tenant, storage, chart, mut manager) = setup(&SchedulerConfig::default()).await;
        let definition = manager
            .create(
                tenant,
                RecurringInput::new("Rent", Frequency::Monthly, 1, date(2026, 5, 1), rent(&chart)),
            )
            .await
            .unwrap();
        let early = manager
            .generate_now(tenant, definition.id, date(2026, 4, 20))
            .await
            .unwrap();
        assert_eq!(early.scheduled_for, date(2026, 5, 1));

        let updated = manager
            .update(
                tenant,
                definition.id,
                RecurringInput::new("Rent", Frequency::Monthly, 2, date(2026, 5, 1), rent(&chart)),
            )
            .await
            .unwrap();
        assert_eq!(updated.schedule.occurrence_count, 1);
        assert_eq!(updated.schedule.next_run_date, date(2026, 7, 1));

        let report = manager.run_due(date(2026, 5, 1), wall_clock()).await;
        assert!(report.generated.is_empty());
        let report = manager.run_due(date(2026, 7, 1), wall_clock()).await;
        assert_eq!(report.generated.len(), 1);
        assert_eq!(report.generated[0].scheduled_for, date(2026, 7, 1));

        let history = manager.history(tenant, definition.id).await.unwrap();
        let slots: Vec<NaiveDate> = history.iter().map(|o| o.scheduled_for).collect();
        assert_eq!(slots, vec![date(2026, 5, 1), date(2026, 7, 1)]);
        let bank = storage.get_account_balance(tenant, chart["bank"].id, None).await.unwrap();
        assert_eq!(bank, BigDecimal::from(-2400));
    }

    #[tokio::test]
    async fn test_deleted_definition_is_hidden() {
        let (tenant, _, chart, mut manager) = setup(&SchedulerConfig::default()).await;
        let definition = manager
            .create(
                tenant,
                RecurringInput::new("Rent", Frequency::Monthly, 1, date(2026, 1, 1), rent(&chart)),
            )
            .await
            .unwrap();
        manager.delete(tenant, definition.id).await.unwrap();

        assert!(manager.get(tenant, definition.id).await.unwrap().is_none());
        let page = manager.list(tenant, None, PageRequest::default()).await.unwrap();
        assert_eq!(page.total, 0);
        assert!(manager.run_due(date(2026, 2, 1), wall_clock()).await.generated.is_empty());
    }

    #[tokio::test]
    async fn test_live_claim_blocks_other_workers_until_it_expires() {
        let (tenant, mut storage, chart, manager) = setup(&SchedulerConfig::default()).await;
        let mut manager = manager.with_worker_id("worker-b");
        let definition = manager
            .create(
                tenant,
                RecurringInput::new("Rent", Frequency::Monthly, 1, date(2026, 1, 1), rent(&chart)),
            )
            .await
            .unwrap();

        let claimed_at = wall_clock();
        let held = RecurringStorage::<JournalTemplate>::claim_definition(
            &mut storage,
            tenant,
            definition.id,
            "worker-a",
            claimed_at,
            claimed_at + chrono::Duration::minutes(10),
        )
        .await
        .unwrap();
        assert!(held.is_some());

        let err = manager.generate_now(tenant, definition.id, date(2026, 1, 1)).await.unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)));
        assert!(manager.run_due(date(2026, 1, 1), claimed_at).await.generated.is_empty());

        let later = claimed_at + chrono::Duration::hours(1);
        let report = manager.run_due(date(2026, 1, 1), later).await;
        assert_eq!(report.generated.len(), 1);
        let stored = manager.get_required(tenant, definition.id).await.unwrap();
        assert_eq!(stored.claimed_by, None);
    }

    #[tokio::test]
    async fn test_recurring_invoice_uses_payment_terms_and_survives_collaborator_outage() {
        let tenant = Uuid::new_v4();
        let documents = Arc::new(MemoryDocuments::new());
        let mut manager: RecurringManager<InvoiceTemplate, _, _> = RecurringManager::new(
            MemoryStorage::new(),
            InvoiceMaterializer::new(documents.clone()),
            &SchedulerConfig::default(),
        );
        let template = InvoiceTemplate {
            customer_id: Uuid::new_v4(),
            customer_name: "Acme".to_string(),
            items: vec![InvoiceTemplateItem {
                description: "Support retainer".to_string(),
                quantity: BigDecimal::from(1),
                unit_price: BigDecimal::from(900),
                tax_code: None,
            }],
            payment_terms_days: 15,
            notes: None,
        };
        let definition = manager
            .create(
                tenant,
                RecurringInput::new("Retainer", Frequency::Monthly, 1, date(2026, 3, 1), template),
            )
            .await
            .unwrap();

        documents.set_failing(true);
        let failed = manager.run_due(date(2026, 3, 1), wall_clock()).await;
        assert_eq!(failed.failures.len(), 1);
        assert_eq!(failed.failures[0].definition_id, Some(definition.id));
        let untouched = manager.get_required(tenant, definition.id).await.unwrap();
        assert_eq!(untouched.schedule.occurrence_count, 0);
        assert_eq!(untouched.claimed_by, None);

        documents.set_failing(false);
        let report = manager.run_due(date(2026, 3, 1), wall_clock()).await;
        assert_eq!(report.generated.len(), 1);
        let invoices = documents.created_invoices();
        assert_eq!(invoices.len(), 1);
        assert_eq!(report.generated[0].output, GeneratedOutput::Invoice(invoices[0].0));
        assert_eq!(invoices[0].1.due_date, date(2026, 3, 16));
        assert_eq!(invoices[0].1.idempotency_key, definition.occurrence_key(1));
    }
}
