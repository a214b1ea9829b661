//! Recurring definitions and their audit trail

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use uuid::Uuid;

use crate::recurring::Schedule;
use crate::types::*;
use crate::utils::validation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecurringStatus {
    Active,
    Paused,
    Completed,
    Cancelled,
}

/// What a recurring definition materializes on each occurrence
pub trait RecurringTemplate:
    Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Short label used in logs and tick reports
    const KIND: &'static str;

    /// Shape checks that need no storage access
    fn validate(&self) -> LedgerResult<()>;
}

/// Lines of a recurring journal entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalTemplate {
    pub transaction_type: TransactionType,
    pub description: String,
    pub reference: Option<String>,
    pub party_name: Option<String>,
    pub lines: Vec<TransactionLine>,
}

impl JournalTemplate {
    pub fn new(description: &str, lines: Vec<TransactionLine>) -> Self {
        Self {
            transaction_type: TransactionType::Journal,
            description: description.to_string(),
            reference: None,
            party_name: None,
            lines,
        }
    }
}

impl RecurringTemplate for JournalTemplate {
    const KIND: &'static str = "journal";

    fn validate(&self) -> LedgerResult<()> {
        validation::validate_transaction_description(&self.description)?;
        validation::validate_lines(&self.lines)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceTemplateItem {
    pub description: String,
    pub quantity: BigDecimal,
    pub unit_price: BigDecimal,
    pub tax_code: Option<String>,
}

/// Customer and items of a recurring invoice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceTemplate {
    pub customer_id: Uuid,
    pub customer_name: String,
    pub items: Vec<InvoiceTemplateItem>,
    /// Due date offset from the issue date
    pub payment_terms_days: u32,
    pub notes: Option<String>,
}

impl RecurringTemplate for InvoiceTemplate {
    const KIND: &'static str = "invoice";

    fn validate(&self) -> LedgerResult<()> {
        if self.items.is_empty() {
            return Err(LedgerError::Validation(
                "a recurring invoice needs at least one item".to_string(),
            ));
        }
        for item in &self.items {
            if item.description.trim().is_empty() {
                return Err(LedgerError::Validation(
                    "invoice item description cannot be empty".to_string(),
                ));
            }
            validation::validate_positive_amount(&item.quantity)?;
            validation::validate_non_negative_amount(&item.unit_price)?;
        }
        Ok(())
    }
}

/// A template plus the schedule it is materialized on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringDefinition<T> {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub name: String,
    pub schedule: Schedule,
    pub status: RecurringStatus,
    pub template: T,
    /// Worker holding the generation lease
    pub claimed_by: Option<String>,
    pub claim_expires_at: Option<NaiveDateTime>,
    pub is_deleted: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

pub type RecurringJournal = RecurringDefinition<JournalTemplate>;
pub type RecurringInvoice = RecurringDefinition<InvoiceTemplate>;

impl<T: RecurringTemplate> RecurringDefinition<T> {
    pub fn new(tenant_id: TenantId, name: &str, schedule: Schedule, template: T) -> Self {
        let now = now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            name: name.to_string(),
            schedule,
            status: RecurringStatus::Active,
            template,
            claimed_by: None,
            claim_expires_at: None,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Idempotency key of the n-th occurrence
    pub fn occurrence_key(&self, occurrence_number: u32) -> String {
        format!("recurring:{}:{}", self.id, occurrence_number)
    }

    /// Held by a worker whose lease has not expired
    pub fn is_claimed(&self, now: NaiveDateTime) -> bool {
        self.claimed_by.is_some() && self.claim_expires_at.is_some_and(|until| until > now)
    }

    /// Eligible for generation on `today`, ignoring claims
    pub fn is_due(&self, today: NaiveDate) -> bool {
        self.status == RecurringStatus::Active && !self.is_deleted && self.schedule.is_due(today)
    }
}

/// Document produced by one occurrence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum GeneratedOutput {
    Transaction(Uuid),
    Invoice(Uuid),
}

/// Audit row written for every successful generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedOccurrence {
    pub id: Uuid,
    pub definition_id: Uuid,
    pub tenant_id: TenantId,
    pub occurrence_number: u32,
    pub scheduled_for: NaiveDate,
    pub effective_date: NaiveDate,
    pub generated_at: NaiveDateTime,
    pub output: GeneratedOutput,
}
