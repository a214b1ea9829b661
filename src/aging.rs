//! Receivables and payables aging

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::AgingConfig;
use crate::traits::*;
use crate::types::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgingBucket {
    Current,
    Days1To30,
    Days31To60,
    Days61To90,
    Over90,
}

impl AgingBucket {
    /// Bucket for a document `days_overdue` days past its due date
    pub fn for_days(days_overdue: i64) -> Self {
        match days_overdue {
            i64::MIN..=0 => AgingBucket::Current,
            1..=30 => AgingBucket::Days1To30,
            31..=60 => AgingBucket::Days31To60,
            61..=90 => AgingBucket::Days61To90,
            _ => AgingBucket::Over90,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgingBuckets {
    pub current: BigDecimal,
    pub days_1_30: BigDecimal,
    pub days_31_60: BigDecimal,
    pub days_61_90: BigDecimal,
    pub over_90: BigDecimal,
}

impl Default for AgingBuckets {
    fn default() -> Self {
        Self {
            current: zero(),
            days_1_30: zero(),
            days_31_60: zero(),
            days_61_90: zero(),
            over_90: zero(),
        }
    }
}

impl AgingBuckets {
    fn add(&mut self, bucket: AgingBucket, amount: &BigDecimal) {
        let slot = match bucket {
            AgingBucket::Current => &mut self.current,
            AgingBucket::Days1To30 => &mut self.days_1_30,
            AgingBucket::Days31To60 => &mut self.days_31_60,
            AgingBucket::Days61To90 => &mut self.days_61_90,
            AgingBucket::Over90 => &mut self.over_90,
        };
        *slot += amount;
    }

    pub fn total(&self) -> BigDecimal {
        &self.current + &self.days_1_30 + &self.days_31_60 + &self.days_61_90 + &self.over_90
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartyAging {
    pub party_name: String,
    pub buckets: AgingBuckets,
    pub total: BigDecimal,
    pub document_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgingReport {
    pub as_of: NaiveDate,
    pub kinds: Vec<DocumentKind>,
    pub buckets: AgingBuckets,
    pub total_outstanding: BigDecimal,
    pub overdue_total: BigDecimal,
    pub overdue_count: usize,
    /// Ordered by party name
    pub parties: Vec<PartyAging>,
    /// Natural-sign balance of the control account, when the chart has one
    pub control_account_balance: Option<BigDecimal>,
}

/// Read-only receivables/payables rollups over the document collaborators
pub struct AgingAggregator<S: LedgerStorage> {
    storage: S,
    documents: Arc<dyn DocumentDirectory>,
    config: AgingConfig,
}

impl<S: LedgerStorage> AgingAggregator<S> {
    pub fn new(storage: S, documents: Arc<dyn DocumentDirectory>, config: &AgingConfig) -> Self {
        Self {
            storage,
            documents,
            config: config.clone(),
        }
    }

    /// Open invoices bucketed by days past due
    pub async fn receivables_aging(
        &self,
        tenant_id: TenantId,
        as_of: NaiveDate,
    ) -> LedgerResult<AgingReport> {
        self.aging(
            tenant_id,
            as_of,
            &[DocumentKind::Invoice],
            &self.config.receivables_account_code,
        )
        .await
    }

    /// Open bills and expenses bucketed by days past due
    pub async fn payables_aging(
        &self,
        tenant_id: TenantId,
        as_of: NaiveDate,
    ) -> LedgerResult<AgingReport> {
        self.aging(
            tenant_id,
            as_of,
            &[DocumentKind::Bill, DocumentKind::Expense],
            &self.config.payables_account_code,
        )
        .await
    }

    async fn aging(
        &self,
        tenant_id: TenantId,
        as_of: NaiveDate,
        kinds: &[DocumentKind],
        control_code: &str,
    ) -> LedgerResult<AgingReport> {
        let mut buckets = AgingBuckets::default();
        let mut parties: BTreeMap<String, PartyAging> = BTreeMap::new();
        let mut overdue_total = zero();
        let mut overdue_count = 0;

        for kind in kinds {
            let documents = self.documents.open_documents(tenant_id, *kind).await?;
            for document in documents.iter().filter(|d| d.amount_due > zero()) {
                let due = document.due_date.unwrap_or(document.issue_date);
                let bucket = AgingBucket::for_days((as_of - due).num_days());
                buckets.add(bucket, &document.amount_due);
                if bucket != AgingBucket::Current {
                    overdue_total += &document.amount_due;
                    overdue_count += 1;
                }

                let party = parties
                    .entry(document.party_name.clone())
                    .or_insert_with(|| PartyAging {
                        party_name: document.party_name.clone(),
                        buckets: AgingBuckets::default(),
                        total: zero(),
                        document_count: 0,
                    });
                party.buckets.add(bucket, &document.amount_due);
                party.total += &document.amount_due;
                party.document_count += 1;
            }
        }

        let control_account_balance = self
            .storage
            .find_account_by_code(tenant_id, control_code)
            .await?
            .map(|account| account.natural_balance());

        Ok(AgingReport {
            as_of,
            kinds: kinds.to_vec(),
            total_outstanding: buckets.total(),
            buckets,
            overdue_total,
            overdue_count,
            parties: parties.into_values().collect(),
            control_account_balance,
        })
    }
}
