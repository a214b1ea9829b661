//! Periodic driver for recurring generation

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::recurring::{GeneratedOccurrence, Materializer, RecurringManager, RecurringTemplate};
use crate::traits::RecurringStorage;
use crate::types::{LedgerError, TenantId};

/// A definition that failed during a tick. Its schedule is left untouched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickFailure {
    pub kind: &'static str,
    pub tenant_id: Option<TenantId>,
    pub definition_id: Option<Uuid>,
    pub error_kind: &'static str,
    pub message: String,
}

impl TickFailure {
    pub fn new(
        kind: &'static str,
        definition: Option<(TenantId, Uuid)>,
        error: &LedgerError,
    ) -> Self {
        Self {
            kind,
            tenant_id: definition.map(|(tenant_id, _)| tenant_id),
            definition_id: definition.map(|(_, id)| id),
            error_kind: error.kind(),
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickReport {
    pub generated: Vec<GeneratedOccurrence>,
    /// Definitions moved to completed because they can never run again
    pub expired: usize,
    /// Definitions left alone because another worker holds them
    pub skipped: usize,
    pub failures: Vec<TickFailure>,
}

impl TickReport {
    pub fn merge(&mut self, other: TickReport) {
        self.generated.extend(other.generated);
        self.expired += other.expired;
        self.skipped += other.skipped;
        self.failures.extend(other.failures);
    }
}

/// Something the scheduler can ask to generate everything due
#[async_trait]
pub trait DueRunner: Send + Sync {
    async fn run_due(&mut self, today: NaiveDate, now: NaiveDateTime) -> TickReport;
}

#[async_trait]
impl<T, S, M> DueRunner for RecurringManager<T, S, M>
where
    T: RecurringTemplate,
    S: RecurringStorage<T>,
    M: Materializer<T>,
{
    async fn run_due(&mut self, today: NaiveDate, now: NaiveDateTime) -> TickReport {
        RecurringManager::run_due(self, today, now).await
    }
}

/// Drives every registered recurring manager on a fixed interval
pub struct Scheduler {
    runners: Vec<Box<dyn DueRunner>>,
    tick_interval: Duration,
}

impl Scheduler {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            runners: Vec::new(),
            tick_interval: Duration::from_secs(config.tick_interval_secs.max(1)),
        }
    }

    pub fn register(&mut self, runner: Box<dyn DueRunner>) {
        self.runners.push(runner);
    }

    pub fn with_runner(mut self, runner: Box<dyn DueRunner>) -> Self {
        self.register(runner);
        self
    }

    /// One pass over all runners. Failures are collected, never propagated.
    pub async fn tick(&mut self, today: NaiveDate, now: NaiveDateTime) -> TickReport {
        let mut report = TickReport::default();
        for runner in &mut self.runners {
            report.merge(runner.run_due(today, now).await);
        }
        if !report.generated.is_empty() || !report.failures.is_empty() {
            tracing::info!(
                generated = report.generated.len(),
                expired = report.expired,
                failures = report.failures.len(),
                "scheduler tick finished"
            );
        }
        report
    }

    /// Tick on the configured interval until `shutdown` becomes true or its
    /// sender is dropped
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.tick_interval);
        tracing::info!(interval_secs = self.tick_interval.as_secs(), "scheduler started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = interval.tick() => {
                    let now = chrono::Utc::now().naive_utc();
                    self.tick(now.date(), now).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        tracing::info!("scheduler stopped");
    }
}
