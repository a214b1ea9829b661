//! End-to-end tour: seed a chart, post entries, run the recurring scheduler,
//! reconcile a bank statement and print receivables aging.
//!
//! Run with `cargo run --example ledger_walkthrough`.

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use general_ledger::{
    init_tracing, patterns, AgingAggregator, Direction, DocumentKind, EngineConfig, Frequency,
    JournalMaterializer, JournalTemplate, Ledger, LedgerResult, MemoryDocuments, MemoryStorage,
    NewBankAccount, QuickEntry, ReconciliationEngine, RecurringInput, RecurringManager, Scheduler,
    StatementLine, TransactionLine,
};
use std::sync::Arc;
use uuid::Uuid;

#[tokio::main]
async fn main() -> LedgerResult<()> {
    init_tracing();
    let config = EngineConfig::from_env()?;
    let tenant = Uuid::new_v4();
    let storage = MemoryStorage::new();
    let documents = MemoryDocuments::new();
    let day = |m: u32, d: u32| NaiveDate::from_ymd_opt(2026, m, d).unwrap_or_default();

    let mut ledger = Ledger::with_config(storage.clone(), &config);
    let chart = ledger.seed_default_chart(tenant).await?;

    let sale = ledger
        .quick_sale(tenant, QuickEntry::new(day(1, 3), BigDecimal::from(2400), "Workshop seats"))
        .await?;
    println!("posted {} for {}", sale.number, sale.total_amount);

    let receipt = ledger
        .create_transaction(
            tenant,
            patterns::receipt(
                day(1, 8),
                "Acme settles INV-0001",
                chart["bank"].id,
                chart["accounts_receivable"].id,
                BigDecimal::from(1800),
            )?,
        )
        .await?;

    // Monthly rent, caught up by a single scheduler tick
    let mut rent: RecurringManager<JournalTemplate, _, _> = RecurringManager::new(
        storage.clone(),
        JournalMaterializer::new(storage.clone()),
        &config.scheduler,
    );
    rent.create(
        tenant,
        RecurringInput::new(
            "Office rent",
            Frequency::Monthly,
            1,
            day(1, 31),
            JournalTemplate::new(
                "Office rent",
                vec![
                    TransactionLine::debit(chart["rent_expense"].id, BigDecimal::from(900), None),
                    TransactionLine::credit(chart["bank"].id, BigDecimal::from(900), None),
                ],
            ),
        ),
    )
    .await?;
    let mut scheduler = Scheduler::new(&config.scheduler).with_runner(Box::new(rent));
    let tick = scheduler.tick(day(3, 31), chrono::Utc::now().naive_utc()).await;
    for occurrence in &tick.generated {
        println!("rent occurrence {} on {}", occurrence.occurrence_number, occurrence.effective_date);
    }

    // Bank statement with one matching receipt and one unexplained fee
    let mut reconciliation =
        ReconciliationEngine::new(storage.clone(), storage.clone(), &config.reconciliation)
            .with_documents(Arc::new(documents.clone()));
    let bank = reconciliation
        .create_bank_account(
            tenant,
            NewBankAccount::new("HDFC", "Operating", "50100012345").linked_to(chart["bank"].id),
        )
        .await?;
    reconciliation
        .import_statement(
            tenant,
            bank.id,
            vec![
                StatementLine::new(day(1, 8), "NEFT CR ACME", Direction::Credit, BigDecimal::from(1800))
                    .reference("INV-0001"),
                StatementLine::new(day(1, 9), "SMS CHARGES", Direction::Debit, BigDecimal::from(15)),
            ],
        )
        .await?;
    let auto = reconciliation.auto_reconcile(tenant, bank.id, Uuid::new_v4()).await?;
    println!(
        "auto-reconciled {} of {} lines (receipt {})",
        auto.reconciled.len(),
        auto.examined,
        receipt.number
    );
    let summary = reconciliation
        .reconciliation_summary(tenant, bank.id, day(1, 31))
        .await?;
    println!(
        "bank {} vs ledger {}: {} unreconciled",
        summary.bank_balance, summary.ledger_balance, summary.unreconciled_count
    );

    documents.add_open(
        tenant,
        DocumentKind::Invoice,
        "Globex",
        day(1, 10),
        Some(day(2, 9)),
        BigDecimal::from(650),
    );
    documents.add_open(
        tenant,
        DocumentKind::Invoice,
        "Initech",
        day(1, 20),
        Some(day(1, 30)),
        BigDecimal::from(1200),
    );
    let aging = AgingAggregator::new(storage.clone(), Arc::new(documents), &config.aging)
        .receivables_aging(tenant, day(3, 31))
        .await?;
    for party in &aging.parties {
        println!("{:<10} {:>10}", party.party_name, party.total);
    }

    let trial = ledger.trial_balance(tenant, day(3, 31)).await?;
    println!(
        "trial balance: debits {} credits {} balanced={}",
        trial.total_debits, trial.total_credits, trial.is_balanced
    );
    Ok(())
}
