//! Bank accounts and imported statement lines

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BankAccountType {
    Savings,
    Current,
    CreditCard,
    Overdraft,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankAccount {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub bank_name: String,
    pub account_name: String,
    pub account_number: String,
    pub routing_code: Option<String>,
    pub account_type: BankAccountType,
    pub currency: String,
    /// Precision amounts are compared and de-duplicated at
    pub decimal_places: u32,
    /// Book-side balance
    pub current_balance: BigDecimal,
    /// Bank-side balance from the latest imported statement
    pub statement_balance: BigDecimal,
    pub last_synced_at: Option<NaiveDateTime>,
    /// Ledger account mirroring this bank account
    pub ledger_account_id: Option<Uuid>,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl BankAccount {
    /// Round an amount to the account's currency precision
    pub fn round(&self, amount: &BigDecimal) -> BigDecimal {
        round_to(amount, self.decimal_places)
    }
}

pub(crate) fn round_to(amount: &BigDecimal, decimal_places: u32) -> BigDecimal {
    let scale = i64::from(decimal_places);
    amount.round(scale).with_scale(scale)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBankAccount {
    pub bank_name: String,
    pub account_name: String,
    pub account_number: String,
    pub routing_code: Option<String>,
    pub account_type: BankAccountType,
    pub currency: String,
    pub decimal_places: u32,
    pub opening_balance: BigDecimal,
    pub ledger_account_id: Option<Uuid>,
}

impl NewBankAccount {
    pub fn new(bank_name: &str, account_name: &str, account_number: &str) -> Self {
        Self {
            bank_name: bank_name.to_string(),
            account_name: account_name.to_string(),
            account_number: account_number.to_string(),
            routing_code: None,
            account_type: BankAccountType::Current,
            currency: "INR".to_string(),
            decimal_places: 2,
            opening_balance: zero(),
            ledger_account_id: None,
        }
    }

    pub fn linked_to(mut self, ledger_account_id: Uuid) -> Self {
        self.ledger_account_id = Some(ledger_account_id);
        self
    }
}

/// Metadata patch; balances are never edited directly
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BankAccountUpdate {
    pub bank_name: Option<String>,
    pub account_name: Option<String>,
    pub routing_code: Option<Option<String>>,
    pub account_type: Option<BankAccountType>,
    pub ledger_account_id: Option<Option<Uuid>>,
    pub is_active: Option<bool>,
}

/// Side of the bank statement: `Credit` is money in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Credit,
    Debit,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Credit => "credit",
            Direction::Debit => "debit",
        }
    }
}

/// The ledger-side record a bank line is matched to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum MatchTarget {
    Transaction(Uuid),
    Invoice(Uuid),
    Bill(Uuid),
    Expense(Uuid),
}

impl MatchTarget {
    pub fn id(&self) -> Uuid {
        match self {
            MatchTarget::Transaction(id)
            | MatchTarget::Invoice(id)
            | MatchTarget::Bill(id)
            | MatchTarget::Expense(id) => *id,
        }
    }
}

/// Link, reconciler and timestamp; present together or not at all
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub target: MatchTarget,
    pub reconciled_by: Uuid,
    pub reconciled_at: NaiveDateTime,
}

/// One line of an incoming bank statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementLine {
    pub date: NaiveDate,
    pub description: String,
    pub reference: Option<String>,
    pub counterparty: Option<String>,
    pub direction: Direction,
    pub amount: BigDecimal,
    pub running_balance: Option<BigDecimal>,
}

impl StatementLine {
    pub fn new(date: NaiveDate, description: &str, direction: Direction, amount: BigDecimal) -> Self {
        Self {
            date,
            description: description.to_string(),
            reference: None,
            counterparty: None,
            direction,
            amount,
            running_balance: None,
        }
    }

    pub fn reference(mut self, reference: &str) -> Self {
        self.reference = Some(reference.to_string());
        self
    }

    pub fn counterparty(mut self, counterparty: &str) -> Self {
        self.counterparty = Some(counterparty.to_string());
        self
    }

    pub fn balance(mut self, running_balance: BigDecimal) -> Self {
        self.running_balance = Some(running_balance);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankTransaction {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub bank_account_id: Uuid,
    pub date: NaiveDate,
    pub description: String,
    pub reference: Option<String>,
    pub counterparty: Option<String>,
    pub direction: Direction,
    pub amount: BigDecimal,
    pub running_balance: Option<BigDecimal>,
    pub dedup_key: String,
    pub reconciliation: Option<Reconciliation>,
    pub imported_at: NaiveDateTime,
}

impl BankTransaction {
    pub fn from_statement(account: &BankAccount, line: StatementLine, imported_at: NaiveDateTime) -> Self {
        let dedup_key = dedup_key(account.id, &line, account.decimal_places);
        Self {
            id: Uuid::new_v4(),
            tenant_id: account.tenant_id,
            bank_account_id: account.id,
            date: line.date,
            description: line.description,
            reference: line.reference,
            counterparty: line.counterparty,
            direction: line.direction,
            amount: line.amount,
            running_balance: line.running_balance,
            dedup_key,
            reconciliation: None,
            imported_at,
        }
    }

    pub fn is_reconciled(&self) -> bool {
        self.reconciliation.is_some()
    }

    /// Amount with money in positive and money out negative
    pub fn signed_amount(&self) -> BigDecimal {
        match self.direction {
            Direction::Credit => self.amount.clone(),
            Direction::Debit => -self.amount.clone(),
        }
    }
}

/// Identity of a statement line across imports: bank account, date,
/// direction, amount at the account's precision, the normalized reference
/// (or description when there is no reference) and the running balance when
/// the bank reports one.
pub fn dedup_key(bank_account_id: Uuid, line: &StatementLine, decimal_places: u32) -> String {
    let text = line
        .reference
        .as_deref()
        .map(normalize_text)
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| normalize_text(&line.description));
    let balance = line
        .running_balance
        .as_ref()
        .map(|b| round_to(b, decimal_places).to_string())
        .unwrap_or_default();
    format!(
        "{}|{}|{}|{}|{}|{}",
        bank_account_id,
        line.date,
        line.direction.as_str(),
        round_to(&line.amount, decimal_places),
        text,
        balance
    )
}

/// Lowercase, collapse whitespace
pub(crate) fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BankTransactionFilter {
    pub bank_account_id: Option<Uuid>,
    pub reconciled: Option<bool>,
    pub direction: Option<Direction>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl BankTransactionFilter {
    pub fn for_account(bank_account_id: Uuid) -> Self {
        Self {
            bank_account_id: Some(bank_account_id),
            ..Default::default()
        }
    }

    pub fn unreconciled(mut self) -> Self {
        self.reconciled = Some(false);
        self
    }

    pub fn matches(&self, line: &BankTransaction) -> bool {
        self.bank_account_id.is_none_or(|id| line.bank_account_id == id)
            && self.reconciled.is_none_or(|r| line.is_reconciled() == r)
            && self.direction.is_none_or(|d| line.direction == d)
            && self.from.is_none_or(|from| line.date >= from)
            && self.to.is_none_or(|to| line.date <= to)
    }
}

/// Outcome of a statement import
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportReport {
    pub imported: usize,
    pub duplicates: usize,
    pub transaction_ids: Vec<Uuid>,
}
