//! Confidence scoring for bank line matches
//!
//! A candidate must have the same direction and the same amount at the bank
//! account's precision. On top of the 50 points for the amount, date
//! proximity adds up to 30 (`30 - 2 * days`, never negative) and name
//! similarity adds up to 20. A shared reference counts as a perfect name match.

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use strsim::jaro_winkler;

use crate::reconciliation::bank::{normalize_text, round_to};
use crate::reconciliation::{BankTransaction, Direction, MatchTarget};

const AMOUNT_POINTS: i64 = 50;
const DATE_POINTS: i64 = 30;
const DATE_PENALTY_PER_DAY: i64 = 2;
const NAME_POINTS: f64 = 20.0;

/// Something on the ledger side a bank line could be matched to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub target: MatchTarget,
    /// Transaction or document number
    pub label: String,
    pub date: NaiveDate,
    pub direction: Direction,
    pub amount: BigDecimal,
    pub party_name: Option<String>,
    pub reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchSuggestion {
    pub target: MatchTarget,
    pub label: String,
    pub date: NaiveDate,
    pub amount: BigDecimal,
    pub party_name: Option<String>,
    /// 0-100
    pub confidence: u8,
    pub days_apart: i64,
}

/// Score one candidate; `None` when direction or amount differ
pub fn score(
    line: &BankTransaction,
    candidate: &MatchCandidate,
    decimal_places: u32,
) -> Option<MatchSuggestion> {
    if line.direction != candidate.direction {
        return None;
    }
    if round_to(&line.amount, decimal_places) != round_to(&candidate.amount, decimal_places) {
        return None;
    }

    let days_apart = (line.date - candidate.date).num_days().abs();
    let date_points = (DATE_POINTS - DATE_PENALTY_PER_DAY * days_apart).max(0);
    let name_points = (name_similarity(line, candidate) * NAME_POINTS).floor() as i64;
    let confidence = (AMOUNT_POINTS + date_points + name_points).clamp(0, 100) as u8;

    Some(MatchSuggestion {
        target: candidate.target,
        label: candidate.label.clone(),
        date: candidate.date,
        amount: candidate.amount.clone(),
        party_name: candidate.party_name.clone(),
        confidence,
        days_apart,
    })
}

/// 0.0 to 1.0
fn name_similarity(line: &BankTransaction, candidate: &MatchCandidate) -> f64 {
    if let (Some(ours), Some(theirs)) = (&line.reference, &candidate.reference) {
        let ours = normalize_text(ours);
        if !ours.is_empty() && ours == normalize_text(theirs) {
            return 1.0;
        }
    }
    let Some(party) = candidate.party_name.as_deref().map(normalize_text) else {
        return 0.0;
    };
    if party.is_empty() {
        return 0.0;
    }
    let counterparty = line
        .counterparty
        .as_deref()
        .map(normalize_text)
        .filter(|c| !c.is_empty());
    match counterparty {
        Some(counterparty) => jaro_winkler(&counterparty, &party),
        // Statement descriptions carry the name among other words
        None => {
            let description = normalize_text(&line.description);
            if description.contains(&party) {
                1.0
            } else {
                jaro_winkler(&description, &party)
            }
        }
    }
}

/// Score every candidate and order the hits: confidence descending, then
/// date distance ascending, then target id. Ties always break the same way.
pub fn rank(
    line: &BankTransaction,
    candidates: &[MatchCandidate],
    decimal_places: u32,
    limit: usize,
) -> Vec<MatchSuggestion> {
    let mut suggestions: Vec<MatchSuggestion> = candidates
        .iter()
        .filter_map(|candidate| score(line, candidate, decimal_places))
        .collect();
    suggestions.sort_by(compare);
    suggestions.truncate(limit);
    suggestions
}

fn compare(a: &MatchSuggestion, b: &MatchSuggestion) -> Ordering {
    b.confidence
        .cmp(&a.confidence)
        .then(a.days_apart.cmp(&b.days_apart))
        .then(a.target.cmp(&b.target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::str::FromStr;
    use uuid::Uuid;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 6, d).unwrap()
    }

    fn bank_line(amount: &str, day: u32, counterparty: Option<&str>) -> BankTransaction {
        BankTransaction {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            bank_account_id: Uuid::new_v4(),
            date: date(day),
            description: "NEFT CR".to_string(),
            reference: None,
            counterparty: counterparty.map(str::to_string),
            direction: Direction::Credit,
            amount: BigDecimal::from_str(amount).unwrap(),
            running_balance: None,
            dedup_key: String::new(),
            reconciliation: None,
            imported_at: Utc::now().naive_utc(),
        }
    }

    fn candidate(amount: &str, day: u32, party: Option<&str>) -> MatchCandidate {
        MatchCandidate {
            target: MatchTarget::Transaction(Uuid::new_v4()),
            label: "RCT-2026-00001".to_string(),
            date: date(day),
            direction: Direction::Credit,
            amount: BigDecimal::from_str(amount).unwrap(),
            party_name: party.map(str::to_string),
            reference: None,
        }
    }

    #[test]
    fn test_amount_must_match_at_precision() {
        let line = bank_line("1500.00", 10, None);
        assert!(score(&line, &candidate("1500", 10, None), 2).is_some());
        assert!(score(&line, &candidate("1500.01", 10, None), 2).is_none());

        let mut debit = candidate("1500", 10, None);
        debit.direction = Direction::Debit;
        assert!(score(&line, &debit, 2).is_none());
    }

    #[test]
    fn test_confidence_components() {
        let line = bank_line("800", 10, Some("Acme Traders"));
        let perfect = score(&line, &candidate("800", 10, Some("ACME  traders")), 2).unwrap();
        assert_eq!(perfect.confidence, 100);

        let late = score(&line, &candidate("800", 13, Some("Acme Traders")), 2).unwrap();
        assert_eq!(late.confidence, 94);
        assert_eq!(late.days_apart, 3);

        let far = score(&line, &candidate("800", 30, None), 2).unwrap();
        assert_eq!(far.confidence, 50);
    }

    #[test]
    fn test_monotonic_in_date_and_name() {
        let line = bank_line("250", 15, Some("Globex Corporation"));
        let near = score(&line, &candidate("250", 16, Some("Initech")), 2).unwrap();
        let farther = score(&line, &candidate("250", 18, Some("Initech")), 2).unwrap();
        assert!(near.confidence > farther.confidence);

        let similar = score(&line, &candidate("250", 16, Some("Globex Corp")), 2).unwrap();
        assert!(similar.confidence > near.confidence);
    }

    #[test]
    fn test_shared_reference_counts_as_full_name_match() {
        let mut line = bank_line("90", 5, Some("UPI/8821"));
        line.reference = Some("INV-0042".to_string());
        let mut by_reference = candidate("90", 5, Some("Someone Else"));
        by_reference.reference = Some("inv-0042".to_string());
        assert_eq!(score(&line, &by_reference, 2).unwrap().confidence, 100);
    }

    #[test]
    fn test_rank_is_deterministic() {
        let line = bank_line("400", 10, None);
        let mut candidates = vec![
            candidate("400", 12, None),
            candidate("400", 8, None),
            candidate("400", 10, None),
            candidate("401", 10, None),
        ];
        let first = rank(&line, &candidates, 2, 10);
        candidates.reverse();
        let second = rank(&line, &candidates, 2, 10);

        assert_eq!(first.len(), 3);
        assert_eq!(first, second);
        assert_eq!(first[0].days_apart, 0);
        assert_eq!(first[1].confidence, first[2].confidence);
        assert!(first[1].target < first[2].target);
    }
}
