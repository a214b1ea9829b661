//! Validation utilities

use bigdecimal::BigDecimal;

use crate::types::*;

/// Validate that an amount is not negative
pub fn validate_non_negative_amount(amount: &BigDecimal) -> LedgerResult<()> {
    if *amount < zero() {
        Err(LedgerError::Validation(
            "Amount cannot be negative".to_string(),
        ))
    } else {
        Ok(())
    }
}

/// Validate that an amount is positive
pub fn validate_positive_amount(amount: &BigDecimal) -> LedgerResult<()> {
    if *amount <= zero() {
        Err(LedgerError::Validation(
            "Amount must be positive".to_string(),
        ))
    } else {
        Ok(())
    }
}

/// Validate that an account code is valid
pub fn validate_account_code(code: &str) -> LedgerResult<()> {
    if code.trim().is_empty() {
        return Err(LedgerError::Validation(
            "Account code cannot be empty".to_string(),
        ));
    }

    if code.len() > 20 {
        return Err(LedgerError::Validation(
            "Account code cannot exceed 20 characters".to_string(),
        ));
    }

    if !code
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(LedgerError::Validation(
            "Account code can only contain alphanumeric characters, dashes, dots, and underscores"
                .to_string(),
        ));
    }

    Ok(())
}

/// Validate that an account name is valid
pub fn validate_account_name(name: &str) -> LedgerResult<()> {
    if name.trim().is_empty() {
        return Err(LedgerError::Validation(
            "Account name cannot be empty".to_string(),
        ));
    }

    if name.len() > 100 {
        return Err(LedgerError::Validation(
            "Account name cannot exceed 100 characters".to_string(),
        ));
    }

    Ok(())
}

/// Validate that a transaction description is valid
pub fn validate_transaction_description(description: &str) -> LedgerResult<()> {
    if description.trim().is_empty() {
        return Err(LedgerError::Validation(
            "Transaction description cannot be empty".to_string(),
        ));
    }

    if description.len() > 500 {
        return Err(LedgerError::Validation(
            "Transaction description cannot exceed 500 characters".to_string(),
        ));
    }

    Ok(())
}

/// Validate the double-entry shape of a set of lines.
///
/// Every line carries exactly one non-zero, non-negative side, there are at
/// least two lines, and debits equal credits. Balance is checked last so that
/// malformed lines are reported as validation errors rather than imbalance.
pub fn validate_lines(lines: &[TransactionLine]) -> LedgerResult<()> {
    if lines.len() < 2 {
        return Err(LedgerError::Validation(
            "Transaction must have at least two lines for double-entry bookkeeping".to_string(),
        ));
    }

    for line in lines {
        validate_non_negative_amount(&line.debit)?;
        validate_non_negative_amount(&line.credit)?;
        let has_debit = line.debit > zero();
        let has_credit = line.credit > zero();
        if has_debit == has_credit {
            return Err(LedgerError::Validation(format!(
                "Line for account {} must carry exactly one of debit or credit",
                line.account_id
            )));
        }
    }

    let debits: BigDecimal = lines.iter().map(|l| &l.debit).sum();
    let credits: BigDecimal = lines.iter().map(|l| &l.credit).sum();
    if debits != credits {
        return Err(LedgerError::NotBalanced { debits, credits });
    }

    Ok(())
}
