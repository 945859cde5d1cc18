use thiserror::Error;

use crate::domain::{AccountId, Cents, format_cents};

fn money(cents: &Cents) -> String {
    format_cents(*cents)
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error(
        "Insufficient funds in account {account_id}: balance {}, required {}",
        money(.balance),
        money(.required)
    )]
    InsufficientFunds {
        account_id: AccountId,
        balance: Cents,
        required: Cents,
    },

    #[error("Not permitted: {0}")]
    Forbidden(String),

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Login is locked for {0}")]
    CredentialLocked(String),

    #[error("{entity} already exists: {name}")]
    AlreadyExists { entity: &'static str, name: String },

    #[error("Database error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl AppError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        AppError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Business-rule rejections, as opposed to store failures.
    pub fn is_business_rule(&self) -> bool {
        !matches!(self, AppError::Store(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_human_readable() {
        let err = AppError::InsufficientFunds {
            account_id: 1,
            balance: 10000,
            required: 15000,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient funds in account 1: balance 100.00, required 150.00"
        );
        assert_eq!(
            AppError::not_found("Account", 9).to_string(),
            "Account not found: 9"
        );
    }

    #[test]
    fn test_store_errors_keep_context() {
        let err: AppError = anyhow::anyhow!("disk I/O error")
            .context("Failed to credit account")
            .into();
        assert_eq!(
            err.to_string(),
            "Database error: Failed to credit account: disk I/O error"
        );
        assert!(!err.is_business_rule());
    }
}
