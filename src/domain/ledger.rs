use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::{AccountId, Cents};

pub type TransactionId = i64;

/// Kind of balance-affecting event recorded in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Deposit,
    Withdraw,
    TransferOut,
    TransferIn,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Deposit => "deposit",
            EntryType::Withdraw => "withdraw",
            EntryType::TransferOut => "transfer_out",
            EntryType::TransferIn => "transfer_in",
        }
    }

    /// Apply this entry's direction to a positive amount.
    pub fn signed(&self, amount: Cents) -> Cents {
        match self {
            EntryType::Deposit | EntryType::TransferIn => amount,
            EntryType::Withdraw | EntryType::TransferOut => -amount,
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown transaction type: {0}")]
pub struct UnknownEntryType(pub String);

impl FromStr for EntryType {
    type Err = UnknownEntryType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(EntryType::Deposit),
            "withdraw" => Ok(EntryType::Withdraw),
            "transfer_out" => Ok(EntryType::TransferOut),
            "transfer_in" => Ok(EntryType::TransferIn),
            other => Err(UnknownEntryType(other.to_string())),
        }
    }
}

/// One immutable ledger row: a single balance-affecting event on one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: TransactionId,
    pub account_id: AccountId,
    pub timestamp: DateTime<Utc>,
    /// Signed amount in cents: credits positive, debits negative
    pub amount: Cents,
    pub entry_type: EntryType,
    pub info: String,
    /// The other account of a transfer leg
    pub counterparty: Option<AccountId>,
    /// Shared by both legs of one transfer
    pub transfer_ref: Option<Uuid>,
}

/// A ledger row that has not been persisted yet.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub account_id: AccountId,
    pub timestamp: DateTime<Utc>,
    pub amount: Cents,
    pub entry_type: EntryType,
    pub info: String,
    pub counterparty: Option<AccountId>,
    pub transfer_ref: Option<Uuid>,
}

impl NewEntry {
    /// `amount` is the positive magnitude; the sign comes from `entry_type`.
    fn new(
        account_id: AccountId,
        entry_type: EntryType,
        amount: Cents,
        info: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        assert!(amount > 0, "Ledger amount must be positive");
        Self {
            account_id,
            timestamp,
            amount: entry_type.signed(amount),
            entry_type,
            info: info.into(),
            counterparty: None,
            transfer_ref: None,
        }
    }

    pub fn deposit(
        account_id: AccountId,
        amount: Cents,
        info: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self::new(account_id, EntryType::Deposit, amount, info, timestamp)
    }

    pub fn withdraw(account_id: AccountId, amount: Cents, timestamp: DateTime<Utc>) -> Self {
        Self::new(account_id, EntryType::Withdraw, amount, "Withdrawal", timestamp)
    }

    /// Build the debit and credit legs of one transfer.
    pub fn transfer_pair(
        from: AccountId,
        to: AccountId,
        amount: Cents,
        transfer_ref: Uuid,
        timestamp: DateTime<Utc>,
    ) -> (Self, Self) {
        let mut out = Self::new(
            from,
            EntryType::TransferOut,
            amount,
            format!("to {}", to),
            timestamp,
        );
        out.counterparty = Some(to);
        out.transfer_ref = Some(transfer_ref);

        let mut inc = Self::new(
            to,
            EntryType::TransferIn,
            amount,
            format!("from {}", from),
            timestamp,
        );
        inc.counterparty = Some(from);
        inc.transfer_ref = Some(transfer_ref);

        (out, inc)
    }

    pub fn into_entry(self, id: TransactionId) -> LedgerEntry {
        LedgerEntry {
            id,
            account_id: self.account_id,
            timestamp: self.timestamp,
            amount: self.amount,
            entry_type: self.entry_type,
            info: self.info,
            counterparty: self.counterparty,
            transfer_ref: self.transfer_ref,
        }
    }
}

/// Compute the balance of one account from its ledger entries.
pub fn compute_balance(account_id: AccountId, entries: &[LedgerEntry]) -> Cents {
    entries
        .iter()
        .filter(|e| e.account_id == account_id)
        .map(|e| e.amount)
        .sum()
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PairingError {
    #[error("expected a transfer_out leg, found {0}")]
    NotADebit(EntryType),

    #[error("expected a transfer_in leg, found {0}")]
    NotACredit(EntryType),

    #[error("legs carry different transfer references")]
    ReferenceMismatch,

    #[error("legs do not name each other as counterparty")]
    CounterpartyMismatch,

    #[error("legs do not cancel out: {debit} + {credit} != 0")]
    Unbalanced { debit: Cents, credit: Cents },
}

/// Check that two entries form one well-formed transfer.
pub fn verify_transfer_pair(out: &LedgerEntry, inc: &LedgerEntry) -> Result<(), PairingError> {
    if out.entry_type != EntryType::TransferOut {
        return Err(PairingError::NotADebit(out.entry_type));
    }
    if inc.entry_type != EntryType::TransferIn {
        return Err(PairingError::NotACredit(inc.entry_type));
    }
    if out.transfer_ref.is_none() || out.transfer_ref != inc.transfer_ref {
        return Err(PairingError::ReferenceMismatch);
    }
    if out.counterparty != Some(inc.account_id) || inc.counterparty != Some(out.account_id) {
        return Err(PairingError::CounterpartyMismatch);
    }
    if out.amount >= 0 || out.amount + inc.amount != 0 {
        return Err(PairingError::Unbalanced {
            debit: out.amount,
            credit: inc.amount,
        });
    }
    Ok(())
}

/// An account whose stored balance disagrees with the sum of its ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceMismatch {
    pub account_id: AccountId,
    pub stored: Cents,
    pub ledger: Cents,
}

/// Result of a full ledger consistency check.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IntegrityReport {
    pub account_count: i64,
    pub entry_count: i64,
    pub balance_mismatches: Vec<BalanceMismatch>,
    pub negative_balances: Vec<AccountId>,
    pub unpaired_transfers: Vec<Uuid>,
    pub unlinked_transfer_legs: i64,
}

impl IntegrityReport {
    pub fn is_healthy(&self) -> bool {
        self.balance_mismatches.is_empty()
            && self.negative_balances.is_empty()
            && self.unpaired_transfers.is_empty()
            && self.unlinked_transfer_legs == 0
    }

    /// Human-readable list of problems, empty when healthy.
    pub fn issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        for m in &self.balance_mismatches {
            issues.push(format!(
                "account {}: stored balance {} but ledger sums to {}",
                m.account_id, m.stored, m.ledger
            ));
        }
        for id in &self.negative_balances {
            issues.push(format!("account {}: negative balance", id));
        }
        for r in &self.unpaired_transfers {
            issues.push(format!("transfer {}: legs are not a balanced pair", r));
        }
        if self.unlinked_transfer_legs > 0 {
            issues.push(format!(
                "{} transfer entries carry no transfer reference",
                self.unlinked_transfer_legs
            ));
        }
        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn persisted(entry: NewEntry, id: TransactionId) -> LedgerEntry {
        entry.into_entry(id)
    }

    #[test]
    fn test_entry_type_strings() {
        for t in [
            EntryType::Deposit,
            EntryType::Withdraw,
            EntryType::TransferOut,
            EntryType::TransferIn,
        ] {
            assert_eq!(t.as_str().parse::<EntryType>(), Ok(t));
        }
        assert!("refund".parse::<EntryType>().is_err());
    }

    #[test]
    fn test_signs_follow_direction() {
        let now = Utc::now();
        assert_eq!(NewEntry::deposit(1, 500, "Deposit", now).amount, 500);
        assert_eq!(NewEntry::withdraw(1, 500, now).amount, -500);
    }

    #[test]
    fn test_transfer_pair_is_balanced_and_linked() {
        let reference = Uuid::new_v4();
        let (out, inc) = NewEntry::transfer_pair(1, 2, 4000, reference, Utc::now());

        assert_eq!(out.amount, -4000);
        assert_eq!(out.info, "to 2");
        assert_eq!(inc.amount, 4000);
        assert_eq!(inc.info, "from 1");

        let out = persisted(out, 10);
        let inc = persisted(inc, 11);
        assert_eq!(verify_transfer_pair(&out, &inc), Ok(()));
    }

    #[test]
    fn test_verify_rejects_swapped_legs() {
        let (out, inc) = NewEntry::transfer_pair(1, 2, 100, Uuid::new_v4(), Utc::now());
        let out = persisted(out, 1);
        let inc = persisted(inc, 2);

        assert_eq!(
            verify_transfer_pair(&inc, &out),
            Err(PairingError::NotADebit(EntryType::TransferIn))
        );
    }

    #[test]
    fn test_verify_rejects_foreign_reference() {
        let now = Utc::now();
        let (out, _) = NewEntry::transfer_pair(1, 2, 100, Uuid::new_v4(), now);
        let (_, inc) = NewEntry::transfer_pair(1, 2, 100, Uuid::new_v4(), now);

        assert_eq!(
            verify_transfer_pair(&persisted(out, 1), &persisted(inc, 2)),
            Err(PairingError::ReferenceMismatch)
        );
    }

    #[test]
    fn test_verify_rejects_unbalanced_amounts() {
        let now = Utc::now();
        let reference = Uuid::new_v4();
        let (out, _) = NewEntry::transfer_pair(1, 2, 100, reference, now);
        let (_, inc) = NewEntry::transfer_pair(1, 2, 90, reference, now);

        assert_eq!(
            verify_transfer_pair(&persisted(out, 1), &persisted(inc, 2)),
            Err(PairingError::Unbalanced {
                debit: -100,
                credit: 90
            })
        );
    }

    #[test]
    fn test_compute_balance() {
        let now = Utc::now();
        let (out, inc) = NewEntry::transfer_pair(1, 2, 4000, Uuid::new_v4(), now);
        let entries = vec![
            persisted(NewEntry::deposit(1, 10000, "Deposit", now), 1),
            persisted(NewEntry::deposit(2, 2000, "Deposit", now), 2),
            persisted(out, 3),
            persisted(inc, 4),
            persisted(NewEntry::withdraw(2, 500, now), 5),
        ];

        assert_eq!(compute_balance(1, &entries), 6000);
        assert_eq!(compute_balance(2, &entries), 5500);
        assert_eq!(compute_balance(3, &entries), 0);
    }

    #[test]
    fn test_integrity_report_issues() {
        let healthy = IntegrityReport::default();
        assert!(healthy.is_healthy());
        assert!(healthy.issues().is_empty());

        let broken = IntegrityReport {
            balance_mismatches: vec![BalanceMismatch {
                account_id: 3,
                stored: 100,
                ledger: 90,
            }],
            unlinked_transfer_legs: 2,
            ..Default::default()
        };
        assert!(!broken.is_healthy());
        assert_eq!(broken.issues().len(), 2);
    }
}
