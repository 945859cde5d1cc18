use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::Cents;

pub type AccountId = i64;
pub type CustomerId = i64;

/// A customer account. The balance is only ever changed by ledger
/// operations, each of which appends matching ledger entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub customer_id: CustomerId,
    /// Current balance in cents, never negative
    pub balance: Cents,
    pub open_date: NaiveDate,
}

impl Account {
    pub fn is_owned_by(&self, customer_id: CustomerId) -> bool {
        self.customer_id == customer_id
    }
}
