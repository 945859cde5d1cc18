use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{AccountId, Cents, CustomerId};

pub type EmployeeId = i64;
pub type BranchId = i64;

/// Branches seeded into an empty database.
pub const DEFAULT_BRANCHES: [(&str, &str); 3] = [
    ("Downtown Branch", "123 Main St"),
    ("Uptown Branch", "456 North Ave"),
    ("Suburban Branch", "789 Elm Rd"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub id: BranchId,
    pub name: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub name: String,
    pub phone: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Position {
    Teller,
    Manager,
    Cashier,
    LoanOfficer,
    CustomerService,
}

impl Position {
    pub const ALL: [Position; 5] = [
        Position::Teller,
        Position::Manager,
        Position::Cashier,
        Position::LoanOfficer,
        Position::CustomerService,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Position::Teller => "Teller",
            Position::Manager => "Manager",
            Position::Cashier => "Cashier",
            Position::LoanOfficer => "Loan Officer",
            Position::CustomerService => "Customer Service",
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown position '{0}' (expected one of: Teller, Manager, Cashier, Loan Officer, Customer Service)")]
pub struct UnknownPosition(pub String);

impl FromStr for Position {
    type Err = UnknownPosition;

    /// Accepts the display name in any case, with spaces, dashes or underscores.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '_'))
            .flat_map(char::to_lowercase)
            .collect();
        match normalized.as_str() {
            "teller" => Ok(Position::Teller),
            "manager" => Ok(Position::Manager),
            "cashier" => Ok(Position::Cashier),
            "loanofficer" => Ok(Position::LoanOfficer),
            "customerservice" => Ok(Position::CustomerService),
            _ => Err(UnknownPosition(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub id: EmployeeId,
    pub name: String,
    pub position: Position,
    pub branch_id: BranchId,
}

/// One row of the employee overview: a customer and one of their accounts,
/// or no account at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomerAccountRow {
    pub customer_id: CustomerId,
    pub customer_name: String,
    pub account_id: Option<AccountId>,
    pub balance: Option<Cents>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_roundtrip() {
        for p in Position::ALL {
            assert_eq!(p.as_str().parse::<Position>(), Ok(p));
        }
    }

    #[test]
    fn test_position_parse_is_lenient() {
        assert_eq!("loan-officer".parse::<Position>(), Ok(Position::LoanOfficer));
        assert_eq!("customer_service".parse::<Position>(), Ok(Position::CustomerService));
        assert_eq!("TELLER".parse::<Position>(), Ok(Position::Teller));
        assert!("janitor".parse::<Position>().is_err());
    }
}
