use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::{Account, BranchId, CustomerId, EmployeeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Employee,
}

/// The authenticated customer or employee an operation runs for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Principal {
    Customer {
        customer_id: CustomerId,
        name: String,
    },
    Employee {
        employee_id: EmployeeId,
        name: String,
        branch_id: BranchId,
    },
}

/// Explicit authentication context, produced by login and passed to every
/// ledger operation.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: Uuid,
    pub principal: Principal,
    pub started_at: DateTime<Utc>,
}

impl Session {
    pub fn new(principal: Principal) -> Self {
        Self {
            id: Uuid::new_v4(),
            principal,
            started_at: Utc::now(),
        }
    }

    pub fn customer(customer_id: CustomerId, name: impl Into<String>) -> Self {
        Self::new(Principal::Customer {
            customer_id,
            name: name.into(),
        })
    }

    pub fn employee(employee_id: EmployeeId, name: impl Into<String>, branch_id: BranchId) -> Self {
        Self::new(Principal::Employee {
            employee_id,
            name: name.into(),
            branch_id,
        })
    }

    pub fn role(&self) -> Role {
        match self.principal {
            Principal::Customer { .. } => Role::Customer,
            Principal::Employee { .. } => Role::Employee,
        }
    }

    pub fn is_employee(&self) -> bool {
        self.role() == Role::Employee
    }

    pub fn name(&self) -> &str {
        match &self.principal {
            Principal::Customer { name, .. } | Principal::Employee { name, .. } => name,
        }
    }

    /// The customer this session acts as, if any.
    pub fn customer_id(&self) -> Option<CustomerId> {
        match self.principal {
            Principal::Customer { customer_id, .. } => Some(customer_id),
            Principal::Employee { .. } => None,
        }
    }

    /// Employees see every customer; customers only see themselves.
    pub fn can_access_customer(&self, customer_id: CustomerId) -> bool {
        match self.principal {
            Principal::Employee { .. } => true,
            Principal::Customer {
                customer_id: own, ..
            } => own == customer_id,
        }
    }

    pub fn can_access_account(&self, account: &Account) -> bool {
        match self.principal {
            Principal::Employee { .. } => true,
            Principal::Customer { customer_id, .. } => account.is_owned_by(customer_id),
        }
    }
}
