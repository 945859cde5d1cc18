use anyhow::Context;
use chrono::Utc;
use tracing::{info, warn};

use crate::domain::{
    Branch, BranchId, Customer, CustomerAccountRow, CustomerId, Employee, Position, Session,
    hash_password, verify_password,
};
use crate::storage::{CredentialKind, CredentialRecord, Repository};

use super::AppError;
use super::service::validate_id;

/// Details collected when a customer signs up.
#[derive(Debug, Clone)]
pub struct CustomerRegistration {
    pub name: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub username: String,
    pub password: String,
}

/// Details collected when an employee is enrolled.
#[derive(Debug, Clone)]
pub struct EmployeeRegistration {
    pub name: String,
    pub position: Position,
    pub branch_id: BranchId,
    pub username: String,
    pub password: String,
}

fn require(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{} must not be empty", field)));
    }
    Ok(())
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Registration, authentication and customer administration.
#[derive(Clone)]
pub struct DirectoryService {
    repo: Repository,
}

impl DirectoryService {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    // ========================
    // Branches
    // ========================

    /// Seed the default branches into an empty table.
    pub async fn ensure_default_branches(&self) -> Result<usize, AppError> {
        let inserted = self.repo.ensure_default_branches().await?;
        if inserted > 0 {
            info!(inserted, "seeded default branches");
        }
        Ok(inserted)
    }

    pub async fn list_branches(&self) -> Result<Vec<Branch>, AppError> {
        Ok(self.repo.list_branches().await?)
    }

    // ========================
    // Registration
    // ========================

    /// Create a customer and their login in one unit.
    pub async fn register_customer(
        &self,
        registration: CustomerRegistration,
    ) -> Result<Customer, AppError> {
        require("name", &registration.name)?;
        require("username", &registration.username)?;
        require("password", &registration.password)?;

        let username = registration.username.trim().to_string();
        if self
            .repo
            .username_exists(CredentialKind::Customer, &username)
            .await?
        {
            return Err(AppError::AlreadyExists {
                entity: "Username",
                name: username,
            });
        }

        let name = registration.name.trim().to_string();
        let phone = blank_to_none(registration.phone);
        let address = blank_to_none(registration.address);
        let password_hash = hash_password(&registration.password);

        let mut tx = self.repo.begin().await?;
        let customer_id =
            Repository::insert_customer(&mut tx, &name, phone.as_deref(), address.as_deref())
                .await?;
        // A concurrent registration may have taken the name since the check.
        if !Repository::insert_credential(
            &mut tx,
            CredentialKind::Customer,
            customer_id,
            &username,
            &password_hash,
        )
        .await?
        {
            return Err(AppError::AlreadyExists {
                entity: "Username",
                name: username,
            });
        }
        tx.commit()
            .await
            .context("Failed to commit customer registration")?;

        info!(customer_id, %username, "customer registered");
        Ok(Customer {
            id: customer_id,
            name,
            phone,
            address,
        })
    }

    /// Create an employee and their login in one unit.
    pub async fn register_employee(
        &self,
        registration: EmployeeRegistration,
    ) -> Result<Employee, AppError> {
        require("name", &registration.name)?;
        require("username", &registration.username)?;
        require("password", &registration.password)?;
        validate_id("branch", registration.branch_id)?;

        if self.repo.get_branch(registration.branch_id).await?.is_none() {
            return Err(AppError::not_found("Branch", registration.branch_id));
        }

        let username = registration.username.trim().to_string();
        if self
            .repo
            .username_exists(CredentialKind::Employee, &username)
            .await?
        {
            return Err(AppError::AlreadyExists {
                entity: "Username",
                name: username,
            });
        }

        let name = registration.name.trim().to_string();
        let password_hash = hash_password(&registration.password);

        let mut tx = self.repo.begin().await?;
        let employee_id = Repository::insert_employee(
            &mut tx,
            &name,
            registration.position,
            registration.branch_id,
        )
        .await?;
        // A concurrent registration may have taken the name since the check.
        if !Repository::insert_credential(
            &mut tx,
            CredentialKind::Employee,
            employee_id,
            &username,
            &password_hash,
        )
        .await?
        {
            return Err(AppError::AlreadyExists {
                entity: "Username",
                name: username,
            });
        }
        tx.commit()
            .await
            .context("Failed to commit employee registration")?;

        info!(employee_id, %username, branch_id = registration.branch_id, "employee registered");
        Ok(Employee {
            id: employee_id,
            name,
            position: registration.position,
            branch_id: registration.branch_id,
        })
    }

    // ========================
    // Authentication
    // ========================

    /// Authenticate a customer and open a session for them.
    pub async fn login_customer(&self, username: &str, password: &str) -> Result<Session, AppError> {
        let record = self
            .authenticate(CredentialKind::Customer, username, password)
            .await?;
        let session = Session::customer(record.owner_id, record.owner_name);
        info!(session = %session.id, customer_id = record.owner_id, "customer logged in");
        Ok(session)
    }

    /// Authenticate an employee and open a session for them.
    pub async fn login_employee(&self, username: &str, password: &str) -> Result<Session, AppError> {
        let record = self
            .authenticate(CredentialKind::Employee, username, password)
            .await?;
        let branch_id = record
            .branch_id
            .with_context(|| format!("employee {} has no branch", record.owner_id))?;
        let session = Session::employee(record.owner_id, record.owner_name, branch_id);
        info!(session = %session.id, employee_id = record.owner_id, branch_id, "employee logged in");
        Ok(session)
    }

    async fn authenticate(
        &self,
        kind: CredentialKind,
        username: &str,
        password: &str,
    ) -> Result<CredentialRecord, AppError> {
        let username = username.trim();
        let record = match self.repo.find_credential(kind, username).await? {
            Some(record) if verify_password(password, &record.password_hash) => record,
            _ => {
                warn!(%username, ?kind, "login failed");
                return Err(AppError::InvalidCredentials);
            }
        };

        if record.is_locked {
            warn!(%username, ?kind, "login refused: credential locked");
            return Err(AppError::CredentialLocked(username.to_string()));
        }

        self.repo
            .record_login(kind, record.owner_id, Utc::now())
            .await?;
        Ok(record)
    }

    // ========================
    // Administration
    // ========================

    /// Lock or unlock a customer's login. Employees only.
    pub async fn set_customer_lock(
        &self,
        session: &Session,
        customer_id: CustomerId,
        locked: bool,
    ) -> Result<(), AppError> {
        if !session.is_employee() {
            return Err(AppError::Forbidden(
                "only employees can lock or unlock customers".to_string(),
            ));
        }
        validate_id("customer", customer_id)?;

        if !self
            .repo
            .set_locked(CredentialKind::Customer, customer_id, locked)
            .await?
        {
            return Err(AppError::not_found("Customer login", customer_id));
        }

        info!(session = %session.id, customer_id, locked, "customer lock flag changed");
        Ok(())
    }

    /// Every customer with each of their accounts. Employees only.
    pub async fn list_all_customers(
        &self,
        session: &Session,
    ) -> Result<Vec<CustomerAccountRow>, AppError> {
        if !session.is_employee() {
            return Err(AppError::Forbidden(
                "only employees can list customers".to_string(),
            ));
        }
        Ok(self.repo.list_customers_with_accounts().await?)
    }

    pub async fn get_customer(
        &self,
        session: &Session,
        customer_id: CustomerId,
    ) -> Result<Customer, AppError> {
        validate_id("customer", customer_id)?;
        if !session.can_access_customer(customer_id) {
            return Err(AppError::Forbidden(format!(
                "customer {} is not you",
                customer_id
            )));
        }
        self.repo
            .get_customer(customer_id)
            .await?
            .ok_or_else(|| AppError::not_found("Customer", customer_id))
    }
}
