// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use anyhow::Result;
use bankdesk::application::{
    CustomerRegistration, DirectoryService, EmployeeRegistration, LedgerService,
};
use bankdesk::domain::{AccountId, Cents, CustomerId, Position, Session};
use bankdesk::storage::StoreConfig;
use tempfile::TempDir;

pub const PASSWORD: &str = "correct horse battery staple";

/// A freshly initialised bank on a temporary database.
pub struct TestBank {
    pub service: LedgerService,
    pub directory: DirectoryService,
    _temp: TempDir,
}

/// Helper to create a test bank with a temporary database
pub async fn test_bank() -> Result<TestBank> {
    let temp_dir = TempDir::new()?;
    let config = StoreConfig::new(temp_dir.path().join("test.db"));
    let service = LedgerService::init(&config).await?;
    let directory = service.directory();
    Ok(TestBank {
        service,
        directory,
        _temp: temp_dir,
    })
}

impl TestBank {
    /// Register a customer and log them in.
    pub async fn customer(&self, name: &str) -> Result<Session> {
        let username = name.to_lowercase();
        self.directory
            .register_customer(CustomerRegistration {
                name: name.to_string(),
                phone: Some("555-0100".to_string()),
                address: None,
                username: username.clone(),
                password: PASSWORD.to_string(),
            })
            .await?;
        Ok(self.directory.login_customer(&username, PASSWORD).await?)
    }

    /// Register a teller at the first default branch and log them in.
    pub async fn teller(&self, name: &str) -> Result<Session> {
        let username = name.to_lowercase();
        self.directory
            .register_employee(EmployeeRegistration {
                name: name.to_string(),
                position: Position::Teller,
                branch_id: 1,
                username: username.clone(),
                password: PASSWORD.to_string(),
            })
            .await?;
        Ok(self.directory.login_employee(&username, PASSWORD).await?)
    }

    /// Open an account for the session's own customer.
    pub async fn open(&self, session: &Session, initial: Cents) -> Result<AccountId> {
        let customer_id = own_id(session);
        let opened = self
            .service
            .open_account(session, customer_id, initial)
            .await?;
        Ok(opened.account.id)
    }

    pub async fn balance(&self, session: &Session, account: AccountId) -> Result<Cents> {
        Ok(self.service.get_balance(session, account).await?)
    }

    pub async fn log_len(&self, session: &Session) -> Result<usize> {
        let log = self
            .service
            .get_transaction_log(session, own_id(session))
            .await?;
        Ok(log.len())
    }
}

pub fn own_id(session: &Session) -> CustomerId {
    session
        .customer_id()
        .expect("helper requires a customer session")
}
