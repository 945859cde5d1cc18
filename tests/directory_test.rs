mod common;

use anyhow::Result;
use bankdesk::application::{AppError, CustomerRegistration, EmployeeRegistration};
use bankdesk::domain::{DEFAULT_BRANCHES, Position, Role};
use bankdesk::storage::{CredentialKind, Repository};

use common::{PASSWORD, own_id, test_bank};

fn customer_form(name: &str, username: &str) -> CustomerRegistration {
    CustomerRegistration {
        name: name.to_string(),
        phone: Some(" ".to_string()),
        address: Some("1 Elm Rd".to_string()),
        username: username.to_string(),
        password: PASSWORD.to_string(),
    }
}

#[tokio::test]
async fn test_default_branches_are_seeded_once() -> Result<()> {
    let bank = test_bank().await?;

    let branches = bank.directory.list_branches().await?;
    assert_eq!(branches.len(), DEFAULT_BRANCHES.len());
    assert_eq!(branches[0].name, "Downtown Branch");

    assert_eq!(bank.directory.ensure_default_branches().await?, 0);
    assert_eq!(bank.directory.list_branches().await?.len(), 3);

    Ok(())
}

#[tokio::test]
async fn test_register_and_login_customer() -> Result<()> {
    let bank = test_bank().await?;

    let customer = bank
        .directory
        .register_customer(customer_form("Alice Smith", "alice"))
        .await?;
    assert_eq!(customer.name, "Alice Smith");
    assert_eq!(customer.phone, None);
    assert_eq!(customer.address.as_deref(), Some("1 Elm Rd"));

    let session = bank.directory.login_customer("alice", PASSWORD).await?;
    assert_eq!(session.role(), Role::Customer);
    assert_eq!(session.customer_id(), Some(customer.id));
    assert_eq!(session.name(), "Alice Smith");

    let fetched = bank.directory.get_customer(&session, customer.id).await?;
    assert_eq!(fetched, customer);

    Ok(())
}

#[tokio::test]
async fn test_duplicate_username_is_rejected() -> Result<()> {
    let bank = test_bank().await?;
    bank.directory
        .register_customer(customer_form("Alice", "alice"))
        .await?;

    let err = bank
        .directory
        .register_customer(customer_form("Another Alice", "alice"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AlreadyExists { entity: "Username", .. }));

    let err = bank
        .directory
        .register_customer(customer_form("", "blank"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    Ok(())
}

#[tokio::test]
async fn test_wrong_password_is_rejected() -> Result<()> {
    let bank = test_bank().await?;
    bank.customer("Alice").await?;

    let err = bank
        .directory
        .login_customer("alice", "wrong")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidCredentials));

    let err = bank
        .directory
        .login_customer("nobody", PASSWORD)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidCredentials));

    // Customer and employee logins are separate namespaces.
    let err = bank
        .directory
        .login_employee("alice", PASSWORD)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidCredentials));

    Ok(())
}

#[tokio::test]
async fn test_register_employee() -> Result<()> {
    let bank = test_bank().await?;

    let employee = bank
        .directory
        .register_employee(EmployeeRegistration {
            name: "Grace".to_string(),
            position: Position::LoanOfficer,
            branch_id: 2,
            username: "grace".to_string(),
            password: PASSWORD.to_string(),
        })
        .await?;
    assert_eq!(employee.position, Position::LoanOfficer);

    let session = bank.directory.login_employee("grace", PASSWORD).await?;
    assert!(session.is_employee());

    let err = bank
        .directory
        .register_employee(EmployeeRegistration {
            name: "Nobody".to_string(),
            position: Position::Teller,
            branch_id: 99,
            username: "nobody".to_string(),
            password: PASSWORD.to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound { entity: "Branch", .. }));

    Ok(())
}

#[tokio::test]
async fn test_locked_customer_cannot_log_in() -> Result<()> {
    let bank = test_bank().await?;
    let alice = bank.customer("Alice").await?;
    let teller = bank.teller("Tom").await?;

    let err = bank
        .directory
        .set_customer_lock(&alice, own_id(&alice), true)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    bank.directory
        .set_customer_lock(&teller, own_id(&alice), true)
        .await?;
    let err = bank
        .directory
        .login_customer("alice", PASSWORD)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::CredentialLocked(_)));

    bank.directory
        .set_customer_lock(&teller, own_id(&alice), false)
        .await?;
    bank.directory.login_customer("alice", PASSWORD).await?;

    let err = bank
        .directory
        .set_customer_lock(&teller, 999, true)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound { .. }));

    Ok(())
}

#[tokio::test]
async fn test_list_all_customers() -> Result<()> {
    let bank = test_bank().await?;
    let alice = bank.customer("Alice").await?;
    let bob = bank.customer("Bob").await?;
    let teller = bank.teller("Tom").await?;
    bank.open(&alice, 1000).await?;
    bank.open(&alice, 2000).await?;

    let rows = bank.directory.list_all_customers(&teller).await?;
    assert_eq!(rows.len(), 3);

    let alice_rows: Vec<_> = rows
        .iter()
        .filter(|r| r.customer_id == own_id(&alice))
        .collect();
    assert_eq!(alice_rows.len(), 2);
    assert!(alice_rows.iter().all(|r| r.account_id.is_some()));

    let bob_row = rows
        .iter()
        .find(|r| r.customer_id == own_id(&bob))
        .expect("bob is listed");
    assert_eq!(bob_row.account_id, None);
    assert_eq!(bob_row.balance, None);

    let err = bank.directory.list_all_customers(&alice).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    Ok(())
}

#[tokio::test]
async fn test_taken_username_inside_a_unit_is_reported() -> Result<()> {
    let bank = test_bank().await?;
    bank.customer("Alice").await?;

    let mut tx = bank.service.repository().begin().await?;
    let owner = Repository::insert_customer(&mut tx, "Mallory", None, None).await?;
    let inserted = Repository::insert_credential(
        &mut tx,
        CredentialKind::Customer,
        owner,
        "alice",
        "irrelevant",
    )
    .await?;
    assert!(!inserted);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_registrations_of_one_username() -> Result<()> {
    let bank = test_bank().await?;

    let mut handles = Vec::new();
    for i in 0..8 {
        let directory = bank.directory.clone();
        handles.push(tokio::spawn(async move {
            directory
                .register_customer(customer_form(&format!("Racer {}", i), "racer"))
                .await
        }));
    }

    let mut registered = 0;
    for handle in handles {
        match handle.await? {
            Ok(_) => registered += 1,
            Err(AppError::AlreadyExists { entity: "Username", .. }) => {}
            Err(e) => return Err(e.into()),
        }
    }
    assert_eq!(registered, 1);

    // The losers' customer rows were rolled back with their credentials.
    let teller = bank.teller("Tom").await?;
    let rows = bank.directory.list_all_customers(&teller).await?;
    assert_eq!(rows.len(), 1);

    bank.directory.login_customer("racer", PASSWORD).await?;

    Ok(())
}
