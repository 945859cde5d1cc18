use anyhow::{Context, anyhow};
use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::{
    Account, AccountId, Cents, CustomerId, IntegrityReport, LedgerEntry, NewEntry, Session,
    format_cents, verify_transfer_pair,
};
use crate::storage::{Repository, StoreConfig};

use super::{AppError, DirectoryService};

/// Application service for money movement and ledger reads.
/// This is the primary interface for any client (CLI, API, TUI, etc.).
///
/// Every deposit, withdrawal and transfer is one unit of atomicity: it runs
/// in its own database transaction whose first statement is the balance
/// write, so the store's write lock is held before any funds decision is
/// made and the unit is serializable against every other unit.
#[derive(Clone)]
pub struct LedgerService {
    repo: Repository,
}

/// Result of a deposit or withdrawal
#[derive(Debug, Clone)]
pub struct MovementResult {
    pub entry: LedgerEntry,
    /// Balance of the account once the unit committed
    pub balance: Cents,
}

/// Result of a committed transfer
#[derive(Debug, Clone)]
pub struct TransferResult {
    pub transfer_ref: Uuid,
    pub debit: LedgerEntry,
    pub credit: LedgerEntry,
    /// Balance of the source account once the unit committed
    pub from_balance: Cents,
}

impl TransferResult {
    pub fn amount(&self) -> Cents {
        self.credit.amount
    }
}

/// A newly opened account and its opening deposit, if any
#[derive(Debug, Clone)]
pub struct OpenedAccount {
    pub account: Account,
    pub opening_entry: Option<LedgerEntry>,
}

/// Both legs of a committed transfer
#[derive(Debug, Clone)]
pub struct TransferInfo {
    pub debit: LedgerEntry,
    pub credit: LedgerEntry,
}

fn validate_amount(amount: Cents) -> Result<(), AppError> {
    if amount <= 0 {
        return Err(AppError::Validation(format!(
            "amount must be positive, got {}",
            amount
        )));
    }
    Ok(())
}

pub(crate) fn validate_id(kind: &str, id: i64) -> Result<(), AppError> {
    if id <= 0 {
        return Err(AppError::Validation(format!(
            "{} id must be positive, got {}",
            kind, id
        )));
    }
    Ok(())
}

/// Log the outcome of a unit: rejections at warn, store failures at error.
fn trace_failure<T>(operation: &str, session: &Session, result: &Result<T, AppError>) {
    match result {
        Err(e) if e.is_business_rule() => {
            warn!(session = %session.id, operation, "rejected: {}", e)
        }
        Err(e) => error!(session = %session.id, operation, "rolled back: {}", e),
        Ok(_) => {}
    }
}

impl LedgerService {
    /// Create a new ledger service with the given repository.
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// Create the database if needed, migrate it and seed default branches.
    pub async fn init(config: &StoreConfig) -> Result<Self, AppError> {
        let config = config.clone().create_if_missing(true);
        let repo = Repository::init(&config).await?;
        let service = Self::new(repo);
        service.directory().ensure_default_branches().await?;
        Ok(service)
    }

    /// Connect to an existing database.
    pub async fn connect(config: &StoreConfig) -> Result<Self, AppError> {
        let repo = Repository::connect(config).await?;
        Ok(Self::new(repo))
    }

    /// Registration, login and customer administration over the same store.
    pub fn directory(&self) -> DirectoryService {
        DirectoryService::new(self.repo.clone())
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    // ========================
    // Money movement
    // ========================

    /// Add `amount` to an account and record a `deposit` entry.
    /// Fails with `Validation` when the balance would no longer fit in cents.
    pub async fn deposit(
        &self,
        session: &Session,
        account_id: AccountId,
        amount: Cents,
    ) -> Result<MovementResult, AppError> {
        let result = self.deposit_unit(session, account_id, amount).await;
        trace_failure("deposit", session, &result);
        result
    }

    async fn deposit_unit(
        &self,
        session: &Session,
        account_id: AccountId,
        amount: Cents,
    ) -> Result<MovementResult, AppError> {
        validate_amount(amount)?;
        self.accessible_account(session, account_id).await?;

        let mut tx = self.repo.begin().await?;
        if !Repository::credit_if_fits(&mut tx, account_id, amount).await? {
            return Err(refused_credit(&mut tx, account_id, amount).await);
        }
        let entry = Repository::append_entry(
            &mut tx,
            NewEntry::deposit(account_id, amount, "Deposit", Utc::now()),
        )
        .await?;
        let balance = balance_after(&mut tx, account_id).await?;
        tx.commit().await.context("Failed to commit deposit")?;

        info!(session = %session.id, account_id, amount, balance, "deposit committed");
        Ok(MovementResult { entry, balance })
    }

    /// Take `amount` out of an account and record a `withdraw` entry.
    /// Fails with `InsufficientFunds` and changes nothing when the balance is short.
    pub async fn withdraw(
        &self,
        session: &Session,
        account_id: AccountId,
        amount: Cents,
    ) -> Result<MovementResult, AppError> {
        let result = self.withdraw_unit(session, account_id, amount).await;
        trace_failure("withdraw", session, &result);
        result
    }

    async fn withdraw_unit(
        &self,
        session: &Session,
        account_id: AccountId,
        amount: Cents,
    ) -> Result<MovementResult, AppError> {
        validate_amount(amount)?;
        self.accessible_account(session, account_id).await?;

        let mut tx = self.repo.begin().await?;
        if !Repository::debit_if_covered(&mut tx, account_id, amount).await? {
            return Err(refused_debit(&mut tx, account_id, amount).await);
        }
        let entry =
            Repository::append_entry(&mut tx, NewEntry::withdraw(account_id, amount, Utc::now()))
                .await?;
        let balance = balance_after(&mut tx, account_id).await?;
        tx.commit().await.context("Failed to commit withdrawal")?;

        info!(session = %session.id, account_id, amount, balance, "withdrawal committed");
        Ok(MovementResult { entry, balance })
    }

    /// Move `amount` between two accounts.
    ///
    /// The debit, its `transfer_out` entry, the credit and its `transfer_in`
    /// entry become visible together or not at all. Self-transfers are not
    /// rejected here; callers are expected to refuse them.
    pub async fn transfer(
        &self,
        session: &Session,
        from: AccountId,
        to: AccountId,
        amount: Cents,
    ) -> Result<TransferResult, AppError> {
        let result = self.transfer_unit(session, from, to, amount).await;
        trace_failure("transfer", session, &result);
        result
    }

    async fn transfer_unit(
        &self,
        session: &Session,
        from: AccountId,
        to: AccountId,
        amount: Cents,
    ) -> Result<TransferResult, AppError> {
        validate_amount(amount)?;
        self.accessible_account(session, from).await?;
        validate_id("account", to)?;
        if self.repo.get_account(to).await?.is_none() {
            return Err(AppError::not_found("Account", to));
        }

        let transfer_ref = Uuid::new_v4();
        let (out, inc) = NewEntry::transfer_pair(from, to, amount, transfer_ref, Utc::now());

        let mut tx = self.repo.begin().await?;

        // Balance check and debit in one statement.
        if !Repository::debit_if_covered(&mut tx, from, amount).await? {
            return Err(refused_debit(&mut tx, from, amount).await);
        }
        let debit = Repository::append_entry(&mut tx, out).await?;

        // Any failure from here on drops `tx`, undoing the debit.
        if !Repository::credit_if_fits(&mut tx, to, amount).await? {
            return Err(refused_credit(&mut tx, to, amount).await);
        }
        let credit = Repository::append_entry(&mut tx, inc).await?;

        let from_balance = balance_after(&mut tx, from).await?;
        tx.commit().await.context("Failed to commit transfer")?;

        info!(
            session = %session.id,
            %transfer_ref,
            from,
            to,
            amount,
            "transfer committed"
        );
        Ok(TransferResult {
            transfer_ref,
            debit,
            credit,
            from_balance,
        })
    }

    /// Open an account for a customer, with an optional opening deposit
    /// recorded in the same unit.
    pub async fn open_account(
        &self,
        session: &Session,
        customer_id: CustomerId,
        initial_deposit: Cents,
    ) -> Result<OpenedAccount, AppError> {
        let result = self
            .open_account_unit(session, customer_id, initial_deposit)
            .await;
        trace_failure("open_account", session, &result);
        result
    }

    async fn open_account_unit(
        &self,
        session: &Session,
        customer_id: CustomerId,
        initial_deposit: Cents,
    ) -> Result<OpenedAccount, AppError> {
        if initial_deposit < 0 {
            return Err(AppError::Validation(format!(
                "initial deposit cannot be negative, got {}",
                initial_deposit
            )));
        }
        self.accessible_customer(session, customer_id).await?;

        let open_date = Utc::now().date_naive();
        let mut tx = self.repo.begin().await?;
        let account_id = Repository::insert_account(&mut tx, customer_id, open_date).await?;

        let opening_entry = if initial_deposit > 0 {
            if !Repository::credit_if_fits(&mut tx, account_id, initial_deposit).await? {
                return Err(refused_credit(&mut tx, account_id, initial_deposit).await);
            }
            let entry = NewEntry::deposit(account_id, initial_deposit, "Opening deposit", Utc::now());
            Some(Repository::append_entry(&mut tx, entry).await?)
        } else {
            None
        };
        tx.commit().await.context("Failed to commit account opening")?;

        info!(session = %session.id, customer_id, account_id, initial_deposit, "account opened");
        Ok(OpenedAccount {
            account: Account {
                id: account_id,
                customer_id,
                balance: initial_deposit,
                open_date,
            },
            opening_entry,
        })
    }

    // ========================
    // Reads
    // ========================

    /// Current balance of one account.
    pub async fn get_balance(
        &self,
        session: &Session,
        account_id: AccountId,
    ) -> Result<Cents, AppError> {
        Ok(self.accessible_account(session, account_id).await?.balance)
    }

    /// Accounts owned by a customer, ordered by account id.
    pub async fn list_accounts(
        &self,
        session: &Session,
        customer_id: CustomerId,
    ) -> Result<Vec<Account>, AppError> {
        self.accessible_customer(session, customer_id).await?;
        Ok(self.repo.list_accounts_for_customer(customer_id).await?)
    }

    /// Ledger entries of every account a customer owns, newest first.
    /// Empty when the customer has no activity.
    pub async fn get_transaction_log(
        &self,
        session: &Session,
        customer_id: CustomerId,
    ) -> Result<Vec<LedgerEntry>, AppError> {
        self.accessible_customer(session, customer_id).await?;
        Ok(self.repo.list_entries_for_customer(customer_id).await?)
    }

    /// Ledger entries of one account, oldest first.
    pub async fn get_account_history(
        &self,
        session: &Session,
        account_id: AccountId,
    ) -> Result<Vec<LedgerEntry>, AppError> {
        self.accessible_account(session, account_id).await?;
        Ok(self.repo.list_entries_for_account(account_id).await?)
    }

    /// Both legs of a transfer, checked to form a balanced pair.
    /// Visible to employees and to the owners of either account.
    pub async fn get_transfer(
        &self,
        session: &Session,
        transfer_ref: Uuid,
    ) -> Result<TransferInfo, AppError> {
        let mut legs = self.repo.list_entries_for_transfer(transfer_ref).await?;
        if legs.is_empty() {
            return Err(AppError::not_found("Transfer", transfer_ref));
        }
        if legs.len() != 2 {
            return Err(anyhow!("transfer {} has {} ledger entries", transfer_ref, legs.len()).into());
        }

        let mut visible = session.is_employee();
        for leg in &legs {
            if let Some(account) = self.repo.get_account(leg.account_id).await? {
                visible |= session.can_access_account(&account);
            }
        }
        if !visible {
            return Err(AppError::Forbidden(format!(
                "transfer {} does not involve your accounts",
                transfer_ref
            )));
        }

        let credit = legs.remove(1);
        let debit = legs.remove(0);
        verify_transfer_pair(&debit, &credit)
            .with_context(|| format!("transfer {} is inconsistent", transfer_ref))?;

        Ok(TransferInfo { debit, credit })
    }

    // ========================
    // Integrity
    // ========================

    /// Check that balances agree with the ledger and every transfer is a
    /// balanced pair. Employees only.
    pub async fn check_integrity(&self, session: &Session) -> Result<IntegrityReport, AppError> {
        if !session.is_employee() {
            return Err(AppError::Forbidden(
                "integrity checks are limited to employees".to_string(),
            ));
        }

        let stats = self.repo.get_integrity_stats().await?;
        let report = IntegrityReport {
            account_count: stats.account_count,
            entry_count: stats.entry_count,
            balance_mismatches: stats.balance_mismatches,
            negative_balances: stats.negative_balances,
            unpaired_transfers: stats.unpaired_transfers,
            unlinked_transfer_legs: stats.unlinked_transfer_legs,
        };

        if !report.is_healthy() {
            error!(session = %session.id, issues = report.issues().len(), "ledger integrity check failed");
        }
        Ok(report)
    }

    // ========================
    // Access checks
    // ========================

    async fn accessible_account(
        &self,
        session: &Session,
        account_id: AccountId,
    ) -> Result<Account, AppError> {
        validate_id("account", account_id)?;
        let account = self
            .repo
            .get_account(account_id)
            .await?
            .ok_or_else(|| AppError::not_found("Account", account_id))?;

        if !session.can_access_account(&account) {
            return Err(AppError::Forbidden(format!(
                "account {} belongs to another customer",
                account_id
            )));
        }
        Ok(account)
    }

    async fn accessible_customer(
        &self,
        session: &Session,
        customer_id: CustomerId,
    ) -> Result<(), AppError> {
        validate_id("customer", customer_id)?;
        if !session.can_access_customer(customer_id) {
            return Err(AppError::Forbidden(format!(
                "customer {} is not you",
                customer_id
            )));
        }
        if self.repo.get_customer(customer_id).await?.is_none() {
            return Err(AppError::not_found("Customer", customer_id));
        }
        Ok(())
    }
}

/// Balance as seen inside the unit, after its own writes.
async fn balance_after(conn: &mut SqliteConnection, account_id: AccountId) -> Result<Cents, AppError> {
    Repository::balance_in(conn, account_id)
        .await?
        .ok_or_else(|| AppError::not_found("Account", account_id))
}

/// Explain why a guarded debit touched no row.
async fn refused_debit(conn: &mut SqliteConnection, account_id: AccountId, amount: Cents) -> AppError {
    match Repository::balance_in(conn, account_id).await {
        Ok(Some(balance)) => AppError::InsufficientFunds {
            account_id,
            balance,
            required: amount,
        },
        Ok(None) => AppError::not_found("Account", account_id),
        Err(e) => e.into(),
    }
}

/// Explain why a guarded credit touched no row.
async fn refused_credit(conn: &mut SqliteConnection, account_id: AccountId, amount: Cents) -> AppError {
    match Repository::balance_in(conn, account_id).await {
        Ok(Some(balance)) => AppError::Validation(format!(
            "crediting {} would overflow the balance of account {} ({})",
            format_cents(amount),
            account_id,
            format_cents(balance)
        )),
        Ok(None) => AppError::not_found("Account", account_id),
        Err(e) => e.into(),
    }
}
