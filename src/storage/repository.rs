use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool, Transaction};
use uuid::Uuid;

use crate::domain::{
    Account, AccountId, BalanceMismatch, Branch, BranchId, Cents, Customer, CustomerAccountRow,
    CustomerId, DEFAULT_BRANCHES, EmployeeId, LedgerEntry, NewEntry, Position,
};

use super::{MIGRATION_001_INITIAL, StoreConfig};

/// Which credential table a login goes against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    Customer,
    Employee,
}

/// A credential row joined with its owner's display data.
#[derive(Debug, Clone)]
pub struct CredentialRecord {
    pub owner_id: i64,
    pub owner_name: String,
    pub password_hash: String,
    pub is_locked: bool,
    pub last_login: Option<DateTime<Utc>>,
    /// Only set for employees
    pub branch_id: Option<BranchId>,
}

/// Raw figures for ledger integrity verification.
#[derive(Debug, Clone)]
pub struct IntegrityStats {
    pub account_count: i64,
    pub entry_count: i64,
    pub balance_mismatches: Vec<BalanceMismatch>,
    pub negative_balances: Vec<AccountId>,
    pub unpaired_transfers: Vec<Uuid>,
    pub unlinked_transfer_legs: i64,
}

const ENTRY_COLUMNS: &str = "t.transaction_id, t.account_id, t.transaction_date, t.amount, \
     t.transaction_type, t.transaction_info, t.counterparty_account_id, t.transfer_ref";

/// Timestamps are stored as fixed-width RFC 3339 so text order is time order.
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("Invalid timestamp: {}", s))?
        .with_timezone(&Utc))
}

/// Repository for persisting and querying the bank's tables.
///
/// Reads go straight to the pool. Writes that belong to a unit of atomicity
/// take the unit's connection, obtained from [`Repository::begin`].
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a connection pool to the database described by `config`.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(config.connect_options())
            .await
            .with_context(|| format!("Failed to open database {}", config.path.display()))?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(config: &StoreConfig) -> Result<Self> {
        let repo = Self::connect(config).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Start a unit of atomicity. The transaction rolls back when dropped
    /// without an explicit commit.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        self.pool
            .begin()
            .await
            .context("Failed to start database transaction")
    }

    // ========================
    // Branch operations
    // ========================

    /// Insert the default branches when the table is empty.
    /// Returns the number of branches inserted.
    pub async fn ensure_default_branches(&self) -> Result<usize> {
        // One INSERT ... SELECT so the emptiness check and the write are atomic.
        let [(n1, a1), (n2, a2), (n3, a3)] = DEFAULT_BRANCHES;
        let result = sqlx::query(
            r#"
            INSERT INTO branches (branch_name, address)
            SELECT column1, column2 FROM (VALUES (?, ?), (?, ?), (?, ?))
            WHERE NOT EXISTS (SELECT 1 FROM branches)
            "#,
        )
        .bind(n1)
        .bind(a1)
        .bind(n2)
        .bind(a2)
        .bind(n3)
        .bind(a3)
        .execute(&self.pool)
        .await
        .context("Failed to seed branches")?;

        Ok(result.rows_affected() as usize)
    }

    pub async fn list_branches(&self) -> Result<Vec<Branch>> {
        let rows = sqlx::query(
            "SELECT branch_id, branch_name, address FROM branches ORDER BY branch_id",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list branches")?;

        Ok(rows.iter().map(Self::row_to_branch).collect())
    }

    pub async fn get_branch(&self, id: BranchId) -> Result<Option<Branch>> {
        let row = sqlx::query(
            "SELECT branch_id, branch_name, address FROM branches WHERE branch_id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch branch")?;

        Ok(row.as_ref().map(Self::row_to_branch))
    }

    fn row_to_branch(row: &SqliteRow) -> Branch {
        Branch {
            id: row.get("branch_id"),
            name: row.get("branch_name"),
            address: row.get("address"),
        }
    }

    // ========================
    // Customer and employee operations
    // ========================

    pub async fn insert_customer(
        conn: &mut SqliteConnection,
        name: &str,
        phone: Option<&str>,
        address: Option<&str>,
    ) -> Result<CustomerId> {
        let row = sqlx::query(
            r#"
            INSERT INTO customers (customer_name, phone_number, address)
            VALUES (?, ?, ?)
            RETURNING customer_id
            "#,
        )
        .bind(name)
        .bind(phone)
        .bind(address)
        .fetch_one(&mut *conn)
        .await
        .context("Failed to save customer")?;

        Ok(row.get("customer_id"))
    }

    pub async fn insert_employee(
        conn: &mut SqliteConnection,
        name: &str,
        position: Position,
        branch_id: BranchId,
    ) -> Result<EmployeeId> {
        let row = sqlx::query(
            r#"
            INSERT INTO employees (employee_name, position, branch_id)
            VALUES (?, ?, ?)
            RETURNING employee_id
            "#,
        )
        .bind(name)
        .bind(position.as_str())
        .bind(branch_id)
        .fetch_one(&mut *conn)
        .await
        .context("Failed to save employee")?;

        Ok(row.get("employee_id"))
    }

    pub async fn get_customer(&self, id: CustomerId) -> Result<Option<Customer>> {
        let row = sqlx::query(
            "SELECT customer_id, customer_name, phone_number, address FROM customers WHERE customer_id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch customer")?;

        Ok(row.map(|row| Customer {
            id: row.get("customer_id"),
            name: row.get("customer_name"),
            phone: row.get("phone_number"),
            address: row.get("address"),
        }))
    }

    /// Customers left-joined with their accounts, one row per account.
    pub async fn list_customers_with_accounts(&self) -> Result<Vec<CustomerAccountRow>> {
        let rows = sqlx::query(
            r#"
            SELECT c.customer_id, c.customer_name, a.account_id, a.balance
            FROM customers c
            LEFT JOIN accounts a ON a.customer_id = c.customer_id
            ORDER BY c.customer_id, a.account_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list customers")?;

        Ok(rows
            .iter()
            .map(|row| CustomerAccountRow {
                customer_id: row.get("customer_id"),
                customer_name: row.get("customer_name"),
                account_id: row.get("account_id"),
                balance: row.get("balance"),
            })
            .collect())
    }

    // ========================
    // Credential operations
    // ========================

    pub async fn username_exists(&self, kind: CredentialKind, username: &str) -> Result<bool> {
        let query = match kind {
            CredentialKind::Customer => {
                "SELECT COUNT(*) AS count FROM login_credentials WHERE username = ?"
            }
            CredentialKind::Employee => {
                "SELECT COUNT(*) AS count FROM employee_credentials WHERE username = ?"
            }
        };
        let count: i64 = sqlx::query(query)
            .bind(username)
            .fetch_one(&self.pool)
            .await
            .context("Failed to check username")?
            .get("count");
        Ok(count > 0)
    }

    /// Returns false when the username is already taken.
    pub async fn insert_credential(
        conn: &mut SqliteConnection,
        kind: CredentialKind,
        owner_id: i64,
        username: &str,
        password_hash: &str,
    ) -> Result<bool> {
        let query = match kind {
            CredentialKind::Customer => {
                "INSERT INTO login_credentials (customer_id, username, password_hash) VALUES (?, ?, ?)"
            }
            CredentialKind::Employee => {
                "INSERT INTO employee_credentials (employee_id, username, password_hash) VALUES (?, ?, ?)"
            }
        };
        let result = sqlx::query(query)
            .bind(owner_id)
            .bind(username)
            .bind(password_hash)
            .execute(&mut *conn)
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(false),
            Err(e) => Err(e).context("Failed to save credentials"),
        }
    }

    pub async fn find_credential(
        &self,
        kind: CredentialKind,
        username: &str,
    ) -> Result<Option<CredentialRecord>> {
        let query = match kind {
            CredentialKind::Customer => {
                r#"
                SELECT lc.customer_id AS owner_id, c.customer_name AS owner_name,
                       lc.password_hash, lc.is_locked, lc.last_login, NULL AS branch_id
                FROM login_credentials lc
                JOIN customers c ON c.customer_id = lc.customer_id
                WHERE lc.username = ?
                "#
            }
            CredentialKind::Employee => {
                r#"
                SELECT ec.employee_id AS owner_id, e.employee_name AS owner_name,
                       ec.password_hash, ec.is_locked, ec.last_login, e.branch_id
                FROM employee_credentials ec
                JOIN employees e ON e.employee_id = ec.employee_id
                WHERE ec.username = ?
                "#
            }
        };

        let row = sqlx::query(query)
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch credentials")?;

        match row {
            Some(row) => {
                let last_login: Option<String> = row.get("last_login");
                Ok(Some(CredentialRecord {
                    owner_id: row.get("owner_id"),
                    owner_name: row.get("owner_name"),
                    password_hash: row.get("password_hash"),
                    is_locked: row.get("is_locked"),
                    last_login: last_login.as_deref().map(parse_timestamp).transpose()?,
                    branch_id: row.get("branch_id"),
                }))
            }
            None => Ok(None),
        }
    }

    pub async fn record_login(
        &self,
        kind: CredentialKind,
        owner_id: i64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let query = match kind {
            CredentialKind::Customer => {
                "UPDATE login_credentials SET last_login = ? WHERE customer_id = ?"
            }
            CredentialKind::Employee => {
                "UPDATE employee_credentials SET last_login = ? WHERE employee_id = ?"
            }
        };
        sqlx::query(query)
            .bind(format_timestamp(at))
            .bind(owner_id)
            .execute(&self.pool)
            .await
            .context("Failed to record login")?;
        Ok(())
    }

    /// Set the lock flag. Returns false when no credential exists for the owner.
    pub async fn set_locked(&self, kind: CredentialKind, owner_id: i64, locked: bool) -> Result<bool> {
        let query = match kind {
            CredentialKind::Customer => {
                "UPDATE login_credentials SET is_locked = ? WHERE customer_id = ?"
            }
            CredentialKind::Employee => {
                "UPDATE employee_credentials SET is_locked = ? WHERE employee_id = ?"
            }
        };
        let result = sqlx::query(query)
            .bind(locked)
            .bind(owner_id)
            .execute(&self.pool)
            .await
            .context("Failed to update lock flag")?;
        Ok(result.rows_affected() > 0)
    }

    // ========================
    // Account operations
    // ========================

    pub async fn insert_account(
        conn: &mut SqliteConnection,
        customer_id: CustomerId,
        open_date: NaiveDate,
    ) -> Result<AccountId> {
        let row = sqlx::query(
            r#"
            INSERT INTO accounts (customer_id, balance, open_date)
            VALUES (?, 0, ?)
            RETURNING account_id
            "#,
        )
        .bind(customer_id)
        .bind(open_date.to_string())
        .fetch_one(&mut *conn)
        .await
        .context("Failed to save account")?;

        Ok(row.get("account_id"))
    }

    pub async fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        let row = sqlx::query(
            "SELECT account_id, customer_id, balance, open_date FROM accounts WHERE account_id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch account")?;

        row.as_ref().map(Self::row_to_account).transpose()
    }

    pub async fn list_accounts_for_customer(&self, customer_id: CustomerId) -> Result<Vec<Account>> {
        let rows = sqlx::query(
            r#"
            SELECT account_id, customer_id, balance, open_date
            FROM accounts
            WHERE customer_id = ?
            ORDER BY account_id
            "#,
        )
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list accounts")?;

        rows.iter().map(Self::row_to_account).collect()
    }

    /// Debit `amount` only if the balance covers it, as one statement.
    /// Returns false when the account is missing or short of funds.
    pub async fn debit_if_covered(
        conn: &mut SqliteConnection,
        account_id: AccountId,
        amount: Cents,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET balance = balance - ?
            WHERE account_id = ? AND balance >= ?
            "#,
        )
        .bind(amount)
        .bind(account_id)
        .bind(amount)
        .execute(&mut *conn)
        .await
        .context("Failed to debit account")?;

        Ok(result.rows_affected() == 1)
    }

    /// Credit `amount` only if the new balance still fits in an `i64`.
    /// Returns false when the account is missing or would overflow.
    ///
    /// SQLite turns an overflowing integer sum into a REAL instead of
    /// failing, so the bound has to be checked before adding.
    pub async fn credit_if_fits(
        conn: &mut SqliteConnection,
        account_id: AccountId,
        amount: Cents,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET balance = balance + ?
            WHERE account_id = ? AND balance <= ?
            "#,
        )
        .bind(amount)
        .bind(account_id)
        .bind(Cents::MAX - amount)
        .execute(&mut *conn)
        .await
        .context("Failed to credit account")?;

        Ok(result.rows_affected() == 1)
    }

    /// Balance as seen from inside a unit.
    pub async fn balance_in(
        conn: &mut SqliteConnection,
        account_id: AccountId,
    ) -> Result<Option<Cents>> {
        let row = sqlx::query("SELECT balance FROM accounts WHERE account_id = ?")
            .bind(account_id)
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to read balance")?;

        Ok(row.map(|row| row.get("balance")))
    }

    fn row_to_account(row: &SqliteRow) -> Result<Account> {
        let open_date: String = row.get("open_date");
        Ok(Account {
            id: row.get("account_id"),
            customer_id: row.get("customer_id"),
            balance: row.get("balance"),
            open_date: open_date
                .parse()
                .with_context(|| format!("Invalid open_date: {}", open_date))?,
        })
    }

    // ========================
    // Ledger operations
    // ========================

    /// Append one ledger row and return it with its assigned id.
    pub async fn append_entry(conn: &mut SqliteConnection, entry: NewEntry) -> Result<LedgerEntry> {
        let row = sqlx::query(
            r#"
            INSERT INTO transactions
                (account_id, transaction_date, amount, transaction_type, transaction_info,
                 counterparty_account_id, transfer_ref)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING transaction_id
            "#,
        )
        .bind(entry.account_id)
        .bind(format_timestamp(entry.timestamp))
        .bind(entry.amount)
        .bind(entry.entry_type.as_str())
        .bind(&entry.info)
        .bind(entry.counterparty)
        .bind(entry.transfer_ref.map(|r| r.to_string()))
        .fetch_one(&mut *conn)
        .await
        .with_context(|| format!("Failed to record {} entry", entry.entry_type))?;

        Ok(entry.into_entry(row.get("transaction_id")))
    }

    /// All ledger rows of a customer's accounts, newest first.
    pub async fn list_entries_for_customer(&self, customer_id: CustomerId) -> Result<Vec<LedgerEntry>> {
        let query = format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM transactions t
            JOIN accounts a ON a.account_id = t.account_id
            WHERE a.customer_id = ?
            ORDER BY t.transaction_date DESC, t.transaction_id DESC
            "#
        );
        let rows = sqlx::query(&query)
            .bind(customer_id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list transactions for customer")?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    /// Ledger rows of one account, oldest first.
    pub async fn list_entries_for_account(&self, account_id: AccountId) -> Result<Vec<LedgerEntry>> {
        let query = format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM transactions t
            WHERE t.account_id = ?
            ORDER BY t.transaction_date, t.transaction_id
            "#
        );
        let rows = sqlx::query(&query)
            .bind(account_id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list transactions for account")?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    /// Both legs of a transfer, debit first.
    pub async fn list_entries_for_transfer(&self, transfer_ref: Uuid) -> Result<Vec<LedgerEntry>> {
        let query = format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM transactions t
            WHERE t.transfer_ref = ?
            ORDER BY t.amount, t.transaction_id
            "#
        );
        let rows = sqlx::query(&query)
            .bind(transfer_ref.to_string())
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch transfer")?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    fn row_to_entry(row: &SqliteRow) -> Result<LedgerEntry> {
        let timestamp: String = row.get("transaction_date");
        let entry_type: String = row.get("transaction_type");
        let transfer_ref: Option<String> = row.get("transfer_ref");

        Ok(LedgerEntry {
            id: row.get("transaction_id"),
            account_id: row.get("account_id"),
            timestamp: parse_timestamp(&timestamp)?,
            amount: row.get("amount"),
            entry_type: entry_type.parse()?,
            info: row.get("transaction_info"),
            counterparty: row.get("counterparty_account_id"),
            transfer_ref: transfer_ref
                .map(|s| Uuid::parse_str(&s))
                .transpose()
                .context("Invalid transfer reference")?,
        })
    }

    // ========================
    // Integrity
    // ========================

    /// Gather the figures needed to judge ledger consistency.
    pub async fn get_integrity_stats(&self) -> Result<IntegrityStats> {
        let account_count: i64 = sqlx::query("SELECT COUNT(*) AS count FROM accounts")
            .fetch_one(&self.pool)
            .await?
            .get("count");

        let entry_count: i64 = sqlx::query("SELECT COUNT(*) AS count FROM transactions")
            .fetch_one(&self.pool)
            .await?
            .get("count");

        let balance_mismatches = sqlx::query(
            r#"
            SELECT a.account_id, a.balance, COALESCE(SUM(t.amount), 0) AS ledger
            FROM accounts a
            LEFT JOIN transactions t ON t.account_id = a.account_id
            GROUP BY a.account_id, a.balance
            HAVING a.balance != COALESCE(SUM(t.amount), 0)
            ORDER BY a.account_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to compare balances with ledger")?
        .iter()
        .map(|row| BalanceMismatch {
            account_id: row.get("account_id"),
            stored: row.get("balance"),
            ledger: row.get("ledger"),
        })
        .collect();

        let negative_balances = sqlx::query(
            "SELECT account_id FROM accounts WHERE balance < 0 ORDER BY account_id",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to check for negative balances")?
        .iter()
        .map(|row| row.get("account_id"))
        .collect();

        let unpaired_rows = sqlx::query(
            r#"
            SELECT transfer_ref
            FROM transactions
            WHERE transfer_ref IS NOT NULL
            GROUP BY transfer_ref
            HAVING COUNT(*) != 2
                OR SUM(amount) != 0
                OR SUM(transaction_type = 'transfer_out') != 1
                OR SUM(transaction_type = 'transfer_in') != 1
            ORDER BY transfer_ref
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to check transfer pairing")?;

        let unpaired_transfers = unpaired_rows
            .iter()
            .map(|row| {
                let s: String = row.get("transfer_ref");
                Uuid::parse_str(&s).context("Invalid transfer reference")
            })
            .collect::<Result<Vec<_>>>()?;

        let unlinked_transfer_legs: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) AS count
            FROM transactions
            WHERE transaction_type IN ('transfer_out', 'transfer_in')
              AND (transfer_ref IS NULL OR counterparty_account_id IS NULL)
            "#,
        )
        .fetch_one(&self.pool)
        .await?
        .get("count");

        Ok(IntegrityStats {
            account_count,
            entry_count,
            balance_mismatches,
            negative_balances,
            unpaired_transfers,
            unlinked_transfer_legs,
        })
    }
}
