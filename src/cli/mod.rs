use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use uuid::Uuid;

use crate::application::{
    CustomerRegistration, EmployeeRegistration, LedgerService, MovementResult,
};
use crate::domain::{
    AccountId, Cents, CustomerId, LedgerEntry, Position, Session, format_cents, parse_cents,
};
use crate::storage::StoreConfig;

/// Bankdesk - branch banking front desk
#[derive(Parser)]
#[command(name = "bankdesk")]
#[command(about = "Customer accounts, deposits, withdrawals and transfers over an SQLite ledger")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(long, env = "BANKDESK_DATABASE", default_value = "bankdesk.db", global = true)]
    pub database: String,

    /// Milliseconds to wait for a busy database before giving up
    #[arg(long, env = "BANKDESK_BUSY_TIMEOUT_MS", default_value_t = 5000, global = true)]
    pub busy_timeout_ms: u64,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(flatten)]
    pub auth: AuthArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Credentials used to open a session for commands that need one.
#[derive(Args)]
pub struct AuthArgs {
    /// Username to log in with
    #[arg(short, long, env = "BANKDESK_USER", global = true)]
    pub user: Option<String>,

    /// Password to log in with
    #[arg(long, env = "BANKDESK_PASSWORD", hide_env_values = true, global = true)]
    pub password: Option<String>,

    /// Log in as an employee instead of a customer
    #[arg(long, global = true)]
    pub employee: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database and seed the default branches
    Init,

    /// Register a customer or employee
    #[command(subcommand)]
    Register(RegisterCommands),

    /// List branches
    Branches,

    /// Open a new account
    OpenAccount {
        /// Opening deposit (e.g., "50.00" or "50")
        #[arg(default_value = "0")]
        initial: String,

        /// Customer to open the account for (employees only)
        #[arg(long)]
        customer: Option<CustomerId>,
    },

    /// Deposit money into an account
    Deposit {
        /// Account ID
        account: AccountId,

        /// Amount to deposit (e.g., "50.00" or "50")
        amount: String,
    },

    /// Withdraw money from an account
    Withdraw {
        /// Account ID
        account: AccountId,

        /// Amount to withdraw (e.g., "50.00" or "50")
        amount: String,
    },

    /// Transfer money between accounts
    Transfer {
        /// Amount to transfer (e.g., "50.00" or "50")
        amount: String,

        /// Source account ID
        #[arg(long)]
        from: AccountId,

        /// Destination account ID
        #[arg(long)]
        to: AccountId,
    },

    /// Show the balance of an account
    Balance {
        /// Account ID
        account: AccountId,
    },

    /// List accounts
    Accounts {
        /// Customer whose accounts to list (employees only)
        #[arg(long)]
        customer: Option<CustomerId>,
    },

    /// Show the transaction log, newest first
    Log {
        /// Customer whose log to show (employees only)
        #[arg(long)]
        customer: Option<CustomerId>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show both legs of a transfer
    #[command(name = "show-transfer")]
    ShowTransfer {
        /// Transfer reference (UUID)
        reference: String,
    },

    /// List all customers and their accounts (employees only)
    Customers,

    /// Lock a customer's login (employees only)
    Lock {
        /// Customer ID
        customer: CustomerId,
    },

    /// Unlock a customer's login (employees only)
    Unlock {
        /// Customer ID
        customer: CustomerId,
    },

    /// Verify ledger integrity (employees only)
    Check,
}

#[derive(Subcommand)]
pub enum RegisterCommands {
    /// Register a new customer
    Customer {
        /// Full name
        name: String,

        /// Phone number
        #[arg(long)]
        phone: Option<String>,

        /// Postal address
        #[arg(long)]
        address: Option<String>,

        /// Username for the new login
        #[arg(long)]
        username: String,

        /// Password for the new login
        #[arg(long)]
        new_password: String,
    },

    /// Register a new employee
    Employee {
        /// Full name
        name: String,

        /// Position: Teller, Manager, Cashier, Loan Officer, Customer Service
        #[arg(long)]
        position: String,

        /// Branch ID (see `bankdesk branches`)
        #[arg(long)]
        branch: i64,

        /// Username for the new login
        #[arg(long)]
        username: String,

        /// Password for the new login
        #[arg(long)]
        new_password: String,
    },
}

fn parse_amount(amount: &str) -> Result<Cents> {
    parse_cents(amount).with_context(|| format!("Invalid amount '{}'. Use '50.00' or '50'", amount))
}

impl Cli {
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::new(&self.database)
            .with_busy_timeout(Duration::from_millis(self.busy_timeout_ms))
    }

    async fn login(&self, service: &LedgerService) -> Result<Session> {
        let (Some(user), Some(password)) = (&self.auth.user, &self.auth.password) else {
            bail!("This command requires --user and --password (or BANKDESK_USER / BANKDESK_PASSWORD)");
        };
        let directory = service.directory();
        let session = if self.auth.employee {
            directory.login_employee(user, password).await?
        } else {
            directory.login_customer(user, password).await?
        };
        Ok(session)
    }

    pub async fn run(self) -> Result<()> {
        let config = self.store_config();

        if let Commands::Init = self.command {
            LedgerService::init(&config).await?;
            println!("Database initialized: {}", self.database);
            return Ok(());
        }

        let service = LedgerService::connect(&config).await?;

        match &self.command {
            // Handled before connecting.
            Commands::Init => {}

            Commands::Register(cmd) => run_register_command(&service, cmd).await?,

            Commands::Branches => {
                let branches = service.directory().list_branches().await?;
                if branches.is_empty() {
                    println!("No branches found. Run `bankdesk init` first.");
                } else {
                    println!("{:<4} {:<20} ADDRESS", "ID", "NAME");
                    println!("{}", "-".repeat(44));
                    for b in branches {
                        println!("{:<4} {:<20} {}", b.id, b.name, b.address);
                    }
                }
            }

            Commands::OpenAccount { initial, customer } => {
                let session = self.login(&service).await?;
                let customer_id = resolve_customer(&session, *customer)?;
                let initial = parse_amount(initial)?;
                let opened = service.open_account(&session, customer_id, initial).await?;
                println!(
                    "Account opened: {} (Balance: {})",
                    opened.account.id,
                    format_cents(opened.account.balance)
                );
            }

            Commands::Deposit { account, amount } => {
                let session = self.login(&service).await?;
                let amount = parse_amount(amount)?;
                let result = service.deposit(&session, *account, amount).await?;
                print_movement("Deposited", "to", *account, &result);
            }

            Commands::Withdraw { account, amount } => {
                let session = self.login(&service).await?;
                let amount = parse_amount(amount)?;
                let result = service.withdraw(&session, *account, amount).await?;
                print_movement("Withdrew", "from", *account, &result);
            }

            Commands::Transfer { amount, from, to } => {
                if from == to {
                    bail!("Cannot transfer to the same account.");
                }
                let session = self.login(&service).await?;
                let amount = parse_amount(amount)?;
                let result = service.transfer(&session, *from, *to, amount).await?;
                println!(
                    "Transferred {} from {} -> {} (ref {})",
                    format_cents(result.amount()),
                    from,
                    to,
                    result.transfer_ref
                );
                println!(
                    "  Account {} balance: {}",
                    from,
                    format_cents(result.from_balance)
                );
            }

            Commands::Balance { account } => {
                let session = self.login(&service).await?;
                let balance = service.get_balance(&session, *account).await?;
                println!("Account {}: {}", account, format_cents(balance));
            }

            Commands::Accounts { customer } => {
                let session = self.login(&service).await?;
                let customer_id = resolve_customer(&session, *customer)?;
                let accounts = service.list_accounts(&session, customer_id).await?;
                if accounts.is_empty() {
                    println!("No accounts found.");
                } else {
                    println!("{:<10} {:>14} {:<12}", "ACCOUNT", "BALANCE", "OPENED");
                    println!("{}", "-".repeat(38));
                    for a in accounts {
                        println!(
                            "{:<10} {:>14} {:<12}",
                            a.id,
                            format_cents(a.balance),
                            a.open_date
                        );
                    }
                }
            }

            Commands::Log { customer, json } => {
                let session = self.login(&service).await?;
                let customer_id = resolve_customer(&session, *customer)?;
                let log = service.get_transaction_log(&session, customer_id).await?;
                if *json {
                    println!("{}", serde_json::to_string_pretty(&log)?);
                } else {
                    print_log(&log);
                }
            }

            Commands::ShowTransfer { reference } => {
                let session = self.login(&service).await?;
                let transfer_ref = Uuid::parse_str(reference)
                    .context("Invalid transfer reference (expected UUID)")?;
                let info = service.get_transfer(&session, transfer_ref).await?;
                println!("Transfer: {}", transfer_ref);
                println!(
                    "  Date:   {}",
                    info.debit.timestamp.format("%Y-%m-%d %H:%M:%S")
                );
                println!("  Amount: {}", format_cents(info.credit.amount));
                println!(
                    "  From:   account {} (entry #{})",
                    info.debit.account_id, info.debit.id
                );
                println!(
                    "  To:     account {} (entry #{})",
                    info.credit.account_id, info.credit.id
                );
            }

            Commands::Customers => {
                let session = self.login(&service).await?;
                let rows = service.directory().list_all_customers(&session).await?;
                if rows.is_empty() {
                    println!("No customers found.");
                } else {
                    println!(
                        "{:<10} {:<24} {:<10} {:>14}",
                        "CUSTOMER", "NAME", "ACCOUNT", "BALANCE"
                    );
                    println!("{}", "-".repeat(61));
                    for row in rows {
                        println!(
                            "{:<10} {:<24} {:<10} {:>14}",
                            row.customer_id,
                            row.customer_name,
                            row.account_id.map(|id| id.to_string()).unwrap_or_default(),
                            row.balance.map(format_cents).unwrap_or_default()
                        );
                    }
                }
            }

            Commands::Lock { customer } => {
                let session = self.login(&service).await?;
                service
                    .directory()
                    .set_customer_lock(&session, *customer, true)
                    .await?;
                println!("Locked login for customer {}", customer);
            }

            Commands::Unlock { customer } => {
                let session = self.login(&service).await?;
                service
                    .directory()
                    .set_customer_lock(&session, *customer, false)
                    .await?;
                println!("Unlocked login for customer {}", customer);
            }

            Commands::Check => {
                let session = self.login(&service).await?;
                let report = service.check_integrity(&session).await?;
                println!(
                    "Checked {} accounts and {} ledger entries.",
                    report.account_count, report.entry_count
                );
                if report.is_healthy() {
                    println!("Ledger is consistent.");
                } else {
                    for issue in report.issues() {
                        println!("  ✗ {}", issue);
                    }
                    bail!("Ledger integrity check failed");
                }
            }
        }

        Ok(())
    }
}

/// Customers always act as themselves; employees must name the customer.
fn resolve_customer(session: &Session, requested: Option<CustomerId>) -> Result<CustomerId> {
    match (session.customer_id(), requested) {
        (Some(own), None) => Ok(own),
        (Some(own), Some(id)) if id == own => Ok(own),
        (Some(_), Some(_)) => bail!("Customers can only act on their own accounts"),
        (None, Some(id)) => Ok(id),
        (None, None) => bail!("Employees must pass --customer"),
    }
}

async fn run_register_command(service: &LedgerService, cmd: &RegisterCommands) -> Result<()> {
    let directory = service.directory();
    match cmd {
        RegisterCommands::Customer {
            name,
            phone,
            address,
            username,
            new_password,
        } => {
            let customer = directory
                .register_customer(CustomerRegistration {
                    name: name.clone(),
                    phone: phone.clone(),
                    address: address.clone(),
                    username: username.clone(),
                    password: new_password.clone(),
                })
                .await?;
            println!("Customer registered! ID: {}", customer.id);
        }

        RegisterCommands::Employee {
            name,
            position,
            branch,
            username,
            new_password,
        } => {
            let position: Position = position.parse()?;
            let employee = directory
                .register_employee(EmployeeRegistration {
                    name: name.clone(),
                    position,
                    branch_id: *branch,
                    username: username.clone(),
                    password: new_password.clone(),
                })
                .await?;
            println!(
                "Employee registered! ID: {} ({}, branch {})",
                employee.id, employee.position, employee.branch_id
            );
        }
    }
    Ok(())
}

fn print_movement(verb: &str, preposition: &str, account: AccountId, result: &MovementResult) {
    println!(
        "{} {} {} account {}",
        verb,
        format_cents(result.entry.amount.abs()),
        preposition,
        account
    );
    println!("  New balance: {}", format_cents(result.balance));
}

fn print_log(log: &[LedgerEntry]) {
    if log.is_empty() {
        println!("No transactions found.");
        return;
    }

    println!(
        "{:<8} {:<10} {:<20} {:>14} {:<14} INFO",
        "ID", "ACCOUNT", "DATE", "AMOUNT", "TYPE"
    );
    println!("{}", "-".repeat(80));
    for entry in log {
        println!(
            "{:<8} {:<10} {:<20} {:>14} {:<14} {}",
            entry.id,
            entry.account_id,
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            format_cents(entry.amount),
            entry.entry_type.as_str(),
            entry.info
        );
    }
}
