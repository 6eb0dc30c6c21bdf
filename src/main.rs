use std::{path::PathBuf, process::ExitCode};

use anyhow::Context;
use brokerage::{
    config::DEFAULT_CONFIG_FILE, establish_connection, run_migrations, Config, Error, Mills,
    NewTransaction, OrderType, Password, SessionToken, Stock, User,
};
use clap::{ArgAction, Parser, Subcommand};
use diesel::SqliteConnection;
use tracing::{info, warn, Level};

#[derive(Parser, Debug)]
#[command(version, about = "Manage brokerage accounts, deposits and trades")]
struct Cli {
    /// Config file; `BROKERAGE_*` environment variables override it.
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create or upgrade the database schema.
    Migrate,
    Register {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Check credentials and print a fresh session token.
    Login {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
    },
    /// Invalidate a session token.
    Logout {
        #[arg(long)]
        token: String,
    },
    Whoami {
        #[arg(long)]
        token: String,
    },
    AddStock {
        #[arg(long)]
        ticker: String,
        #[arg(long)]
        name: Option<String>,
    },
    Deposit {
        #[arg(long)]
        username: String,
        /// Decimal amount, e.g. 1500.25; negative to withdraw.
        #[arg(long, allow_hyphen_values = true)]
        amount: Mills,
    },
    Trade {
        #[arg(long)]
        username: String,
        #[arg(long)]
        ticker: String,
        #[arg(long)]
        side: OrderType,
        #[arg(long)]
        shares: i64,
        /// Price per share.
        #[arg(long)]
        price: Mills,
    },
    /// Print buying power and holdings as JSON.
    Report {
        #[arg(long)]
        username: String,
    },
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;

    let level = match cli.verbose {
        0 => config.log_level.parse().unwrap_or(Level::INFO),
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let mut conn = establish_connection(&config.database_url)?;
    run(cli.command, &config, &mut conn)
}

fn run(command: Command, config: &Config, conn: &mut SqliteConnection) -> anyhow::Result<ExitCode> {
    match command {
        Command::Migrate => {
            run_migrations(conn)?;
            info!("database at '{}' is up to date", config.database_url);
        }
        Command::Register {
            username,
            email,
            password,
        } => {
            let mut user = User::with_password(username, email, password, config.bcrypt_cost)?;
            match user.save(conn) {
                Ok(()) => println!("{}", user.session_token()),
                Err(Error::Validation(violations)) => {
                    for message in violations.full_messages() {
                        eprintln!("{message}");
                    }
                    return Ok(ExitCode::FAILURE);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Command::Login { username, password } => {
            match User::find_by_credentials(conn, &username, &Password::from(password))? {
                Some(mut user) => println!("{}", user.reset_session_token(conn)?),
                None => {
                    warn!("failed login for '{username}'");
                    eprintln!("invalid username or password");
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
        Command::Logout { token } => {
            if let Some(mut user) = User::find_by_session_token(conn, &SessionToken(token))? {
                user.reset_session_token(conn)?;
            }
        }
        Command::Whoami { token } => match User::find_by_session_token(conn, &SessionToken(token))? {
            Some(user) => println!("{}", serde_json::to_string_pretty(&user)?),
            None => {
                eprintln!("no session for that token");
                return Ok(ExitCode::FAILURE);
            }
        },
        Command::AddStock { ticker, name } => {
            let stock = Stock::create(conn, &ticker, name.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&stock)?);
        }
        Command::Deposit { username, amount } => {
            let user = find_user(conn, &username)?;
            user.deposit(conn, amount)?;
            println!("{}", user.calculate_buying_power(conn)?);
        }
        Command::Trade {
            username,
            ticker,
            side,
            shares,
            price,
        } => {
            let user = find_user(conn, &username)?;
            let stock = Stock::find_by_ticker(conn, &ticker)?
                .with_context(|| format!("unknown ticker '{ticker}'"))?;
            let transaction = user.record_transaction(
                conn,
                NewTransaction {
                    stock_id: stock.id,
                    price,
                    num_shares: shares,
                    order_type: side,
                },
            )?;
            println!("{}", serde_json::to_string_pretty(&transaction)?);
        }
        Command::Report { username } => {
            let report = find_user(conn, &username)?.report(conn)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn find_user(conn: &mut SqliteConnection, username: &str) -> Result<User, Error> {
    User::find_by_username(conn, username)?.ok_or_else(|| Error::UserNotFound(username.to_string()))
}
