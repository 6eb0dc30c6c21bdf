use diesel::{Connection, RunQueryDsl, SqliteConnection};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tracing::{debug, error};

pub mod accounts;
pub mod assets;
pub mod auth;
pub mod config;
pub mod ledger;
#[rustfmt::skip]
pub mod schema;
pub mod types;

pub use accounts::{User, Violations};
pub use assets::{Stock, StockLookup};
pub use config::Config;
pub use ledger::{Deposit, Holdings, NewTransaction, Report, Transaction};
pub use types::{Mills, OrderType, Password, SessionToken};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("couldn't read config: {0}")]
    Config(#[from] figment::Error),
    #[error("couldn't open database: {0}")]
    Connection(#[from] diesel::ConnectionError),
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("couldn't run migrations: {0}")]
    Migration(Box<dyn std::error::Error + Send + Sync>),
    #[error("password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),
    #[error("validation failed: {0}")]
    Validation(Violations),
    #[error("no stock with id {0}")]
    StockNotFound(i64),
    #[error("no user named '{0}'")]
    UserNotFound(String),
    #[error("record has not been saved yet")]
    NotPersisted,
    #[error("amount out of range")]
    Overflow,
}

/// Opens a SQLite connection with foreign key enforcement turned on.
pub fn establish_connection(database_url: &str) -> Result<SqliteConnection, Error> {
    let mut conn = SqliteConnection::establish(database_url).map_err(|e| {
        error!("error connecting to '{database_url}': {e}");
        e
    })?;
    diesel::sql_query("PRAGMA foreign_keys = ON").execute(&mut conn)?;
    Ok(conn)
}

pub fn run_migrations(conn: &mut SqliteConnection) -> Result<(), Error> {
    let applied = conn.run_pending_migrations(MIGRATIONS).map_err(|e| {
        error!("error running migrations: {e}");
        Error::Migration(e)
    })?;
    debug!("applied {} migration(s)", applied.len());
    Ok(())
}
