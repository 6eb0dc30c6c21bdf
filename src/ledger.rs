use std::collections::{btree_map, hash_map, BTreeMap, HashMap};

use chrono::{NaiveDateTime, Utc};
use diesel::{
    prelude::Insertable,
    result::{DatabaseErrorKind, Error::DatabaseError},
    ExpressionMethods, QueryDsl, Queryable, RunQueryDsl, Selectable, SelectableHelper,
    SqliteConnection,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::{
    assets::StockLookup,
    schema::{deposits, transactions},
    types::{Mills, OrderType},
    Error, User, Violations,
};

/// Net shares held per ticker. Zero and negative positions are kept.
pub type Holdings = BTreeMap<String, i64>;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, PartialEq, Eq)]
#[diesel(table_name = crate::schema::deposits)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Deposit {
    pub id: i64,
    pub user_id: i64,
    /// Signed; withdrawals are negative deposits.
    pub amount: Mills,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = crate::schema::deposits)]
struct NewDeposit {
    user_id: i64,
    amount: Mills,
    created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, PartialEq, Eq)]
#[diesel(table_name = crate::schema::transactions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Transaction {
    pub id: i64,
    pub user_id: i64,
    pub stock_id: i64,
    /// Price per share.
    pub price: Mills,
    pub num_shares: i64,
    pub order_type: OrderType,
    pub created_at: NaiveDateTime,
}

impl Transaction {
    /// Cash moved by this trade: negative for buys, positive for sells.
    pub fn cash_flow(&self) -> Option<Mills> {
        let total = self.price.checked_mul(self.num_shares)?;
        match self.order_type {
            OrderType::Buy => Mills::ZERO.checked_sub(total),
            OrderType::Sell => Some(total),
        }
    }

    /// Change in shares held: positive for buys, negative for sells.
    pub fn share_delta(&self) -> Option<i64> {
        self.num_shares.checked_mul(self.order_type.share_sign())
    }
}

/// A trade to be recorded against a user.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewTransaction {
    pub stock_id: i64,
    pub price: Mills,
    pub num_shares: i64,
    pub order_type: OrderType,
}

impl NewTransaction {
    pub fn violations(&self) -> Violations {
        let mut violations = Violations::default();
        if self.num_shares <= 0 {
            violations.add("num_shares", "must be greater than 0");
        }
        if self.price < Mills::ZERO {
            violations.add("price", "must be greater than or equal to 0");
        }
        violations
    }
}

#[derive(Insertable)]
#[diesel(table_name = crate::schema::transactions)]
struct TransactionRow {
    user_id: i64,
    stock_id: i64,
    price: Mills,
    num_shares: i64,
    order_type: OrderType,
    created_at: NaiveDateTime,
}

/// Deposits minus the cost of every buy plus the proceeds of every sell.
pub fn buying_power(deposits: &[Deposit], transactions: &[Transaction]) -> Result<Mills, Error> {
    let after_deposits = deposits
        .iter()
        .try_fold(Mills::ZERO, |total, deposit| total.checked_add(deposit.amount))
        .ok_or(Error::Overflow)?;

    transactions
        .iter()
        .try_fold(after_deposits, |total, transaction| {
            total.checked_add(transaction.cash_flow()?)
        })
        .ok_or(Error::Overflow)
}

/// Replays `transactions` in order into net shares per ticker. Each distinct
/// stock is looked up once; a stock the lookup doesn't know fails the whole
/// report with [`Error::StockNotFound`].
pub fn holdings<L>(transactions: &[Transaction], lookup: &mut L) -> Result<Holdings, Error>
where
    L: StockLookup + ?Sized,
{
    let mut tickers: HashMap<i64, String> = HashMap::new();
    let mut holdings = Holdings::new();

    for transaction in transactions {
        let ticker = match tickers.entry(transaction.stock_id) {
            hash_map::Entry::Occupied(entry) => entry.into_mut(),
            hash_map::Entry::Vacant(entry) => {
                entry.insert(lookup.stock(transaction.stock_id)?.ticker)
            }
        };
        let delta = transaction.share_delta().ok_or(Error::Overflow)?;

        match holdings.entry(ticker.clone()) {
            btree_map::Entry::Occupied(mut entry) => {
                let shares = entry.get().checked_add(delta).ok_or(Error::Overflow)?;
                entry.insert(shares);
            }
            btree_map::Entry::Vacant(entry) => {
                entry.insert(delta);
            }
        }
    }

    Ok(holdings)
}

/// Cash position and share holdings for one user.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Report {
    pub username: String,
    pub buying_power: Mills,
    pub holdings: Holdings,
}

impl User {
    fn persisted_id(&self) -> Result<i64, Error> {
        self.id.ok_or(Error::NotPersisted)
    }

    /// The user's deposits in the order they were made. Empty for an unsaved user.
    pub fn deposits(&self, conn: &mut SqliteConnection) -> Result<Vec<Deposit>, Error> {
        let Some(id) = self.id else {
            return Ok(Vec::new());
        };

        Ok(deposits::table
            .filter(deposits::user_id.eq(id))
            .order(deposits::id)
            .select(Deposit::as_select())
            .load(conn)?)
    }

    /// The user's trades in the order they were made. Empty for an unsaved user.
    pub fn transactions(&self, conn: &mut SqliteConnection) -> Result<Vec<Transaction>, Error> {
        let Some(id) = self.id else {
            return Ok(Vec::new());
        };

        Ok(transactions::table
            .filter(transactions::user_id.eq(id))
            .order(transactions::id)
            .select(Transaction::as_select())
            .load(conn)?)
    }

    pub fn deposit(&self, conn: &mut SqliteConnection, amount: Mills) -> Result<Deposit, Error> {
        let user_id = self.persisted_id()?;

        diesel::insert_into(deposits::table)
            .values(NewDeposit {
                user_id,
                amount,
                created_at: Utc::now().naive_utc(),
            })
            .returning(Deposit::as_returning())
            .get_result(conn)
            .map_err(|e| {
                error!("error recording deposit for user {user_id}: {e}");
                e.into()
            })
    }

    pub fn record_transaction(
        &self,
        conn: &mut SqliteConnection,
        trade: NewTransaction,
    ) -> Result<Transaction, Error> {
        let user_id = self.persisted_id()?;
        trade.violations().into_result()?;

        diesel::insert_into(transactions::table)
            .values(TransactionRow {
                user_id,
                stock_id: trade.stock_id,
                price: trade.price,
                num_shares: trade.num_shares,
                order_type: trade.order_type,
                created_at: Utc::now().naive_utc(),
            })
            .returning(Transaction::as_returning())
            .get_result(conn)
            .map_err(|e| match e {
                DatabaseError(DatabaseErrorKind::ForeignKeyViolation, _) => {
                    Error::StockNotFound(trade.stock_id)
                }
                e => {
                    error!("error recording transaction for user {user_id}: {e}");
                    Error::Database(e)
                }
            })
    }

    pub fn calculate_buying_power(&self, conn: &mut SqliteConnection) -> Result<Mills, Error> {
        let deposits = self.deposits(conn)?;
        let transactions = self.transactions(conn)?;
        debug!(
            user_id = self.id,
            deposits = deposits.len(),
            transactions = transactions.len(),
            "calculating buying power"
        );
        buying_power(&deposits, &transactions)
    }

    /// Holdings with stocks resolved from the same database.
    pub fn calculate_stocks(&self, conn: &mut SqliteConnection) -> Result<Holdings, Error> {
        let transactions = self.transactions(conn)?;
        holdings(&transactions, conn)
    }

    pub fn calculate_stocks_with<L>(
        &self,
        conn: &mut SqliteConnection,
        lookup: &mut L,
    ) -> Result<Holdings, Error>
    where
        L: StockLookup + ?Sized,
    {
        let transactions = self.transactions(conn)?;
        holdings(&transactions, lookup)
    }

    pub fn report(&self, conn: &mut SqliteConnection) -> Result<Report, Error> {
        Ok(Report {
            username: self.username.clone(),
            buying_power: self.calculate_buying_power(conn)?,
            holdings: self.calculate_stocks(conn)?,
        })
    }
}
