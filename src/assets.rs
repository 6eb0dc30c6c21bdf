use std::collections::HashMap;

use chrono::{NaiveDateTime, Utc};
use diesel::{
    prelude::Insertable,
    result::{DatabaseErrorKind, Error::DatabaseError},
    ExpressionMethods, OptionalExtension, QueryDsl, Queryable, RunQueryDsl, Selectable,
    SelectableHelper, SqliteConnection,
};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::{schema::stocks::dsl, Error, Violations};

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, PartialEq, Eq)]
#[diesel(table_name = crate::schema::stocks)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Stock {
    pub id: i64,
    /// Exchange ticker symbol, e.g. "AAPL".
    pub ticker: String,
    pub name: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = crate::schema::stocks)]
struct NewStock<'a> {
    ticker: &'a str,
    name: Option<&'a str>,
    created_at: NaiveDateTime,
}

impl Stock {
    pub fn create(
        conn: &mut SqliteConnection,
        ticker: &str,
        name: Option<&str>,
    ) -> Result<Stock, Error> {
        let ticker = ticker.trim().to_ascii_uppercase();
        if ticker.is_empty() {
            let mut violations = Violations::default();
            violations.add("ticker", "can't be blank");
            return Err(Error::Validation(violations));
        }

        diesel::insert_into(dsl::stocks)
            .values(NewStock {
                ticker: &ticker,
                name,
                created_at: Utc::now().naive_utc(),
            })
            .returning(Stock::as_returning())
            .get_result(conn)
            .map_err(|e| match e {
                DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                    let mut violations = Violations::default();
                    violations.add("ticker", "has already been taken");
                    Error::Validation(violations)
                }
                e => {
                    error!("error inserting stock '{ticker}': {e}");
                    Error::Database(e)
                }
            })
    }

    pub fn find(conn: &mut SqliteConnection, id: i64) -> Result<Option<Stock>, Error> {
        Ok(dsl::stocks
            .find(id)
            .select(Stock::as_select())
            .first(conn)
            .optional()?)
    }

    pub fn find_by_ticker(
        conn: &mut SqliteConnection,
        ticker: &str,
    ) -> Result<Option<Stock>, Error> {
        Ok(dsl::stocks
            .filter(dsl::ticker.eq(ticker.trim().to_ascii_uppercase()))
            .select(Stock::as_select())
            .first(conn)
            .optional()?)
    }

    pub fn list(conn: &mut SqliteConnection) -> Result<Vec<Stock>, Error> {
        Ok(dsl::stocks
            .order(dsl::ticker)
            .select(Stock::as_select())
            .load(conn)?)
    }
}

/// Resolves stock ids to stocks for the holdings report.
pub trait StockLookup {
    fn find_stock(&mut self, id: i64) -> Result<Option<Stock>, Error>;

    /// Like [`StockLookup::find_stock`], but a missing stock is an error.
    fn stock(&mut self, id: i64) -> Result<Stock, Error> {
        self.find_stock(id)?.ok_or_else(|| {
            warn!("transaction references missing stock {id}");
            Error::StockNotFound(id)
        })
    }
}

impl StockLookup for SqliteConnection {
    fn find_stock(&mut self, id: i64) -> Result<Option<Stock>, Error> {
        Stock::find(self, id)
    }
}

impl StockLookup for HashMap<i64, Stock> {
    fn find_stock(&mut self, id: i64) -> Result<Option<Stock>, Error> {
        Ok(self.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stock(id: i64, ticker: &str) -> Stock {
        Stock {
            id,
            ticker: ticker.to_string(),
            name: None,
            created_at: Utc::now().naive_utc(),
        }
    }

    #[test]
    fn in_memory_lookup() {
        let mut lookup = HashMap::from([(1, stock(1, "AAPL"))]);
        assert_eq!(lookup.stock(1).unwrap().ticker, "AAPL");
        assert_eq!(lookup.find_stock(2).unwrap(), None);
        assert!(matches!(lookup.stock(2), Err(Error::StockNotFound(2))));
    }
}
