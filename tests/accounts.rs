use std::collections::HashMap;

use brokerage::{
    establish_connection, run_migrations, schema, Error, Holdings, Mills, NewTransaction,
    OrderType, Password, SessionToken, Stock, User,
};
use diesel::{QueryDsl, RunQueryDsl, SqliteConnection};

const COST: u32 = 4;

fn connection() -> SqliteConnection {
    let mut conn = establish_connection(":memory:").unwrap();
    run_migrations(&mut conn).unwrap();
    conn
}

fn registered(conn: &mut SqliteConnection, username: &str, password: &str) -> User {
    let mut user =
        User::with_password(username, format!("{username}@example.com"), password, COST).unwrap();
    user.save(conn).unwrap();
    user
}

fn user_count(conn: &mut SqliteConnection) -> i64 {
    schema::users::table.count().get_result(conn).unwrap()
}

fn violations_on(err: Error, field: &str) -> Vec<String> {
    match err {
        Error::Validation(violations) => violations.on(field).map(str::to_string).collect(),
        e => panic!("expected validation error, got {e}"),
    }
}

#[test]
fn saving_stores_a_digest_not_the_password() {
    let mut conn = connection();
    let user = registered(&mut conn, "alice", "correct horse");

    assert!(user.is_persisted());
    assert!(user.created_at.is_some());
    assert!(user.password().is_none());

    let stored = User::find_by_username(&mut conn, "alice").unwrap().unwrap();
    assert_ne!(stored.password_digest(), "correct horse");
    assert!(stored.is_password(&"correct horse".into()).unwrap());
    assert_eq!(stored.session_token(), user.session_token());
}

#[test]
fn short_password_is_rejected_at_save() {
    let mut conn = connection();

    let mut short = User::with_password("bob", "bob@example.com", "12345", COST).unwrap();
    let err = short.save(&mut conn).unwrap_err();
    assert_eq!(
        violations_on(err, "password"),
        ["is too short (minimum is 6 characters)"]
    );
    assert!(!short.is_persisted());
    assert_eq!(user_count(&mut conn), 0);

    short.set_password("123456", COST).unwrap();
    short.save(&mut conn).unwrap();
    assert_eq!(user_count(&mut conn), 1);
}

#[test]
fn persisted_user_saves_without_a_password() {
    let mut conn = connection();
    let user = registered(&mut conn, "carol", "secret-pass");

    let mut loaded = User::find(&mut conn, user.id.unwrap()).unwrap().unwrap();
    assert!(loaded.password().is_none());
    loaded.email = "carol@example.org".to_string();
    loaded.save(&mut conn).unwrap();

    let reloaded = User::find(&mut conn, user.id.unwrap()).unwrap().unwrap();
    assert_eq!(reloaded.email, "carol@example.org");
    assert!(reloaded.is_password(&"secret-pass".into()).unwrap());
}

#[test]
fn duplicate_username_and_email_are_rejected() {
    let mut conn = connection();
    registered(&mut conn, "dave", "password1");

    let mut clash = User::with_password("dave", "dave@example.com", "password2", COST).unwrap();
    match clash.save(&mut conn).unwrap_err() {
        Error::Validation(violations) => {
            assert_eq!(
                violations.full_messages(),
                [
                    "Username has already been taken",
                    "Email has already been taken",
                ]
            );
        }
        e => panic!("expected validation error, got {e}"),
    }
    assert_eq!(user_count(&mut conn), 1);
}

#[test]
fn missing_digest_is_rejected() {
    let mut conn = connection();
    let mut user = User::new("erin", "erin@example.com");
    let err = user.save(&mut conn).unwrap_err();
    assert_eq!(violations_on(err, "password_digest"), ["can't be blank"]);
}

#[test]
fn credentials_only_match_exactly() {
    let mut conn = connection();
    let user = registered(&mut conn, "frank", "letmein!");
    let password = Password::from("letmein!");

    assert!(User::find_by_credentials(&mut conn, "nobody", &password)
        .unwrap()
        .is_none());
    assert!(User::find_by_credentials(&mut conn, "frank", &"letmein".into())
        .unwrap()
        .is_none());
    assert!(User::find_by_credentials(&mut conn, "Frank", &password)
        .unwrap()
        .is_none());

    let found = User::find_by_credentials(&mut conn, "frank", &password)
        .unwrap()
        .unwrap();
    assert_eq!(found.id, user.id);
}

#[test]
fn resetting_the_session_token_invalidates_the_old_one() {
    let mut conn = connection();
    let mut user = registered(&mut conn, "grace", "hopper123");
    let old = user.session_token().clone();

    let new = user.reset_session_token(&mut conn).unwrap();
    assert_ne!(new, old);
    assert_eq!(&new, user.session_token());

    assert!(User::find_by_session_token(&mut conn, &old)
        .unwrap()
        .is_none());
    let found = User::find_by_session_token(&mut conn, &new)
        .unwrap()
        .unwrap();
    assert_eq!(found.id, user.id);

    assert!(User::find_by_session_token(&mut conn, &SessionToken::default())
        .unwrap()
        .is_none());
}

#[test]
fn failed_reset_keeps_the_current_token() {
    let mut conn = connection();
    let mut user = registered(&mut conn, "ivan", "pa55word");
    let current = user.session_token().clone();

    user.email = "not-an-email".to_string();
    let err = user.reset_session_token(&mut conn).unwrap_err();
    assert_eq!(violations_on(err, "email"), ["is invalid"]);
    assert_eq!(user.session_token(), &current);

    let stored = User::find_by_session_token(&mut conn, &current)
        .unwrap()
        .unwrap();
    assert_eq!(stored.id, user.id);
    assert_eq!(stored.email, "ivan@example.com");
}

#[test]
fn buying_power_from_stored_records() {
    let mut conn = connection();
    let user = registered(&mut conn, "heidi", "pa55word");
    let aapl = Stock::create(&mut conn, "aapl", Some("Apple Inc.")).unwrap();
    let msft = Stock::create(&mut conn, "MSFT", None).unwrap();
    assert_eq!(aapl.ticker, "AAPL");

    user.deposit(&mut conn, "1000".parse().unwrap()).unwrap();
    user.deposit(&mut conn, "250.50".parse().unwrap()).unwrap();
    user.record_transaction(
        &mut conn,
        NewTransaction {
            stock_id: aapl.id,
            price: "10.25".parse().unwrap(),
            num_shares: 20,
            order_type: OrderType::Buy,
        },
    )
    .unwrap();
    user.record_transaction(
        &mut conn,
        NewTransaction {
            stock_id: msft.id,
            price: "3.5".parse().unwrap(),
            num_shares: 4,
            order_type: OrderType::Sell,
        },
    )
    .unwrap();

    // 1250.50 - 10.25 * 20 + 3.5 * 4
    assert_eq!(
        user.calculate_buying_power(&mut conn).unwrap(),
        Mills(1_059_500)
    );
}

#[test]
fn holdings_from_stored_records() {
    let mut conn = connection();
    let user = registered(&mut conn, "ivan", "pa55word");
    let a = Stock::create(&mut conn, "A", None).unwrap();
    let b = Stock::create(&mut conn, "B", None).unwrap();

    for (stock_id, num_shares, order_type) in [
        (a.id, 10, OrderType::Buy),
        (a.id, 3, OrderType::Sell),
        (b.id, 5, OrderType::Buy),
    ] {
        user.record_transaction(
            &mut conn,
            NewTransaction {
                stock_id,
                price: Mills(1_000),
                num_shares,
                order_type,
            },
        )
        .unwrap();
    }

    let expected = Holdings::from([("A".to_string(), 7), ("B".to_string(), 5)]);
    assert_eq!(user.calculate_stocks(&mut conn).unwrap(), expected);

    // Same answer from an injected lookup, and a lookup that is missing a
    // stock fails the report.
    let mut lookup = HashMap::from([(a.id, a.clone()), (b.id, b.clone())]);
    assert_eq!(
        user.calculate_stocks_with(&mut conn, &mut lookup).unwrap(),
        expected
    );
    lookup.remove(&b.id);
    assert!(matches!(
        user.calculate_stocks_with(&mut conn, &mut lookup),
        Err(Error::StockNotFound(id)) if id == b.id
    ));
}

#[test]
fn trades_against_unknown_stocks_are_refused() {
    let mut conn = connection();
    let user = registered(&mut conn, "judy", "pa55word");
    let err = user
        .record_transaction(
            &mut conn,
            NewTransaction {
                stock_id: 42,
                price: Mills(1),
                num_shares: 1,
                order_type: OrderType::Buy,
            },
        )
        .unwrap_err();
    assert!(matches!(err, Error::StockNotFound(42)));
}

#[test]
fn unsaved_user_has_no_records() {
    let mut conn = connection();
    let user = User::with_password("mallory", "mallory@example.com", "pa55word", COST).unwrap();

    assert!(user.deposits(&mut conn).unwrap().is_empty());
    assert_eq!(user.calculate_buying_power(&mut conn).unwrap(), Mills::ZERO);
    assert!(user.calculate_stocks(&mut conn).unwrap().is_empty());
    assert!(matches!(
        user.deposit(&mut conn, Mills(1)),
        Err(Error::NotPersisted)
    ));
}

#[test]
fn duplicate_tickers_are_rejected() {
    let mut conn = connection();
    Stock::create(&mut conn, "AAPL", None).unwrap();
    let err = Stock::create(&mut conn, " aapl ", None).unwrap_err();
    assert_eq!(violations_on(err, "ticker"), ["has already been taken"]);
    assert_eq!(Stock::list(&mut conn).unwrap().len(), 1);
}
