use std::fmt::{self, Display, Formatter};

use chrono::{NaiveDateTime, Utc};
use diesel::{
    prelude::Insertable,
    result::{DatabaseErrorKind, Error::DatabaseError},
    AsChangeset, Connection, ExpressionMethods, OptionalExtension, QueryDsl, Queryable,
    RunQueryDsl, Selectable, SelectableHelper, SqliteConnection,
};
use email_address::EmailAddress;
use itertools::Itertools;
use secrecy::ExposeSecret;
use serde::Serialize;
use tracing::{error, info};

use crate::{
    auth,
    schema::users::dsl,
    types::{Password, SessionToken},
    Error,
};

pub const MIN_PASSWORD_LENGTH: usize = 6;

const BLANK: &str = "can't be blank";
const TAKEN: &str = "has already been taken";
const INVALID: &str = "is invalid";

/// An account holder.
///
/// The plaintext password is only kept between [`User::set_password`] and the
/// next successful [`User::save`]; only its bcrypt digest is persisted.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    /// `None` until the record has been saved.
    pub id: Option<i64>,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    password_digest: String,
    #[serde(skip_serializing)]
    password: Option<Password>,
    #[serde(skip_serializing)]
    session_token: SessionToken,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = crate::schema::users)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub(crate) struct UserRow {
    id: i64,
    username: String,
    email: String,
    password_digest: String,
    session_token: String,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = crate::schema::users)]
struct NewUser<'a> {
    #[diesel(embed)]
    changes: UserChanges<'a>,
    created_at: NaiveDateTime,
}

#[derive(Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::users)]
struct UserChanges<'a> {
    username: &'a str,
    email: &'a str,
    password_digest: &'a str,
    session_token: &'a str,
    updated_at: NaiveDateTime,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        let mut user = User {
            id: Some(row.id),
            username: row.username,
            email: row.email,
            password_digest: row.password_digest,
            password: None,
            session_token: SessionToken(row.session_token),
            created_at: Some(row.created_at),
            updated_at: Some(row.updated_at),
        };
        user.ensure_session_token();
        user
    }
}

impl User {
    /// Builds an unsaved user. A session token is generated immediately; a
    /// password still has to be assigned before the record will validate.
    pub fn new(username: impl Into<String>, email: impl Into<String>) -> Self {
        let mut user = User {
            id: None,
            username: username.into(),
            email: email.into(),
            password_digest: String::new(),
            password: None,
            session_token: SessionToken::default(),
            created_at: None,
            updated_at: None,
        };
        user.ensure_session_token();
        user
    }

    pub fn with_password(
        username: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<Password>,
        cost: u32,
    ) -> Result<Self, Error> {
        let mut user = User::new(username, email);
        user.set_password(password, cost)?;
        Ok(user)
    }

    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    pub fn password(&self) -> Option<&Password> {
        self.password.as_ref()
    }

    pub fn password_digest(&self) -> &str {
        &self.password_digest
    }

    pub fn session_token(&self) -> &SessionToken {
        &self.session_token
    }

    /// Keeps the plaintext for validation and replaces the digest with a
    /// freshly salted bcrypt hash of it.
    pub fn set_password(&mut self, password: impl Into<Password>, cost: u32) -> Result<(), Error> {
        let password = password.into();
        self.password_digest = bcrypt::hash(password.expose_secret(), cost).map_err(|e| {
            error!("error hashing password: {e}");
            e
        })?;
        self.password = Some(password);
        Ok(())
    }

    pub fn is_password(&self, candidate: &Password) -> Result<bool, Error> {
        if self.password_digest.is_empty() {
            return Ok(false);
        }
        Ok(bcrypt::verify(
            candidate.expose_secret(),
            &self.password_digest,
        )?)
    }

    pub(crate) fn ensure_session_token(&mut self) {
        if self.session_token.is_empty() {
            self.session_token = auth::generate_session_token();
        }
    }

    /// Swaps in `token` and hands back the one it replaced.
    pub(crate) fn replace_session_token(&mut self, token: SessionToken) -> SessionToken {
        std::mem::replace(&mut self.session_token, token)
    }

    pub fn find(conn: &mut SqliteConnection, id: i64) -> Result<Option<User>, Error> {
        Ok(dsl::users
            .find(id)
            .select(UserRow::as_select())
            .first(conn)
            .optional()?
            .map(User::from))
    }

    pub fn find_by_username(
        conn: &mut SqliteConnection,
        username: &str,
    ) -> Result<Option<User>, Error> {
        Ok(dsl::users
            .filter(dsl::username.eq(username))
            .select(UserRow::as_select())
            .first(conn)
            .optional()?
            .map(User::from))
    }

    /// Rules that can be checked without touching the database.
    pub fn field_violations(&self) -> Violations {
        let mut violations = Violations::default();

        if self.username.trim().is_empty() {
            violations.add("username", BLANK);
        }
        if self.email.trim().is_empty() {
            violations.add("email", BLANK);
        } else if !EmailAddress::is_valid(&self.email) {
            violations.add("email", INVALID);
        }
        if self.session_token.is_empty() {
            violations.add("session_token", BLANK);
        }
        if self.password_digest.trim().is_empty() {
            violations.add("password_digest", BLANK);
        }
        if let Some(password) = &self.password {
            if password.len() < MIN_PASSWORD_LENGTH {
                violations.add(
                    "password",
                    format!("is too short (minimum is {MIN_PASSWORD_LENGTH} characters)"),
                );
            }
        }

        violations
    }

    /// All validation rules, including uniqueness against other stored users.
    pub fn validate(&self, conn: &mut SqliteConnection) -> Result<(), Error> {
        let mut violations = self.field_violations();
        let held_by_other = |holder: Option<i64>| holder.is_some_and(|id| Some(id) != self.id);

        if !self.username.trim().is_empty() {
            let holder = dsl::users
                .filter(dsl::username.eq(&self.username))
                .select(dsl::id)
                .first(conn)
                .optional()?;
            if held_by_other(holder) {
                violations.add("username", TAKEN);
            }
        }
        if !self.email.trim().is_empty() {
            let holder = dsl::users
                .filter(dsl::email.eq(&self.email))
                .select(dsl::id)
                .first(conn)
                .optional()?;
            if held_by_other(holder) {
                violations.add("email", TAKEN);
            }
        }
        if !self.session_token.is_empty() {
            let holder = dsl::users
                .filter(dsl::session_token.eq(self.session_token.as_str()))
                .select(dsl::id)
                .first(conn)
                .optional()?;
            if held_by_other(holder) {
                violations.add("session_token", TAKEN);
            }
        }

        violations.into_result()
    }

    /// Validates, then inserts or updates the record. Nothing is written if
    /// validation fails.
    pub fn save(&mut self, conn: &mut SqliteConnection) -> Result<(), Error> {
        let row = conn.transaction(|c| {
            self.validate(c)?;
            self.persist(c)
        })?;

        if self.id.is_none() {
            info!(user_id = row.id, "created user '{}'", row.username);
        }
        self.id = Some(row.id);
        self.created_at = Some(row.created_at);
        self.updated_at = Some(row.updated_at);
        self.password = None;
        Ok(())
    }

    /// Writes the row without validating it. A unique index violation comes
    /// back as a validation error on the clashing field.
    fn persist(&self, conn: &mut SqliteConnection) -> Result<UserRow, Error> {
        let now = Utc::now().naive_utc();
        let changes = UserChanges {
            username: &self.username,
            email: &self.email,
            password_digest: &self.password_digest,
            session_token: self.session_token.as_str(),
            updated_at: now,
        };

        let result = match self.id {
            None => diesel::insert_into(dsl::users)
                .values(NewUser {
                    changes,
                    created_at: now,
                })
                .returning(UserRow::as_returning())
                .get_result(conn),
            Some(id) => diesel::update(dsl::users.find(id))
                .set(&changes)
                .returning(UserRow::as_returning())
                .get_result(conn),
        };

        result.map_err(|e| match e {
            DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                let mut violations = Violations::default();
                violations.add(unique_column(info.message()), TAKEN);
                Error::Validation(violations)
            }
            e => {
                error!("error saving user '{}': {e}", self.username);
                Error::Database(e)
            }
        })
    }
}

/// Maps SQLite's "UNIQUE constraint failed: users.<column>" to the field name.
fn unique_column(message: &str) -> &'static str {
    if message.contains("users.username") {
        "username"
    } else if message.contains("users.email") {
        "email"
    } else if message.contains("users.session_token") {
        "session_token"
    } else {
        "base"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    pub field: &'static str,
    pub message: String,
}

impl FieldViolation {
    /// "password_digest", "can't be blank" => "Password digest can't be blank"
    pub fn full_message(&self) -> String {
        let mut field = self.field.replace('_', " ");
        if let Some(first) = field.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        format!("{field} {}", self.message)
    }
}

/// Field-level validation failures collected while checking a record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Violations(Vec<FieldViolation>);

impl Violations {
    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.push(FieldViolation {
            field,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldViolation> {
        self.0.iter()
    }

    /// Messages recorded against one field.
    pub fn on<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a str> {
        self.0
            .iter()
            .filter(move |v| v.field == field)
            .map(|v| v.message.as_str())
    }

    pub fn full_messages(&self) -> Vec<String> {
        self.0.iter().map(FieldViolation::full_message).collect()
    }

    pub fn into_result(self) -> Result<(), Error> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(self))
        }
    }
}

impl Display for Violations {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.iter().map(FieldViolation::full_message).join(", "))
    }
}
