use std::sync::OnceLock;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use diesel::{
    ExpressionMethods, OptionalExtension, QueryDsl, RunQueryDsl, SelectableHelper,
    SqliteConnection,
};
use rand::{rngs::OsRng, RngCore};
use secrecy::ExposeSecret;
use tracing::{debug, info, warn};

use crate::{
    accounts::{User, UserRow},
    schema::users::dsl,
    types::{Password, SessionToken},
    Error,
};

/// Random bytes per token; encodes to 22 URL-safe characters.
pub const SESSION_TOKEN_BYTES: usize = 16;

pub fn generate_session_token() -> SessionToken {
    let mut bytes = [0u8; SESSION_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    SessionToken(URL_SAFE_NO_PAD.encode(bytes))
}

/// A digest no password is checked against for real. Verifying against it
/// makes an unknown username cost as much as a wrong password.
fn decoy_digest() -> Option<&'static str> {
    static DECOY: OnceLock<Option<String>> = OnceLock::new();
    DECOY
        .get_or_init(|| {
            bcrypt::hash(generate_session_token().as_str(), bcrypt::DEFAULT_COST)
                .map_err(|e| warn!("error hashing decoy digest: {e}"))
                .ok()
        })
        .as_deref()
}

impl User {
    /// Returns the user only if both the username exists and the password
    /// matches. Callers can't tell which of the two failed.
    pub fn find_by_credentials(
        conn: &mut SqliteConnection,
        username: &str,
        password: &Password,
    ) -> Result<Option<User>, Error> {
        let Some(user) = User::find_by_username(conn, username)? else {
            if let Some(digest) = decoy_digest() {
                let _ = bcrypt::verify(password.expose_secret(), digest);
            }
            debug!("login rejected");
            return Ok(None);
        };

        if user.is_password(password)? {
            Ok(Some(user))
        } else {
            debug!("login rejected");
            Ok(None)
        }
    }

    pub fn find_by_session_token(
        conn: &mut SqliteConnection,
        token: &SessionToken,
    ) -> Result<Option<User>, Error> {
        if token.is_empty() {
            return Ok(None);
        }

        Ok(dsl::users
            .filter(dsl::session_token.eq(token.as_str()))
            .select(UserRow::as_select())
            .first(conn)
            .optional()?
            .map(User::from))
    }

    /// Replaces the session token, saves the record and returns the new
    /// token. Any session holding the old token stops resolving.
    pub fn reset_session_token(
        &mut self,
        conn: &mut SqliteConnection,
    ) -> Result<SessionToken, Error> {
        let previous = self.replace_session_token(generate_session_token());
        if let Err(e) = self.save(conn) {
            self.replace_session_token(previous);
            return Err(e);
        }
        info!(user_id = self.id, "reset session token");
        Ok(self.session_token().clone())
    }
}
