use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use jwt::{SignWithKey, VerifyWithKey};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tracing::instrument;

use super::{ServiceError, Wgadmin};

const TOKEN_TTL: Duration = Duration::days(30);

#[derive(Debug, Clone)]
pub struct Account {
    pub username: String,
    pub password_hash: String,
    pub created_at: OffsetDateTime,
}

#[derive(Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: i64,
}

impl Wgadmin {
    #[instrument(skip(self, password))]
    pub async fn register(&self, username: &str, password: &str) -> Result<String, ServiceError> {
        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|_| ServiceError::PasswordHash)?
            .to_string();

        let account = Account {
            username: username.to_owned(),
            password_hash,
            created_at: OffsetDateTime::now_utc(),
        };
        if !self.database.insert_account(&account).await? {
            return Err(ServiceError::UserExists);
        }

        self.issue_token(username)
    }

    #[instrument(skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> Result<String, ServiceError> {
        let Some(account) = self.database.account(username).await? else {
            return Err(ServiceError::InvalidCredentials);
        };

        let parsed =
            PasswordHash::new(&account.password_hash).map_err(|_| ServiceError::PasswordHash)?;
        if Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_err()
        {
            return Err(ServiceError::InvalidCredentials);
        }

        self.issue_token(username)
    }

    fn issue_token(&self, username: &str) -> Result<String, ServiceError> {
        let claims = Claims {
            sub: username.to_owned(),
            exp: (OffsetDateTime::now_utc() + TOKEN_TTL).unix_timestamp(),
        };
        Ok(claims.sign_with_key(&self.hmac_key)?)
    }

    /// Returns the subject of a valid, unexpired bearer token.
    pub fn verify_token(&self, token: &str) -> Result<String, ServiceError> {
        let claims: Claims = token.verify_with_key(&self.hmac_key)?;
        if claims.exp < OffsetDateTime::now_utc().unix_timestamp() {
            return Err(ServiceError::InvalidToken);
        }
        Ok(claims.sub)
    }
}
