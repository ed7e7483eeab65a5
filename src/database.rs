use std::str::FromStr;

use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Row, SqlitePool,
};
use thiserror::Error;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use uuid::Uuid;

use crate::service::{Account, ClientPeer, ServerIdentity};

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("migrate error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("invalid address data")]
    InvalidAddress,
    #[error("invalid uuid data")]
    InvalidUuid,
    #[error("invalid timestamp data")]
    InvalidTimestamp,
}

impl From<uuid::Error> for DatabaseError {
    fn from(_: uuid::Error) -> Self {
        Self::InvalidUuid
    }
}

impl From<std::net::AddrParseError> for DatabaseError {
    fn from(_: std::net::AddrParseError) -> Self {
        Self::InvalidAddress
    }
}

impl From<time::error::Parse> for DatabaseError {
    fn from(_: time::error::Parse) -> Self {
        Self::InvalidTimestamp
    }
}

impl From<time::error::Format> for DatabaseError {
    fn from(_: time::error::Format) -> Self {
        Self::InvalidTimestamp
    }
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

type Result<T> = std::result::Result<T, DatabaseError>;

fn decode_client(row: &SqliteRow) -> Result<ClientPeer> {
    Ok(ClientPeer {
        id: Uuid::parse_str(&row.try_get::<String, _>("id")?)?,
        name: row.try_get("name")?,
        public_key: row.try_get("public_key")?,
        private_key: row.try_get("private_key")?,
        address: row.try_get::<String, _>("address")?.parse()?,
        enabled: row.try_get::<i64, _>("enabled")? != 0,
        os_info: row.try_get("os_info")?,
        created_at: OffsetDateTime::parse(&row.try_get::<String, _>("created_at")?, &Rfc3339)?,
    })
}

impl Database {
    pub async fn new(connstr: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .connect_with(SqliteConnectOptions::from_str(connstr)?.create_if_missing(true))
            .await?;
        sqlx::migrate!().run(&pool).await?;

        Ok(Self { pool })
    }

    pub async fn server_identity(&self) -> Result<Option<ServerIdentity>> {
        let row = sqlx::query("SELECT * FROM server WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            Ok(ServerIdentity {
                private_key: row.try_get("private_key")?,
                public_key: row.try_get("public_key")?,
                address: row.try_get::<String, _>("address")?.parse()?,
                port: row.try_get::<i64, _>("port")? as u16,
                initialized: row.try_get::<i64, _>("initialized")? != 0,
                created_at: OffsetDateTime::parse(
                    &row.try_get::<String, _>("created_at")?,
                    &Rfc3339,
                )?,
            })
        })
        .transpose()
    }

    pub async fn insert_server_identity(&self, identity: &ServerIdentity) -> Result<()> {
        sqlx::query(
            "INSERT INTO server(id, private_key, public_key, address, port, initialized, created_at)
             VALUES(1, $1, $2, $3, $4, $5, $6)",
        )
        .bind(&identity.private_key)
        .bind(&identity.public_key)
        .bind(identity.address.to_string())
        .bind(identity.port as i64)
        .bind(identity.initialized as i64)
        .bind(identity.created_at.format(&Rfc3339)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn clients(&self) -> Result<Vec<ClientPeer>> {
        sqlx::query("SELECT * FROM clients ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(decode_client)
            .collect()
    }

    pub async fn client(&self, id: Uuid) -> Result<Option<ClientPeer>> {
        sqlx::query("SELECT * FROM clients WHERE id = $1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(decode_client)
            .transpose()
    }

    pub async fn insert_client(&self, client: &ClientPeer) -> Result<()> {
        sqlx::query(
            "INSERT INTO clients(id, name, public_key, private_key, address, enabled, os_info, created_at)
             VALUES($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(client.id.to_string())
        .bind(&client.name)
        .bind(&client.public_key)
        .bind(&client.private_key)
        .bind(client.address.to_string())
        .bind(client.enabled as i64)
        .bind(&client.os_info)
        .bind(client.created_at.format(&Rfc3339)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_client(&self, id: Uuid) -> Result<bool> {
        let done = sqlx::query("DELETE FROM clients WHERE id = $1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    pub async fn account(&self, username: &str) -> Result<Option<Account>> {
        sqlx::query("SELECT * FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| {
                Ok(Account {
                    username: row.try_get("username")?,
                    password_hash: row.try_get("password_hash")?,
                    created_at: OffsetDateTime::parse(
                        &row.try_get::<String, _>("created_at")?,
                        &Rfc3339,
                    )?,
                })
            })
            .transpose()
    }

    /// Returns false when the username is already taken.
    pub async fn insert_account(&self, account: &Account) -> Result<bool> {
        let done = sqlx::query(
            "INSERT INTO users(username, password_hash, created_at) VALUES($1, $2, $3)
             ON CONFLICT(username) DO NOTHING",
        )
        .bind(&account.username)
        .bind(&account.password_hash)
        .bind(account.created_at.format(&Rfc3339)?)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() > 0)
    }
}
