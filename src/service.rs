use hmac::Mac;
pub mod clients;
pub mod configs;
pub mod keys;
pub mod server;
pub mod status;
mod user;

use std::{net::Ipv4Addr, path::PathBuf, sync::Arc};

use cidr::Ipv4Cidr;
use clap::Parser;
use hmac::Hmac;
use sha2::Sha256;
use thiserror::Error;
use tokio::sync::Mutex;

pub use clients::*;
pub use server::*;
pub use status::*;
pub use user::*;

use crate::{
    database::{Database, DatabaseError},
    exec::CommandRunner,
};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error("no available ip addresses")]
    PoolExhausted,
    #[error("server not initialized")]
    NotInitialized,
    #[error("not found")]
    NotFound,
    #[error("client with this key or address already exists")]
    ClientAlreadyExists,
    #[error("key generation failed: {0}")]
    KeyGeneration(String),
    #[error("daemon control failed: {0}")]
    Daemon(String),
    #[error("username already registered")]
    UserExists,
    #[error("incorrect username or password")]
    InvalidCredentials,
    #[error("invalid token")]
    InvalidToken,
    #[error("invalid jwt secret")]
    InvalidJwtSecret(#[from] sha2::digest::InvalidLength),
    #[error("password hashing failed")]
    PasswordHash,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl From<jwt::Error> for ServiceError {
    fn from(_: jwt::Error) -> Self {
        Self::InvalidToken
    }
}

#[derive(Debug, Parser)]
pub struct Config {
    /// Tunnel subnet; its first host address belongs to the server.
    #[clap(long, env = "WG_SUBNET", default_value = "10.8.0.0/24")]
    pub subnet: Ipv4Cidr,
    #[clap(long, env = "WG_INTERFACE", default_value = "wg0")]
    pub interface: String,
    /// Host or domain clients dial for the tunnel endpoint.
    #[clap(long, env = "WG_ENDPOINT_HOST")]
    pub endpoint_host: String,
    #[clap(long, env = "WG_LISTEN_PORT", default_value_t = 51820)]
    pub listen_port: u16,
    #[clap(long, env = "WG_CONFIG_DIR", default_value = "/etc/wireguard")]
    pub config_dir: PathBuf,
    /// Interface masqueraded tunnel traffic leaves through.
    #[clap(long, env = "WG_NAT_INTERFACE", default_value = "eth0")]
    pub nat_interface: String,
    #[clap(long, env = "JWT_SECRET")]
    pub jwt_secret: String,
}

#[derive(Clone)]
pub struct Wgadmin {
    database: Database,
    runner: Arc<dyn CommandRunner>,

    // Spans the whole snapshot-allocate-persist-append sequence, so
    // two concurrent enrollments cannot pick the same address or
    // interleave config-file writes.
    mutations: Arc<Mutex<()>>,

    subnet: Ipv4Cidr,
    interface: String,
    endpoint_host: String,
    listen_port: u16,
    config_dir: PathBuf,
    nat_interface: String,

    hmac_key: Hmac<Sha256>,
}

impl Wgadmin {
    pub fn new(
        config: Config,
        runner: Arc<dyn CommandRunner>,
        database: Database,
    ) -> Result<Self, ServiceError> {
        let hmac_key: Hmac<Sha256> = Hmac::new_from_slice(config.jwt_secret.as_bytes())?;

        Ok(Self {
            database,
            runner,
            mutations: Arc::new(Mutex::new(())),
            subnet: config.subnet,
            interface: config.interface,
            endpoint_host: config.endpoint_host,
            listen_port: config.listen_port,
            config_dir: config.config_dir,
            nat_interface: config.nat_interface,
            hmac_key,
        })
    }

    /// First host of the subnet, reserved for the server itself.
    pub fn server_address(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.subnet.first_address()) + 1)
    }

    pub(crate) fn config_path(&self) -> PathBuf {
        self.config_dir.join(format!("{}.conf", self.interface))
    }
}
