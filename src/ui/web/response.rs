use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::service::{ClientPeer, ClientStats, ServerStatus, Stats};

#[derive(Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
}

impl TokenResponse {
    pub fn bearer(access_token: String) -> Self {
        Self {
            access_token,
            token_type: "bearer",
        }
    }
}

#[derive(Deserialize)]
pub struct NewClient {
    pub name: String,
    pub os_info: Option<String>,
}

#[derive(Serialize)]
pub struct Client {
    pub id: Uuid,
    pub name: String,
    pub public_key: String,
    pub address: Ipv4Addr,
    pub enabled: bool,
    pub os_info: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<ClientPeer> for Client {
    fn from(c: ClientPeer) -> Self {
        Self {
            id: c.id,
            name: c.name,
            public_key: c.public_key,
            address: c.address,
            enabled: c.enabled,
            os_info: c.os_info,
            created_at: c.created_at,
        }
    }
}

#[derive(Serialize)]
pub struct InitResult {
    pub message: &'static str,
    pub public_key: String,
}

#[derive(Serialize)]
pub struct ServerState {
    pub initialized: bool,
    pub running: bool,
    pub public_key: Option<String>,
    pub address: Option<Ipv4Addr>,
    pub port: Option<u16>,
}

impl From<ServerStatus> for ServerState {
    fn from(s: ServerStatus) -> Self {
        Self {
            initialized: s.initialized,
            running: s.running,
            public_key: s.public_key,
            address: s.address,
            port: s.port,
        }
    }
}

#[derive(Serialize)]
pub struct Message {
    pub message: &'static str,
}

#[derive(Serialize)]
pub struct ClientConfig {
    pub config: String,
    pub filename: String,
}

#[derive(Serialize)]
pub struct Qr {
    pub qrcode: String,
}

#[derive(Serialize)]
pub struct ClientTraffic {
    pub id: Uuid,
    pub name: String,
    pub address: Ipv4Addr,
    pub os_info: Option<String>,
    pub connected: bool,
    pub latest_handshake: Option<String>,
    pub endpoint: Option<String>,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub total_bytes: u64,
}

impl From<ClientStats> for ClientTraffic {
    fn from(c: ClientStats) -> Self {
        Self {
            id: c.id,
            name: c.name,
            address: c.address,
            os_info: c.os_info,
            connected: c.connected,
            latest_handshake: c.latest_handshake,
            endpoint: c.endpoint,
            rx_bytes: c.rx_bytes,
            tx_bytes: c.tx_bytes,
            total_bytes: c.total_bytes,
        }
    }
}

#[derive(Serialize)]
pub struct StatsView {
    pub active_clients: usize,
    pub total_clients: usize,
    pub server_running: bool,
    pub clients: Vec<ClientTraffic>,
}

impl From<Stats> for StatsView {
    fn from(s: Stats) -> Self {
        Self {
            active_clients: s.active_clients,
            total_clients: s.total_clients,
            server_running: s.server_running,
            clients: s.clients.into_iter().map(Into::into).collect(),
        }
    }
}
