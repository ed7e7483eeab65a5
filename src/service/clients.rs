use std::{
    collections::{HashMap, HashSet},
    net::Ipv4Addr,
};

use base64::{engine::general_purpose::STANDARD, Engine};
use cidr::Ipv4Cidr;
use qrcode::{render::svg, QrCode};
use time::OffsetDateTime;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::database::DatabaseError;

use super::{configs, status, LivePeer, ServiceError, Wgadmin};

#[derive(Debug, Clone)]
pub struct ClientPeer {
    pub id: Uuid,
    pub name: String,
    pub public_key: String,
    pub private_key: String,
    pub address: Ipv4Addr,
    pub enabled: bool,
    pub os_info: Option<String>,
    pub created_at: OffsetDateTime,
}

/// Reconciled per-client view: the persisted record joined with the
/// live peer entry of the same public key, if one exists.
#[derive(Debug, Clone)]
pub struct ClientStats {
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

#[derive(Debug, Clone)]
pub struct Stats {
    pub active_clients: usize,
    pub total_clients: usize,
    pub server_running: bool,
    pub clients: Vec<ClientStats>,
}

/// Lowest free host address in ascending numeric order. The network
/// address, the first host (the server's own) and the broadcast
/// address are never handed out.
pub(crate) fn next_free_address(subnet: Ipv4Cidr, used: &HashSet<Ipv4Addr>) -> Option<Ipv4Addr> {
    let first = u32::from(subnet.first_address());
    let last = u32::from(subnet.last_address());

    (first.saturating_add(2)..last)
        .map(Ipv4Addr::from)
        .find(|addr| !used.contains(addr))
}

fn unique_violation(e: &DatabaseError) -> bool {
    match e {
        DatabaseError::Sqlx(sqlx::Error::Database(db)) => {
            db.code().as_deref() == Some("2067") || db.code().as_deref() == Some("1555")
        }
        _ => false,
    }
}

impl Wgadmin {
    /// Enrolls a device: allocate an address, generate a key pair,
    /// persist, append the peer block, and hot-sync the running
    /// daemon. Everything after the insert is best effort; the peer
    /// becomes live at the next daemon start even if it fails here.
    #[instrument(skip(self))]
    pub async fn new_client(
        &self,
        name: String,
        os_info: Option<String>,
    ) -> Result<ClientPeer, ServiceError> {
        let _guard = self.mutations.lock().await;

        let Some(_identity) = self.database.server_identity().await? else {
            return Err(ServiceError::NotInitialized);
        };

        let mut used: HashSet<Ipv4Addr> = self
            .database
            .clients()
            .await?
            .into_iter()
            .map(|c| c.address)
            .collect();
        used.insert(self.server_address());

        let address = next_free_address(self.subnet, &used).ok_or(ServiceError::PoolExhausted)?;
        let keys = self.generate_keypair().await?;

        let client = ClientPeer {
            id: Uuid::new_v4(),
            name,
            public_key: keys.public_key,
            private_key: keys.private_key,
            address,
            enabled: true,
            os_info,
            created_at: OffsetDateTime::now_utc(),
        };

        match self.database.insert_client(&client).await {
            Ok(()) => {}
            Err(e) if unique_violation(&e) => return Err(ServiceError::ClientAlreadyExists),
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = self
            .append_config(&configs::peer_block(&client.public_key, client.address))
            .await
        {
            warn!("failed to append peer block for {}: {e}", client.id);
        }

        if self.live_status().await.running {
            let path = self.config_path().display().to_string();
            let out = self
                .runner
                .run(true, "wg", &["syncconf", &self.interface, &path])
                .await;
            if !out.success() {
                warn!("hot-sync after enrolling {} failed: {}", client.id, out.stderr);
            }
        }

        Ok(client)
    }

    /// Revokes a peer. The record goes first (it is the source of
    /// truth), then the live table and the config file are brought in
    /// line best-effort. The file rewrite keeps a daemon restart from
    /// resurrecting the peer out of a stale `[Peer]` block.
    #[instrument(skip(self))]
    pub async fn rm_client(&self, id: Uuid) -> Result<(), ServiceError> {
        let _guard = self.mutations.lock().await;

        let Some(client) = self.database.client(id).await? else {
            return Err(ServiceError::NotFound);
        };
        self.database.delete_client(id).await?;

        let out = self
            .runner
            .run(
                true,
                "wg",
                &["set", &self.interface, "peer", &client.public_key, "remove"],
            )
            .await;
        if !out.success() {
            warn!("live removal of peer {} failed: {}", client.id, out.stderr);
        }

        // The record is already gone; the rewrite is best-effort.
        if let Err(e) = self.rewrite_config().await {
            warn!("config rewrite after revoking {} failed: {e}", client.id);
        }

        Ok(())
    }

    /// Regenerates the config file from the store.
    async fn rewrite_config(&self) -> Result<(), ServiceError> {
        let Some(identity) = self.database.server_identity().await? else {
            return Ok(());
        };
        let remaining = self.database.clients().await?;
        let contents = self.render_full_config(&identity, &remaining);
        self.install_config(&contents).await
    }

    #[instrument(skip(self))]
    pub async fn clients(&self) -> Result<Vec<ClientPeer>, ServiceError> {
        Ok(self.database.clients().await?)
    }

    #[instrument(skip(self))]
    pub async fn client_config(&self, id: Uuid) -> Result<(String, String), ServiceError> {
        let Some(client) = self.database.client(id).await? else {
            return Err(ServiceError::NotFound);
        };
        let Some(identity) = self.database.server_identity().await? else {
            return Err(ServiceError::NotInitialized);
        };

        let config = configs::client_config(
            &client,
            self.subnet.network_length(),
            &identity.public_key,
            &self.endpoint_host,
            identity.port,
        );
        let filename = format!("{}.conf", client.name);
        Ok((config, filename))
    }

    /// The rendered config as a scannable SVG, packed into a data URL.
    #[instrument(skip(self))]
    pub async fn client_qrcode(&self, id: Uuid) -> Result<String, ServiceError> {
        let (config, _) = self.client_config(id).await?;
        let code = QrCode::new(config.as_bytes())
            .map_err(|e| ServiceError::Unexpected(format!("qr encoding failed: {e}")))?;
        let image = code
            .render::<svg::Color>()
            .min_dimensions(240, 240)
            .build();
        Ok(format!(
            "data:image/svg+xml;base64,{}",
            STANDARD.encode(image.as_bytes())
        ))
    }

    /// One pass over the record store and one over the live peer
    /// table, correlated by public key. Divergence is reported, not
    /// reconciled: a record without a live entry is simply
    /// disconnected.
    #[instrument(skip(self))]
    pub async fn stats(&self) -> Result<Stats, ServiceError> {
        let live = self.live_status().await;
        let by_key: HashMap<&str, &LivePeer> = live
            .peers
            .iter()
            .map(|p| (p.public_key.as_str(), p))
            .collect();

        let clients = self.database.clients().await?;
        let total_clients = clients.len();

        let clients: Vec<ClientStats> = clients
            .into_iter()
            .map(|client| {
                let peer = by_key.get(client.public_key.as_str());
                let rx_bytes = peer
                    .and_then(|p| p.transfer_rx.as_deref())
                    .map(status::parse_traffic)
                    .unwrap_or(0);
                let tx_bytes = peer
                    .and_then(|p| p.transfer_tx.as_deref())
                    .map(status::parse_traffic)
                    .unwrap_or(0);

                ClientStats {
                    id: client.id,
                    name: client.name,
                    address: client.address,
                    os_info: client.os_info,
                    connected: peer.is_some(),
                    latest_handshake: peer.and_then(|p| p.latest_handshake.clone()),
                    endpoint: peer.and_then(|p| p.endpoint.clone()),
                    rx_bytes,
                    tx_bytes,
                    total_bytes: rx_bytes + tx_bytes,
                }
            })
            .collect();

        Ok(Stats {
            active_clients: clients.iter().filter(|c| c.connected).count(),
            total_clients,
            server_running: live.running,
            clients,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subnet() -> Ipv4Cidr {
        "10.8.0.0/24".parse().unwrap()
    }

    #[test]
    fn allocates_lowest_free_host() {
        let used = HashSet::new();
        assert_eq!(
            next_free_address(subnet(), &used),
            Some(Ipv4Addr::new(10, 8, 0, 2))
        );
    }

    #[test]
    fn skips_used_addresses_deterministically() {
        let used: HashSet<_> = [Ipv4Addr::new(10, 8, 0, 2), Ipv4Addr::new(10, 8, 0, 4)]
            .into_iter()
            .collect();
        assert_eq!(
            next_free_address(subnet(), &used),
            Some(Ipv4Addr::new(10, 8, 0, 3))
        );
        // Same used-set, same answer.
        assert_eq!(
            next_free_address(subnet(), &used),
            Some(Ipv4Addr::new(10, 8, 0, 3))
        );
    }

    #[test]
    fn never_hands_out_reserved_addresses() {
        let used = HashSet::new();
        let addr = next_free_address(subnet(), &used).unwrap();
        assert_ne!(addr, Ipv4Addr::new(10, 8, 0, 0));
        assert_ne!(addr, Ipv4Addr::new(10, 8, 0, 1));
        assert_ne!(addr, Ipv4Addr::new(10, 8, 0, 255));
    }

    #[test]
    fn saturated_pool_is_exhausted() {
        // All 253 assignable hosts (.2 through .254) in use.
        let used: HashSet<_> = (2u32..=254).map(|i| Ipv4Addr::new(10, 8, 0, i as u8)).collect();
        assert_eq!(next_free_address(subnet(), &used), None);
    }

    #[test]
    fn one_below_saturation_yields_the_gap() {
        let mut used: HashSet<_> = (2u32..=254)
            .map(|i| Ipv4Addr::new(10, 8, 0, i as u8))
            .collect();
        used.remove(&Ipv4Addr::new(10, 8, 0, 77));
        assert_eq!(
            next_free_address(subnet(), &used),
            Some(Ipv4Addr::new(10, 8, 0, 77))
        );
    }
}
