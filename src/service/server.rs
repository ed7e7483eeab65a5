use std::net::Ipv4Addr;

use time::OffsetDateTime;
use tracing::{instrument, warn};

use super::{configs, ServiceError, Wgadmin};

/// The one server identity per deployment. Immutable once created;
/// keys are never rotated here.
#[derive(Debug, Clone)]
pub struct ServerIdentity {
    pub private_key: String,
    pub public_key: String,
    pub address: Ipv4Addr,
    pub port: u16,
    pub initialized: bool,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct ServerStatus {
    pub initialized: bool,
    pub running: bool,
    pub public_key: Option<String>,
    pub address: Option<Ipv4Addr>,
    pub port: Option<u16>,
}

impl Wgadmin {
    /// Idempotent: the first caller generates keys and installs the
    /// config, every later caller gets the existing identity back
    /// untouched.
    #[instrument(skip(self))]
    pub async fn init_server(&self) -> Result<ServerIdentity, ServiceError> {
        let _guard = self.mutations.lock().await;

        if let Some(existing) = self.database.server_identity().await? {
            return Ok(existing);
        }

        let keys = self.generate_keypair().await?;
        let identity = ServerIdentity {
            private_key: keys.private_key,
            public_key: keys.public_key,
            address: self.server_address(),
            port: self.listen_port,
            initialized: true,
            created_at: OffsetDateTime::now_utc(),
        };
        self.database.insert_server_identity(&identity).await?;

        let contents = configs::server_interface_block(
            &identity,
            self.subnet.network_length(),
            &self.nat_interface,
        );
        if let Err(e) = self.install_config(&contents).await {
            // The record is the source of truth; the file can be
            // reinstalled once the host is reachable again.
            warn!("failed to install server config: {e}");
        }

        Ok(identity)
    }

    #[instrument(skip(self))]
    pub async fn server_status(&self) -> Result<ServerStatus, ServiceError> {
        let Some(identity) = self.database.server_identity().await? else {
            return Ok(ServerStatus {
                initialized: false,
                running: false,
                public_key: None,
                address: None,
                port: None,
            });
        };

        let live = self.live_status().await;
        Ok(ServerStatus {
            initialized: true,
            running: live.running,
            public_key: Some(identity.public_key),
            address: Some(identity.address),
            port: Some(identity.port),
        })
    }

    /// An interface that is already up counts as started.
    #[instrument(skip(self))]
    pub async fn start_server(&self) -> Result<(), ServiceError> {
        let out = self
            .runner
            .run(true, "wg-quick", &["up", &self.interface])
            .await;
        if !out.success() && !out.stderr.contains("already exists") {
            return Err(ServiceError::Daemon(out.stderr));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn stop_server(&self) -> Result<(), ServiceError> {
        let out = self
            .runner
            .run(true, "wg-quick", &["down", &self.interface])
            .await;
        if !out.success() {
            return Err(ServiceError::Daemon(out.stderr));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn restart_server(&self) -> Result<(), ServiceError> {
        // A failing down is fine, the interface may simply not be up.
        self.runner
            .run(true, "wg-quick", &["down", &self.interface])
            .await;

        let out = self
            .runner
            .run(true, "wg-quick", &["up", &self.interface])
            .await;
        if !out.success() {
            return Err(ServiceError::Daemon(out.stderr));
        }
        Ok(())
    }
}
