use std::{io::Write, net::Ipv4Addr};

use super::{ClientPeer, ServerIdentity, ServiceError, Wgadmin};

pub(crate) fn server_interface_block(
    identity: &ServerIdentity,
    prefix: u8,
    nat_interface: &str,
) -> String {
    format!(
        "[Interface]
PrivateKey = {private_key}
Address = {address}/{prefix}
ListenPort = {port}
PostUp = iptables -A FORWARD -i %i -j ACCEPT; iptables -t nat -A POSTROUTING -o {nat} -j MASQUERADE
PostDown = iptables -D FORWARD -i %i -j ACCEPT; iptables -t nat -D POSTROUTING -o {nat} -j MASQUERADE
",
        private_key = identity.private_key,
        address = identity.address,
        port = identity.port,
        nat = nat_interface,
    )
}

/// Appendable `[Peer]` fragment; a single-host allowed range.
pub(crate) fn peer_block(public_key: &str, address: Ipv4Addr) -> String {
    format!("\n[Peer]\nPublicKey = {public_key}\nAllowedIPs = {address}/32\n")
}

/// Ready-to-import client config: full-tunnel routing through the
/// server with a periodic keepalive. This exact text doubles as the QR
/// payload.
pub(crate) fn client_config(
    client: &ClientPeer,
    prefix: u8,
    server_public_key: &str,
    endpoint_host: &str,
    port: u16,
) -> String {
    format!(
        "[Interface]
PrivateKey = {private_key}
Address = {address}/{prefix}
DNS = 1.1.1.1

[Peer]
PublicKey = {server_public_key}
Endpoint = {endpoint_host}:{port}
AllowedIPs = 0.0.0.0/0
PersistentKeepalive = 25
",
        private_key = client.private_key,
        address = client.address,
    )
}

impl Wgadmin {
    pub(crate) fn render_full_config(
        &self,
        identity: &ServerIdentity,
        clients: &[ClientPeer],
    ) -> String {
        let mut text =
            server_interface_block(identity, self.subnet.network_length(), &self.nat_interface);
        for client in clients {
            text.push_str(&peer_block(&client.public_key, client.address));
        }
        text
    }

    /// Full overwrite of the interface config. Local installs go
    /// through a temp file in the target directory and a rename, so
    /// the daemon never observes a partial write; remote installs
    /// stage through the runner and move into place.
    pub(crate) async fn install_config(&self, contents: &str) -> Result<(), ServiceError> {
        if self.runner.is_remote() {
            self.install_remote(contents).await
        } else {
            self.install_local(contents)
        }
    }

    fn install_local(&self, contents: &str) -> Result<(), ServiceError> {
        std::fs::create_dir_all(&self.config_dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.config_dir)?;
        tmp.write_all(contents.as_bytes())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(0o600))?;
        }
        tmp.persist(self.config_path()).map_err(|e| e.error)?;
        Ok(())
    }

    async fn install_remote(&self, contents: &str) -> Result<(), ServiceError> {
        let staging = "/tmp/wgadmin.conf.tmp";
        let target = self.config_path().display().to_string();

        let out = self
            .runner
            .run_piped(true, "tee", &[staging], contents.as_bytes())
            .await;
        if !out.success() {
            return Err(ServiceError::Unexpected(format!(
                "remote config staging failed: {}",
                out.stderr
            )));
        }
        let out = self.runner.run(true, "chmod", &["600", staging]).await;
        if !out.success() {
            return Err(ServiceError::Unexpected(format!(
                "remote chmod failed: {}",
                out.stderr
            )));
        }
        let out = self.runner.run(true, "mv", &[staging, &target]).await;
        if !out.success() {
            return Err(ServiceError::Unexpected(format!(
                "remote config install failed: {}",
                out.stderr
            )));
        }
        Ok(())
    }

    /// Append-only peer addition. Serialized by the caller's mutation
    /// guard, so blocks never interleave.
    pub(crate) async fn append_config(&self, block: &str) -> Result<(), ServiceError> {
        if self.runner.is_remote() {
            let target = self.config_path().display().to_string();
            let out = self
                .runner
                .run_piped(true, "tee", &["-a", &target], block.as_bytes())
                .await;
            if !out.success() {
                return Err(ServiceError::Unexpected(format!(
                    "remote config append failed: {}",
                    out.stderr
                )));
            }
            Ok(())
        } else {
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.config_path())?;
            file.write_all(block.as_bytes())?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;
    use uuid::Uuid;

    use super::*;

    fn identity() -> ServerIdentity {
        ServerIdentity {
            private_key: "srv-priv=".to_owned(),
            public_key: "srv-pub=".to_owned(),
            address: Ipv4Addr::new(10, 8, 0, 1),
            port: 51820,
            initialized: true,
            created_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    fn client() -> ClientPeer {
        ClientPeer {
            id: Uuid::nil(),
            name: "laptop".to_owned(),
            public_key: "cli-pub=".to_owned(),
            private_key: "cli-priv=".to_owned(),
            address: Ipv4Addr::new(10, 8, 0, 2),
            enabled: true,
            os_info: None,
            created_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn server_block_carries_nat_hooks() {
        let text = server_interface_block(&identity(), 24, "eth0");
        assert!(text.starts_with("[Interface]\n"));
        assert!(text.contains("PrivateKey = srv-priv=\n"));
        assert!(text.contains("Address = 10.8.0.1/24\n"));
        assert!(text.contains("ListenPort = 51820\n"));
        assert!(text.contains("POSTROUTING -o eth0 -j MASQUERADE"));
    }

    #[test]
    fn peer_block_is_single_host() {
        let block = peer_block("cli-pub=", Ipv4Addr::new(10, 8, 0, 2));
        assert_eq!(
            block,
            "\n[Peer]\nPublicKey = cli-pub=\nAllowedIPs = 10.8.0.2/32\n"
        );
    }

    #[test]
    fn client_config_points_back_at_the_server() {
        let text = client_config(&client(), 24, "srv-pub=", "vpn.example.org", 51820);

        // The [Peer] public key must be the server's.
        let peer_key = text
            .lines()
            .skip_while(|l| *l != "[Peer]")
            .find_map(|l| l.strip_prefix("PublicKey = "))
            .unwrap();
        assert_eq!(peer_key, "srv-pub=");

        assert!(text.contains("Address = 10.8.0.2/24\n"));
        assert!(text.contains("Endpoint = vpn.example.org:51820\n"));
        assert!(text.contains("AllowedIPs = 0.0.0.0/0\n"));
        assert!(text.contains("PersistentKeepalive = 25\n"));
    }
}
