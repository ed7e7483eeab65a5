use super::Wgadmin;

/// One stanza of the daemon's status dump. Fields a peer has not
/// produced yet (no handshake, no endpoint) stay `None`; the parser
/// never rejects partial output.
#[derive(Debug, Clone, Default)]
pub struct LivePeer {
    pub public_key: String,
    pub endpoint: Option<String>,
    pub latest_handshake: Option<String>,
    pub transfer_rx: Option<String>,
    pub transfer_tx: Option<String>,
    pub allowed_ips: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LiveStatus {
    pub running: bool,
    pub peers: Vec<LivePeer>,
}

impl LiveStatus {
    pub fn down() -> Self {
        Self {
            running: false,
            peers: Vec::new(),
        }
    }
}

fn value_of(line: &str) -> Option<&str> {
    line.split_once(':').map(|(_, v)| v.trim())
}

/// Takes the `<value> <unit>` pair out of one half of a transfer line,
/// dropping the trailing "received"/"sent" word.
fn transfer_figure(half: &str) -> Option<String> {
    let mut tokens = half.split_whitespace();
    let value = tokens.next()?;
    let unit = tokens.next()?;
    Some(format!("{value} {unit}"))
}

/// Parses the multi-line `wg show <iface>` dump. Stanzas open with a
/// `peer:` line; indented lines up to the next marker belong to that
/// peer.
pub fn parse_status_dump(dump: &str) -> Vec<LivePeer> {
    let mut peers = Vec::new();
    let mut current: Option<LivePeer> = None;

    for line in dump.lines() {
        if let Some(key) = line.strip_prefix("peer:") {
            if let Some(peer) = current.take() {
                peers.push(peer);
            }
            current = Some(LivePeer {
                public_key: key.trim().to_owned(),
                ..Default::default()
            });
            continue;
        }

        let Some(peer) = current.as_mut() else {
            continue;
        };
        let trimmed = line.trim_start();
        if trimmed.starts_with("endpoint:") {
            peer.endpoint = value_of(trimmed).map(str::to_owned);
        } else if trimmed.starts_with("latest handshake:") {
            peer.latest_handshake = value_of(trimmed).map(str::to_owned);
        } else if trimmed.starts_with("allowed ips:") {
            peer.allowed_ips = value_of(trimmed).map(str::to_owned);
        } else if trimmed.starts_with("transfer:") {
            if let Some((rx, tx)) = value_of(trimmed).and_then(|v| v.split_once(", ")) {
                peer.transfer_rx = transfer_figure(rx);
                peer.transfer_tx = transfer_figure(tx);
            }
        }
    }

    if let Some(peer) = current {
        peers.push(peer);
    }

    peers
}

/// Converts a `<decimal> <unit>` figure ("1.5 GiB") into bytes,
/// rounding toward zero. Telemetry is best effort: anything malformed
/// parses to zero instead of failing.
pub fn parse_traffic(figure: &str) -> u64 {
    let figure = figure.trim();
    if figure.is_empty() || figure == "0 B" {
        return 0;
    }

    let mut tokens = figure.split_whitespace();
    let (Some(value), Some(unit), None) = (tokens.next(), tokens.next(), tokens.next()) else {
        return 0;
    };
    let Ok(value) = value.parse::<f64>() else {
        return 0;
    };
    let multiplier: u64 = match unit {
        "B" => 1,
        "KiB" => 1 << 10,
        "MiB" => 1 << 20,
        "GiB" => 1 << 30,
        "TiB" => 1 << 40,
        _ => return 0,
    };

    (value * multiplier as f64) as u64
}

impl Wgadmin {
    /// Live peer table, pulled fresh on every call. A failing status
    /// command means the interface is not up, which is an answer, not
    /// an error.
    pub async fn live_status(&self) -> LiveStatus {
        let out = self.runner.run(true, "wg", &["show", &self.interface]).await;
        if !out.success() {
            return LiveStatus::down();
        }
        LiveStatus {
            running: true,
            peers: parse_status_dump(&out.stdout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = "\
interface: wg0
  public key: SRVPUBKEY=
  private key: (hidden)
  listening port: 51820

peer: AAAApub=
  endpoint: 203.0.113.7:53100
  allowed ips: 10.8.0.2/32
  latest handshake: 1 minute, 12 seconds ago
  transfer: 1.5 GiB received, 512 KiB sent

peer: BBBBpub=
  allowed ips: 10.8.0.3/32
";

    #[test]
    fn full_and_partial_stanzas() {
        let peers = parse_status_dump(DUMP);
        assert_eq!(peers.len(), 2);

        let first = &peers[0];
        assert_eq!(first.public_key, "AAAApub=");
        assert_eq!(first.endpoint.as_deref(), Some("203.0.113.7:53100"));
        assert_eq!(
            first.latest_handshake.as_deref(),
            Some("1 minute, 12 seconds ago")
        );
        assert_eq!(first.transfer_rx.as_deref(), Some("1.5 GiB"));
        assert_eq!(first.transfer_tx.as_deref(), Some("512 KiB"));
        assert_eq!(first.allowed_ips.as_deref(), Some("10.8.0.2/32"));

        let second = &peers[1];
        assert_eq!(second.public_key, "BBBBpub=");
        assert!(second.latest_handshake.is_none());
        assert!(second.endpoint.is_none());
        assert!(second.transfer_rx.is_none());
    }

    #[test]
    fn empty_dump_parses_to_nothing() {
        assert!(parse_status_dump("").is_empty());
        assert!(parse_status_dump("interface: wg0\n  listening port: 51820\n").is_empty());
    }

    #[test]
    fn traffic_vectors() {
        assert_eq!(parse_traffic("1.5 GiB"), 1_610_612_736);
        assert_eq!(parse_traffic("512 KiB"), 524_288);
        assert_eq!(parse_traffic("0 B"), 0);
        assert_eq!(parse_traffic(""), 0);
        assert_eq!(parse_traffic("bogus"), 0);
        assert_eq!(parse_traffic("12 parsecs"), 0);
        assert_eq!(parse_traffic("1 2 3"), 0);
    }

    #[test]
    fn traffic_rounds_toward_zero() {
        // 0.3 KiB = 307.2 bytes
        assert_eq!(parse_traffic("0.3 KiB"), 307);
    }
}
