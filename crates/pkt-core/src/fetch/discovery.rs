//! LAN peer discovery.
//!
//! A query `Q:<filename>` is broadcast once per up, non-loopback interface.
//! Every `H:<filename>:<port>` reply that arrives inside the window names a
//! peer serving the file over HTTP.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use async_trait::async_trait;
use nix::ifaddrs::getifaddrs;
use nix::net::if_::InterfaceFlags;
use tokio::net::UdpSocket;
use tokio::time::{Instant, timeout_at};

use pkt_schema::DiscoveryMessage;

/// A peer able to serve an artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    /// `http://host:port`, without a trailing slash.
    pub base_url: String,
}

impl Peer {
    /// Peer at the address a reply came from, serving on `port`.
    pub fn from_addr(addr: SocketAddr, port: u16) -> Self {
        Self {
            base_url: format!("http://{}:{port}", addr.ip()),
        }
    }

    /// Download URL for `filename` on this peer.
    pub fn url_for(&self, filename: &str) -> String {
        format!("{}/{filename}", self.base_url)
    }
}

/// Source of peers for an artifact filename.
#[async_trait]
pub trait PeerDiscovery: Send + Sync {
    /// Peers in the order they answered. Discovery is best-effort: failures
    /// yield an empty list.
    async fn discover(&self, filename: &str) -> Vec<Peer>;
}

/// UDP broadcast discovery on the local network.
#[derive(Debug, Clone)]
pub struct LanDiscovery {
    /// UDP port peers listen on.
    pub port: u16,
    /// How long to wait for replies.
    pub window: Duration,
}

impl LanDiscovery {
    /// Discovery on `port`, collecting replies for `window`.
    pub fn new(port: u16, window: Duration) -> Self {
        Self { port, window }
    }

    /// Broadcast addresses of every up, non-loopback IPv4 interface.
    fn broadcast_targets(&self) -> Vec<SocketAddrV4> {
        let addrs = match getifaddrs() {
            Ok(addrs) => addrs,
            Err(e) => {
                tracing::warn!("Cannot enumerate interfaces: {e}");
                return Vec::new();
            }
        };

        let mut targets = Vec::new();
        for ifaddr in addrs {
            let flags = ifaddr.flags;
            if !flags.contains(InterfaceFlags::IFF_UP)
                || flags.contains(InterfaceFlags::IFF_LOOPBACK)
                || !flags.contains(InterfaceFlags::IFF_BROADCAST)
            {
                continue;
            }
            let Some(sin) = ifaddr.broadcast.as_ref().and_then(|b| b.as_sockaddr_in()) else {
                continue;
            };
            let target = SocketAddrV4::new(Ipv4Addr::from(sin.ip()), self.port);
            if !targets.contains(&target) {
                tracing::debug!(interface = %ifaddr.interface_name, %target, "discovery target");
                targets.push(target);
            }
        }
        targets
    }
}

#[async_trait]
impl PeerDiscovery for LanDiscovery {
    async fn discover(&self, filename: &str) -> Vec<Peer> {
        let targets = self.broadcast_targets();
        if targets.is_empty() {
            return Vec::new();
        }
        match query_targets(&targets, filename, self.window).await {
            Ok(peers) => peers,
            Err(e) => {
                tracing::warn!("LAN discovery failed: {e}");
                Vec::new()
            }
        }
    }
}

/// Send one query to each target and collect matching replies until the
/// window closes.
///
/// # Errors
///
/// Returns an IO error if the socket cannot be set up. Individual send
/// failures are logged and skipped.
pub async fn query_targets(
    targets: &[SocketAddrV4],
    filename: &str,
    window: Duration,
) -> std::io::Result<Vec<Peer>> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.set_broadcast(true)?;
    socket.set_ttl(1)?;

    let query = DiscoveryMessage::Query {
        filename: filename.to_string(),
    }
    .encode();

    for target in targets {
        if let Err(e) = socket.send_to(query.as_bytes(), target).await {
            tracing::debug!(%target, "discovery send failed: {e}");
        }
    }

    let deadline = Instant::now() + window;
    let mut peers = Vec::new();
    let mut buf = [0u8; 1500];
    loop {
        let (len, from) = match timeout_at(deadline, socket.recv_from(&mut buf)).await {
            Err(_) => break,
            Ok(Err(e)) => {
                tracing::debug!("discovery recv failed: {e}");
                continue;
            }
            Ok(Ok(received)) => received,
        };
        match DiscoveryMessage::parse(&buf[..len]) {
            Some(DiscoveryMessage::Have { filename: have, port }) if have == filename => {
                let peer = Peer::from_addr(from, port);
                if !peers.contains(&peer) {
                    tracing::debug!(peer = %peer.base_url, "peer has {filename}");
                    peers.push(peer);
                }
            }
            _ => tracing::trace!(%from, "ignoring discovery datagram"),
        }
    }
    Ok(peers)
}

/// Fixed peer list.
#[derive(Debug, Clone, Default)]
pub struct StaticPeers(pub Vec<Peer>);

#[async_trait]
impl PeerDiscovery for StaticPeers {
    async fn discover(&self, _filename: &str) -> Vec<Peer> {
        self.0.clone()
    }
}
