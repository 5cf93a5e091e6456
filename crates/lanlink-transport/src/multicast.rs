//! UDP multicast implementation of the discovery substrate.
//!
//! Records are announced as JSON datagrams on a fixed multicast group.
//! The browse side aggregates announcements into the current result set
//! and expires records that stop announcing.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::discovery::{
    BrowseEvent, Browsing, Discovery, Publication, PublishEvent, ServiceRecord, SERVICE_TYPE,
};
use crate::error::DiscoveryError;

const DEFAULT_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 71, 71);
const DEFAULT_PORT: u16 = 47471;
const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(2);
/// A record not re-announced within this window drops out of results.
const RECORD_TIMEOUT: Duration = Duration::from_secs(8);
const MAX_DATAGRAM: usize = 2048;

/// One announcement datagram.
#[derive(Debug, Serialize, Deserialize)]
struct Announcement {
    service_type: String,
    name: String,
    port: u16,
}

/// UDP multicast discovery on the local network.
#[derive(Debug, Clone)]
pub struct MulticastDiscovery {
    group: Ipv4Addr,
    port: u16,
}

impl MulticastDiscovery {
    /// Discovery on the default multicast group and port.
    pub fn new() -> Self {
        Self::with_endpoint(DEFAULT_GROUP, DEFAULT_PORT)
    }

    /// Discovery on an explicit multicast group and port.
    pub fn with_endpoint(group: Ipv4Addr, port: u16) -> Self {
        Self { group, port }
    }
}

impl Default for MulticastDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl Discovery for MulticastDiscovery {
    fn publish(&self, record: ServiceRecord) -> Result<Publication, DiscoveryError> {
        let socket = announce_socket()?;
        let dest = SocketAddr::from((self.group, self.port));
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        tokio::spawn(announce_loop(socket, record, dest, tx, cancel.clone()));
        Ok(Publication::new(rx, cancel))
    }

    fn browse(&self) -> Result<Browsing, DiscoveryError> {
        let socket = browse_socket(self.group, self.port)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        tokio::spawn(browse_loop(socket, tx, cancel.clone()));
        Ok(Browsing::new(rx, cancel))
    }
}

fn announce_socket() -> Result<UdpSocket, DiscoveryError> {
    let socket =
        std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).map_err(DiscoveryError::Socket)?;
    socket
        .set_multicast_ttl_v4(1)
        .map_err(DiscoveryError::Socket)?;
    socket.set_nonblocking(true).map_err(DiscoveryError::Socket)?;
    UdpSocket::from_std(socket).map_err(DiscoveryError::Socket)
}

fn browse_socket(group: Ipv4Addr, port: u16) -> Result<UdpSocket, DiscoveryError> {
    let socket =
        std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)).map_err(DiscoveryError::Socket)?;
    socket
        .join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)
        .map_err(DiscoveryError::Socket)?;
    socket.set_nonblocking(true).map_err(DiscoveryError::Socket)?;
    UdpSocket::from_std(socket).map_err(DiscoveryError::Socket)
}

async fn announce_loop(
    socket: UdpSocket,
    record: ServiceRecord,
    dest: SocketAddr,
    tx: mpsc::UnboundedSender<PublishEvent>,
    cancel: CancellationToken,
) {
    let announcement = Announcement {
        service_type: SERVICE_TYPE.to_string(),
        name: record.name.clone(),
        port: record.addr.port(),
    };
    let datagram = match serde_json::to_vec(&announcement) {
        Ok(datagram) => datagram,
        Err(err) => {
            let _ = tx.send(PublishEvent::Failed(err.into()));
            return;
        }
    };

    let mut registered = false;
    let mut tick = tokio::time::interval(ANNOUNCE_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tick.tick() => {
                match socket.send_to(&datagram, dest).await {
                    Ok(_) => {
                        if !registered {
                            registered = true;
                            if tx.send(PublishEvent::Registered).is_err() {
                                return;
                            }
                        }
                    }
                    Err(err) => {
                        let _ = tx.send(PublishEvent::Failed(DiscoveryError::from_session_io(err)));
                        return;
                    }
                }
            }
        }
    }
}

async fn browse_loop(
    socket: UdpSocket,
    tx: mpsc::UnboundedSender<BrowseEvent>,
    cancel: CancellationToken,
) {
    let mut seen: HashMap<String, (ServiceRecord, Instant)> = HashMap::new();
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut sweep = tokio::time::interval(ANNOUNCE_INTERVAL);

    // Browsers start from a defined (possibly empty) set.
    if !emit_results(&tx, &seen) {
        return;
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sweep.tick() => {
                let now = Instant::now();
                let before = seen.len();
                seen.retain(|_, (_, last_seen)| now.duration_since(*last_seen) < RECORD_TIMEOUT);
                if seen.len() != before && !emit_results(&tx, &seen) {
                    return;
                }
            }
            received = socket.recv_from(&mut buf) => {
                match received {
                    Ok((n, from)) => {
                        let Some(record) = parse_announcement(&buf[..n], from) else {
                            continue;
                        };
                        let changed = match seen.get(&record.name) {
                            Some((existing, _)) => existing.addr != record.addr,
                            None => true,
                        };
                        seen.insert(record.name.clone(), (record, Instant::now()));
                        if changed && !emit_results(&tx, &seen) {
                            return;
                        }
                    }
                    Err(err) => {
                        let _ = tx.send(BrowseEvent::Failed(DiscoveryError::from_session_io(err)));
                        return;
                    }
                }
            }
        }
    }
}

fn parse_announcement(datagram: &[u8], from: SocketAddr) -> Option<ServiceRecord> {
    let announcement: Announcement = match serde_json::from_slice(datagram) {
        Ok(announcement) => announcement,
        Err(err) => {
            trace!(%from, error = %err, "ignoring malformed announcement");
            return None;
        }
    };
    if announcement.service_type != SERVICE_TYPE {
        return None;
    }
    Some(ServiceRecord::new(
        announcement.name,
        SocketAddr::new(from.ip(), announcement.port),
    ))
}

fn emit_results(
    tx: &mpsc::UnboundedSender<BrowseEvent>,
    seen: &HashMap<String, (ServiceRecord, Instant)>,
) -> bool {
    let mut results: Vec<ServiceRecord> = seen.values().map(|(record, _)| record.clone()).collect();
    results.sort_by(|a, b| a.name.cmp(&b.name));
    tx.send(BrowseEvent::Results(results)).is_ok()
}
