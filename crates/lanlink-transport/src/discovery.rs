//! Service-discovery substrate interface.
//!
//! Listeners publish a [`ServiceRecord`]; browsers receive the full
//! current record set on every update (never a diff — consumers diff
//! against their own previous set). Implementations push events through
//! the returned handles; nothing here blocks the caller.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::DiscoveryError;

/// Service type shared by advertisement and browse. Both sides filter
/// on the same identifier, so only matching peers find each other.
pub const SERVICE_TYPE: &str = "_lanlink._tcp";

/// One discovered (or advertised) peer service.
///
/// Records are ephemeral: the browse side re-derives the full set on
/// every discovery update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Display name chosen by the advertising node.
    pub name: String,
    /// Endpoint the peer accepts connections on.
    pub addr: SocketAddr,
}

impl ServiceRecord {
    /// Create a new record.
    pub fn new(name: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            name: name.into(),
            addr,
        }
    }
}

/// Events reported for a published record.
#[derive(Debug)]
pub enum PublishEvent {
    /// The record is registered and visible to browsers.
    Registered,
    /// Publishing failed. [`DiscoveryError::is_transient`] separates a
    /// silently dying record (re-register) from a fatal failure.
    Failed(DiscoveryError),
}

/// Events reported to a browse session.
#[derive(Debug)]
pub enum BrowseEvent {
    /// The full current result set.
    Results(Vec<ServiceRecord>),
    /// Browsing failed; same transient/fatal split as [`PublishEvent`].
    Failed(DiscoveryError),
}

/// Handle to an advertised record.
///
/// The record stays registered until the handle is cancelled or
/// dropped.
#[derive(Debug)]
pub struct Publication {
    events: mpsc::UnboundedReceiver<PublishEvent>,
    cancel: CancellationToken,
}

impl Publication {
    /// Assemble a publication from the channel/token pair a substrate
    /// implementation drives.
    pub fn new(events: mpsc::UnboundedReceiver<PublishEvent>, cancel: CancellationToken) -> Self {
        Self { events, cancel }
    }

    /// Next publish event; `None` once the substrate side shut down.
    pub async fn next_event(&mut self) -> Option<PublishEvent> {
        self.events.recv().await
    }

    /// Release the advertised record. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Publication {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Handle to an active browse session.
#[derive(Debug)]
pub struct Browsing {
    events: mpsc::UnboundedReceiver<BrowseEvent>,
    cancel: CancellationToken,
}

impl Browsing {
    /// Assemble a browse session from the channel/token pair a substrate
    /// implementation drives.
    pub fn new(events: mpsc::UnboundedReceiver<BrowseEvent>, cancel: CancellationToken) -> Self {
        Self { events, cancel }
    }

    /// Next browse event; `None` once the substrate side shut down.
    pub async fn next_event(&mut self) -> Option<BrowseEvent> {
        self.events.recv().await
    }

    /// Stop the browse session. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Browsing {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// A local service-discovery substrate offering publish/browse/cancel.
pub trait Discovery: Send + Sync {
    /// Advertise `record` under [`SERVICE_TYPE`]. The returned handle
    /// reports [`PublishEvent::Registered`] once the record is visible
    /// and keeps it alive until cancelled.
    fn publish(&self, record: ServiceRecord) -> Result<Publication, DiscoveryError>;

    /// Browse for records advertised under [`SERVICE_TYPE`]. Every
    /// update delivers the full current set.
    fn browse(&self) -> Result<Browsing, DiscoveryError>;
}
