//! LAN transport substrate: TCP peer streams and service discovery.
//!
//! This is the lowest layer of lanlink. It provides:
//! - [`PeerStream`]/[`StreamListener`]: a reliable, ordered,
//!   bidirectional byte-stream transport over TCP with keepalive
//! - [`Discovery`]: the publish/browse interface both the listener and
//!   the browser build on, with a UDP multicast implementation
//!   ([`MulticastDiscovery`])
//!
//! Everything else builds on top of the types provided here.

pub mod discovery;
pub mod error;
pub mod multicast;
pub mod tcp;

pub use discovery::{
    BrowseEvent, Browsing, Discovery, Publication, PublishEvent, ServiceRecord, SERVICE_TYPE,
};
pub use error::{DiscoveryError, Result, TransportError};
pub use multicast::MulticastDiscovery;
pub use tcp::{connect, PeerStream, StreamListener};
