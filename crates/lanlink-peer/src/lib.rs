//! Peer lifecycle management: connections, listeners, and browsers.
//!
//! This is the "just works" layer. Discover peers with a
//! [`PeerBrowser`], advertise and accept them with a [`PeerListener`],
//! and exchange typed frames over a [`Connection`]. All work runs on
//! background tasks; every lifecycle, result, and message outcome is
//! delivered as an event on the channel handed out at construction, so
//! no public operation ever blocks its caller.

pub mod browser;
pub mod connection;
pub mod error;
pub mod listener;
pub mod state;

pub use browser::{BrowserEvent, BrowserEvents, PeerBrowser};
pub use connection::{Connection, ConnectionEvent, ConnectionEvents};
pub use error::{PeerError, Result};
pub use listener::{ListenerEvent, ListenerEvents, PeerListener};
pub use state::LifecycleState;
