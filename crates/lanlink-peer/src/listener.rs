use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use lanlink_transport::{
    Discovery, Publication, PublishEvent, ServiceRecord, StreamListener,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::connection::{Connection, ConnectionEvents};
use crate::error::PeerError;
use crate::state::{LifecycleState, StateCell};

/// Events delivered to the consumer of a [`PeerListener`].
#[derive(Debug)]
pub enum ListenerEvent {
    /// The service record is registered and the listener is accepting.
    Ready { local_addr: SocketAddr },
    /// One accepted inbound transport, wrapped in exactly one new
    /// connection. Call `connection.start()` to drive it.
    Accepted {
        connection: Connection,
        events: ConnectionEvents,
    },
    /// Terminal failure; reported once.
    Failed(PeerError),
    /// The listener was stopped. Terminal; reported once.
    Cancelled,
}

/// The event stream handed out when a listener is constructed.
pub type ListenerEvents = mpsc::UnboundedReceiver<ListenerEvent>;

struct Shared {
    state: StateCell,
    events: mpsc::UnboundedSender<ListenerEvent>,
    cancel: CancellationToken,
}

impl Shared {
    fn terminate(&self, to: LifecycleState, event: ListenerEvent) {
        if self.state.terminate(to) {
            let _ = self.events.send(event);
        }
    }
}

struct SetupParts {
    listener: StreamListener,
    publication: Publication,
    record: ServiceRecord,
}

/// Advertises this node and turns accepted inbound transports into
/// connections.
///
/// Same lifecycle shape as a [`Connection`], minus a resolved peer
/// name: `Setup → Preparing → Ready → Failed | Cancelled`.
pub struct PeerListener {
    name: String,
    discovery: Arc<dyn Discovery>,
    shared: Arc<Shared>,
    setup: Mutex<Option<SetupParts>>,
}

impl PeerListener {
    /// Create a listener that advertises under `name`. Returns the
    /// handle and its event stream.
    pub fn new(name: impl Into<String>, discovery: Arc<dyn Discovery>) -> (Self, ListenerEvents) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let listener = Self {
            name: name.into(),
            discovery,
            shared: Arc::new(Shared {
                state: StateCell::new(),
                events: event_tx,
                cancel: CancellationToken::new(),
            }),
            setup: Mutex::new(None),
        };
        (listener, event_rx)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.shared.state.get()
    }

    /// The display name this node advertises under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bind the transport listener and register this node's presence
    /// under the shared service type.
    pub async fn setup(&self, bind_addr: SocketAddr) -> Result<(), PeerError> {
        if self
            .setup
            .lock()
            .ok()
            .is_none_or(|slot| slot.is_some())
        {
            return Err(PeerError::InvalidState("listener already set up"));
        }
        if self.shared.state.get() != LifecycleState::Setup {
            return Err(PeerError::Closed);
        }

        let listener = StreamListener::bind(bind_addr).await?;
        let record = ServiceRecord::new(self.name.clone(), listener.local_addr()?);
        let publication = self.discovery.publish(record.clone())?;

        let Ok(mut slot) = self.setup.lock() else {
            publication.cancel();
            return Err(PeerError::Closed);
        };
        if slot.is_some() {
            publication.cancel();
            return Err(PeerError::InvalidState("listener already set up"));
        }
        *slot = Some(SetupParts {
            listener,
            publication,
            record,
        });
        Ok(())
    }

    /// Begin accepting. Each accepted transport is delivered as one
    /// [`ListenerEvent::Accepted`]; no batching. Non-blocking.
    pub fn start(&self) -> Result<(), PeerError> {
        let Some(parts) = self.setup.lock().ok().and_then(|mut slot| slot.take()) else {
            if self.shared.state.get().is_terminal() {
                return Err(PeerError::Closed);
            }
            return Err(PeerError::InvalidState("listener not set up"));
        };
        if !self
            .shared
            .state
            .transition(LifecycleState::Setup, LifecycleState::Preparing)
        {
            parts.publication.cancel();
            return Err(PeerError::Closed);
        }

        let shared = Arc::clone(&self.shared);
        let discovery = Arc::clone(&self.discovery);
        tokio::spawn(drive(shared, discovery, parts));
        Ok(())
    }

    /// Stop accepting and release the advertised record.
    ///
    /// Idempotent: at most one [`ListenerEvent::Cancelled`] is ever
    /// delivered. The handle is dead afterward and must not be reused.
    pub fn stop(&self) {
        if self.shared.state.get() == LifecycleState::Setup {
            // Never started: release any registered record directly.
            if let Some(parts) = self.setup.lock().ok().and_then(|mut slot| slot.take()) {
                parts.publication.cancel();
            }
            self.shared
                .terminate(LifecycleState::Cancelled, ListenerEvent::Cancelled);
        }
        self.shared.cancel.cancel();
    }
}

impl Drop for PeerListener {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

impl std::fmt::Debug for PeerListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerListener")
            .field("name", &self.name)
            .field("state", &self.shared.state.get())
            .finish()
    }
}

async fn drive(shared: Arc<Shared>, discovery: Arc<dyn Discovery>, parts: SetupParts) {
    let SetupParts {
        listener,
        mut publication,
        record,
    } = parts;

    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => {
                publication.cancel();
                shared.terminate(LifecycleState::Cancelled, ListenerEvent::Cancelled);
                return;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    debug!(%addr, "accepted inbound connection");
                    let (connection, events) = Connection::inbound(stream);
                    let _ = shared.events.send(ListenerEvent::Accepted { connection, events });
                }
                Err(err) => {
                    publication.cancel();
                    shared.terminate(LifecycleState::Failed, ListenerEvent::Failed(err.into()));
                    return;
                }
            },
            event = publication.next_event() => match event {
                Some(PublishEvent::Registered) => {
                    if shared
                        .state
                        .transition(LifecycleState::Preparing, LifecycleState::Ready)
                    {
                        let _ = shared.events.send(ListenerEvent::Ready {
                            local_addr: record.addr,
                        });
                    }
                }
                // The advertised record silently died: tear it down and
                // re-register without surfacing anything.
                Some(PublishEvent::Failed(err)) if err.is_transient() => {
                    warn!(name = %record.name, error = %err, "service record lost, re-registering");
                    publication.cancel();
                    match discovery.publish(record.clone()) {
                        Ok(fresh) => publication = fresh,
                        Err(err) => {
                            shared.terminate(
                                LifecycleState::Failed,
                                ListenerEvent::Failed(err.into()),
                            );
                            return;
                        }
                    }
                }
                Some(PublishEvent::Failed(err)) => {
                    publication.cancel();
                    shared.terminate(LifecycleState::Failed, ListenerEvent::Failed(err.into()));
                    return;
                }
                // Substrate ended the session without a verdict; treat
                // it like a silently dying record.
                None => {
                    publication.cancel();
                    match discovery.publish(record.clone()) {
                        Ok(fresh) => publication = fresh,
                        Err(err) => {
                            shared.terminate(
                                LifecycleState::Failed,
                                ListenerEvent::Failed(err.into()),
                            );
                            return;
                        }
                    }
                }
            },
        }
    }
}
