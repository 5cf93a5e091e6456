use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lanlink_transport::{BrowseEvent, Browsing, Discovery, ServiceRecord};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::PeerError;

/// Events delivered to the consumer of a [`PeerBrowser`].
#[derive(Debug)]
pub enum BrowserEvent {
    /// The filtered full result set. This node's own record never
    /// appears; consumers diff against their own previous set.
    Results(Vec<ServiceRecord>),
    /// Terminal browse failure; reported once.
    Failed(PeerError),
}

/// The event stream handed out when a browser is constructed.
pub type BrowserEvents = mpsc::UnboundedReceiver<BrowserEvent>;

struct Shared {
    events: mpsc::UnboundedSender<BrowserEvent>,
    cancel: CancellationToken,
    started: AtomicBool,
    /// Set once a terminal event (final empty set or failure) has been
    /// delivered; everything after is dropped.
    finished: AtomicBool,
}

impl Shared {
    fn finish(&self, event: BrowserEvent) {
        if !self.finished.swap(true, Ordering::AcqRel) {
            let _ = self.events.send(event);
        }
    }
}

/// Discovers peers advertised under the shared service type.
///
/// Every discovery update carries the full current result set; the
/// browser filters out this node's own advertised name and forwards the
/// rest.
pub struct PeerBrowser {
    own_name: String,
    discovery: Arc<dyn Discovery>,
    shared: Arc<Shared>,
}

impl PeerBrowser {
    /// Create a browser. `own_name` is this node's advertised display
    /// name, excluded from every forwarded result set.
    pub fn new(own_name: impl Into<String>, discovery: Arc<dyn Discovery>) -> (Self, BrowserEvents) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let browser = Self {
            own_name: own_name.into(),
            discovery,
            shared: Arc::new(Shared {
                events: event_tx,
                cancel: CancellationToken::new(),
                started: AtomicBool::new(false),
                finished: AtomicBool::new(false),
            }),
        };
        (browser, event_rx)
    }

    /// This node's own advertised name.
    pub fn own_name(&self) -> &str {
        &self.own_name
    }

    /// Begin continuous discovery. Non-blocking; results arrive as
    /// [`BrowserEvent::Results`]. Starting twice is a caller error.
    pub fn start(&self) -> Result<(), PeerError> {
        if self.shared.started.swap(true, Ordering::AcqRel) {
            return Err(PeerError::InvalidState("browser already started"));
        }
        let browsing = self.discovery.browse()?;

        let shared = Arc::clone(&self.shared);
        let discovery = Arc::clone(&self.discovery);
        let own_name = self.own_name.clone();
        tokio::spawn(drive(shared, discovery, own_name, browsing));
        Ok(())
    }

    /// Stop browsing.
    ///
    /// One final empty result set is delivered so consumers can clear
    /// derived state. Idempotent.
    pub fn stop(&self) {
        self.shared.cancel.cancel();
        if !self.shared.started.load(Ordering::Acquire) {
            // Never started: no driver will deliver the final set.
            self.shared.finish(BrowserEvent::Results(Vec::new()));
        }
    }
}

impl Drop for PeerBrowser {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

impl std::fmt::Debug for PeerBrowser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerBrowser")
            .field("own_name", &self.own_name)
            .finish()
    }
}

async fn drive(
    shared: Arc<Shared>,
    discovery: Arc<dyn Discovery>,
    own_name: String,
    mut browsing: Browsing,
) {
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => {
                browsing.cancel();
                shared.finish(BrowserEvent::Results(Vec::new()));
                return;
            }
            event = browsing.next_event() => match event {
                Some(BrowseEvent::Results(records)) => {
                    // Full current set with this node's own record
                    // filtered out.
                    let filtered: Vec<ServiceRecord> = records
                        .into_iter()
                        .filter(|record| record.name != own_name)
                        .collect();
                    let _ = shared.events.send(BrowserEvent::Results(filtered));
                }
                // Same policy as the listener: a silently dying browse
                // session restarts internally, never surfaced.
                Some(BrowseEvent::Failed(err)) if err.is_transient() => {
                    warn!(error = %err, "browse session lost, restarting");
                    browsing.cancel();
                    match discovery.browse() {
                        Ok(fresh) => browsing = fresh,
                        Err(err) => {
                            shared.finish(BrowserEvent::Failed(err.into()));
                            return;
                        }
                    }
                }
                Some(BrowseEvent::Failed(err)) => {
                    browsing.cancel();
                    shared.finish(BrowserEvent::Failed(err.into()));
                    return;
                }
                // Substrate ended the session without a verdict;
                // restart like a transient loss.
                None => {
                    browsing.cancel();
                    match discovery.browse() {
                        Ok(fresh) => browsing = fresh,
                        Err(err) => {
                            shared.finish(BrowserEvent::Failed(err.into()));
                            return;
                        }
                    }
                }
            },
        }
    }
}
