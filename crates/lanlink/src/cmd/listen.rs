use std::sync::Arc;

use lanlink_frame::{Frame, MessageType, Reassembler};
use lanlink_peer::{Connection, ConnectionEvent, ConnectionEvents, ListenerEvent, PeerListener};
use lanlink_transport::{Discovery, MulticastDiscovery};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::cmd::ListenArgs;
use crate::exit::{peer_error, CliResult, SUCCESS};
use crate::output::{print_message, OutputFormat};

pub async fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let discovery: Arc<dyn Discovery> = Arc::new(MulticastDiscovery::new());
    let (listener, mut events) = PeerListener::new(&args.name, discovery);
    listener
        .setup(args.bind)
        .await
        .map_err(|err| peer_error("setup failed", err))?;
    listener
        .start()
        .map_err(|err| peer_error("start failed", err))?;

    let (message_tx, mut message_rx) = mpsc::unbounded_channel::<(String, Frame)>();
    let mut printed = 0usize;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Some((peer, frame)) = message_rx.recv() => {
                print_message(&frame, &peer, format);
                printed = printed.saturating_add(1);
                if args.count.is_some_and(|count| printed >= count) {
                    break;
                }
            }
            event = events.recv() => match event {
                Some(ListenerEvent::Ready { local_addr }) => {
                    info!(%local_addr, name = %args.name, "listening");
                }
                Some(ListenerEvent::Accepted { connection, events }) => {
                    tokio::spawn(pump_connection(connection, events, message_tx.clone()));
                }
                Some(ListenerEvent::Failed(err)) => {
                    listener.stop();
                    return Err(peer_error("listener failed", err));
                }
                Some(ListenerEvent::Cancelled) | None => break,
            },
        }
    }

    listener.stop();
    Ok(SUCCESS)
}

/// Forward one accepted connection's messages to the printer, buffering
/// chunked transfers until the stream ends.
async fn pump_connection(
    connection: Connection,
    mut events: ConnectionEvents,
    out: mpsc::UnboundedSender<(String, Frame)>,
) {
    if let Err(err) = connection.start() {
        warn!(error = %err, "could not start accepted connection");
        return;
    }

    let mut peer = String::from("unknown");
    let mut transfer = Reassembler::new();

    while let Some(event) = events.recv().await {
        match event {
            ConnectionEvent::Ready { peer_name } => {
                if let Some(name) = peer_name {
                    peer = name;
                }
                info!(%peer, "peer connected");
            }
            ConnectionEvent::Message(frame) => match frame.message_type {
                MessageType::BinaryChunk => transfer.push(frame.payload),
                _ => {
                    let _ = out.send((peer.clone(), frame));
                }
            },
            ConnectionEvent::Error(err) => warn!(%peer, error = %err, "send error"),
            ConnectionEvent::Failed(err) => {
                warn!(%peer, error = %err, "connection failed");
                break;
            }
            ConnectionEvent::Cancelled => {
                info!(%peer, "peer disconnected");
                break;
            }
        }
    }

    if !transfer.is_empty() {
        let chunks = transfer.chunk_count();
        let data = transfer.assemble();
        info!(%peer, bytes = data.len(), chunks, "binary transfer complete");
        let _ = out.send((peer, Frame::new(MessageType::BinaryChunk, data)));
    }
}
