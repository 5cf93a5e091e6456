use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use lanlink_frame::{split_chunks, MessageType, DEFAULT_CHUNK_SIZE};
use lanlink_peer::{BrowserEvent, BrowserEvents, Connection, ConnectionEvent, PeerBrowser};
use lanlink_transport::{Discovery, MulticastDiscovery, ServiceRecord};
use tracing::info;

use crate::cmd::SendArgs;
use crate::exit::{io_error, peer_error, CliError, CliResult, FAILURE, SUCCESS, TIMEOUT, USAGE};
use crate::output::OutputFormat;

enum Payload {
    Text(Bytes),
    File(Bytes),
    None,
}

pub async fn run(args: SendArgs, _format: OutputFormat) -> CliResult<i32> {
    let payload = match (&args.data, &args.file) {
        (Some(data), None) => Payload::Text(Bytes::copy_from_slice(data.as_bytes())),
        (None, Some(path)) => {
            let data = std::fs::read(path).map_err(|err| io_error("read payload file", err))?;
            Payload::File(Bytes::from(data))
        }
        (None, None) if args.disconnect => Payload::None,
        _ => {
            return Err(CliError::new(
                USAGE,
                "provide --data or --file (or --disconnect alone)",
            ))
        }
    };
    let wait = parse_duration(&args.wait_timeout).ok_or_else(|| {
        CliError::new(
            USAGE,
            format!("invalid --wait-timeout value: {}", args.wait_timeout),
        )
    })?;

    // Browse until the requested peer shows up.
    let discovery: Arc<dyn Discovery> = Arc::new(MulticastDiscovery::new());
    let (browser, mut browser_events) = PeerBrowser::new(&args.name, discovery);
    browser
        .start()
        .map_err(|err| peer_error("browse failed", err))?;

    let record = tokio::time::timeout(wait, wait_for_peer(&mut browser_events, &args.peer))
        .await
        .map_err(|_| {
            CliError::new(
                TIMEOUT,
                format!("peer '{}' not found within {}", args.peer, args.wait_timeout),
            )
        })??;
    browser.stop();

    // Connect and wait for Ready.
    let (connection, mut events) = Connection::outbound(&record);
    connection
        .start()
        .map_err(|err| peer_error("connect failed", err))?;
    loop {
        match events.recv().await {
            Some(ConnectionEvent::Ready { peer_name }) => {
                info!(peer = peer_name.as_deref().unwrap_or("unknown"), "connected");
                break;
            }
            Some(ConnectionEvent::Failed(err)) => return Err(peer_error("connect failed", err)),
            Some(ConnectionEvent::Cancelled) | None => {
                return Err(CliError::new(FAILURE, "connection closed before ready"))
            }
            Some(_) => {}
        }
    }

    match payload {
        Payload::Text(data) => {
            connection
                .send(MessageType::Message, data)
                .map_err(|err| peer_error("send failed", err))?;
        }
        Payload::File(data) => {
            let chunks = split_chunks(&data, DEFAULT_CHUNK_SIZE);
            info!(chunks = chunks.len(), bytes = data.len(), "sending chunked payload");
            for chunk in chunks {
                connection
                    .send(MessageType::BinaryChunk, chunk)
                    .map_err(|err| peer_error("send failed", err))?;
            }
        }
        Payload::None => {}
    }

    if args.disconnect {
        connection
            .send(MessageType::Disconnect, Bytes::new())
            .map_err(|err| peer_error("send failed", err))?;
    }

    // Stop and wait for the terminal event so queued frames drain
    // before the process exits.
    connection.stop();
    loop {
        match events.recv().await {
            Some(ConnectionEvent::Cancelled) | None => break,
            Some(ConnectionEvent::Failed(err)) => return Err(peer_error("send failed", err)),
            Some(_) => {}
        }
    }

    Ok(SUCCESS)
}

async fn wait_for_peer(events: &mut BrowserEvents, peer: &str) -> CliResult<ServiceRecord> {
    while let Some(event) = events.recv().await {
        match event {
            BrowserEvent::Results(results) => {
                if let Some(record) = results.into_iter().find(|r| r.name == peer) {
                    return Ok(record);
                }
            }
            BrowserEvent::Failed(err) => return Err(peer_error("browse failed", err)),
        }
    }
    Err(CliError::new(
        FAILURE,
        "browser stopped before the peer appeared",
    ))
}

fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Some(millis) = value.strip_suffix("ms") {
        return millis.trim().parse().ok().map(Duration::from_millis);
    }
    if let Some(secs) = value.strip_suffix('s') {
        return secs.trim().parse().ok().map(Duration::from_secs);
    }
    value.parse().ok().map(Duration::from_secs)
}
