//! TCP stream transport.
//!
//! Keepalive is enabled on connecting sockets so a silently dead peer
//! eventually surfaces as a stream error. Liveness is a transport
//! concern; the layers above only ever see it as a failed stream.

use std::net::SocketAddr;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpSocket, TcpStream};

use crate::error::{Result, TransportError};

/// A connected peer stream — reliable, ordered, bidirectional.
#[derive(Debug)]
pub struct PeerStream {
    inner: TcpStream,
}

impl PeerStream {
    pub(crate) fn new(inner: TcpStream) -> Self {
        Self { inner }
    }

    /// Address of the remote peer.
    pub fn peer_addr(&self) -> Result<SocketAddr> {
        self.inner.peer_addr().map_err(Into::into)
    }

    /// Local address of this end of the stream.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.inner.local_addr().map_err(Into::into)
    }

    /// Split into independently owned read and write halves.
    pub fn into_split(self) -> (OwnedReadHalf, OwnedWriteHalf) {
        self.inner.into_split()
    }
}

/// Connect to a peer endpoint.
pub async fn connect(addr: SocketAddr) -> Result<PeerStream> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4(),
        SocketAddr::V6(_) => TcpSocket::new_v6(),
    }
    .map_err(|source| TransportError::Connect { addr, source })?;

    socket
        .set_keepalive(true)
        .map_err(|source| TransportError::Connect { addr, source })?;

    let stream = socket
        .connect(addr)
        .await
        .map_err(|source| TransportError::Connect { addr, source })?;

    Ok(PeerStream::new(stream))
}

/// Accepts inbound peer streams.
#[derive(Debug)]
pub struct StreamListener {
    inner: TcpListener,
}

impl StreamListener {
    /// Bind to a local address. Port 0 selects an ephemeral port;
    /// [`StreamListener::local_addr`] reports the one chosen.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let inner = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        Ok(Self { inner })
    }

    /// Accept the next inbound stream.
    pub async fn accept(&self) -> Result<(PeerStream, SocketAddr)> {
        let (stream, addr) = self.inner.accept().await.map_err(TransportError::Accept)?;
        Ok((PeerStream::new(stream), addr))
    }

    /// The bound local address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.inner.local_addr().map_err(Into::into)
    }
}
