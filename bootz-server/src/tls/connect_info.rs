//! Per-connection metadata handed to gRPC handlers.
//!
//! The handshake is finished before a [`TlsConnection`] is built, so the peer
//! details are captured once and cloned into every request's extensions.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;
use tonic::transport::server::Connected;

/// What the server knows about the device on the other end.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsConnectInfo {
    pub remote_addr: Option<SocketAddr>,
    /// SNI the device sent. Most bootstrapping devices send none.
    pub server_name: Option<String>,
    /// Negotiated ALPN protocol, `h2` for gRPC clients.
    pub alpn: Option<Vec<u8>>,
}

impl TlsConnectInfo {
    pub fn new(remote_addr: Option<SocketAddr>, server_name: Option<String>) -> Self {
        Self {
            remote_addr,
            server_name,
            alpn: None,
        }
    }
}

/// An accepted device connection, served by tonic.
pub struct TlsConnection {
    stream: TlsStream<TcpStream>,
    info: TlsConnectInfo,
}

impl TlsConnection {
    pub fn new(stream: TlsStream<TcpStream>, remote_addr: Option<SocketAddr>) -> Self {
        let (_, session) = stream.get_ref();
        let info = TlsConnectInfo {
            remote_addr,
            server_name: session.server_name().map(str::to_string),
            alpn: session.alpn_protocol().map(<[u8]>::to_vec),
        };
        Self { stream, info }
    }

    pub fn info(&self) -> &TlsConnectInfo {
        &self.info
    }

    fn stream(self: Pin<&mut Self>) -> Pin<&mut TlsStream<TcpStream>> {
        Pin::new(&mut self.get_mut().stream)
    }
}

impl Connected for TlsConnection {
    type ConnectInfo = TlsConnectInfo;

    fn connect_info(&self) -> Self::ConnectInfo {
        self.info.clone()
    }
}

impl AsyncRead for TlsConnection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.stream().poll_read(cx, buf)
    }
}

impl AsyncWrite for TlsConnection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.stream().poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.stream().poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.stream().poll_shutdown(cx)
    }
}
