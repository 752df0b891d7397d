//! Protocol adapters (§4.A, §4.C): ingress accepts a client and extracts a
//! requested destination; egress dials (or synthesizes) a connection to a
//! destination. Both are closed, tagged enums rather than trait objects —
//! the adapter list is fixed by [`crate::model::AdapterType`], so matching
//! exhaustively over a concrete enum costs nothing and catches a missed
//! variant at compile time.

pub mod direct;
pub mod http;
pub mod reject;
pub mod shadowsocks;
pub mod socks5;
pub mod trojan;
pub mod tunnel;

use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::error::Result;
use crate::model::{AdapterType, Endpoint};
use crate::vo::{EgressVo, IngressVo};

/// Anything that looks enough like a socket to proxy bytes over: plain
/// TCP, or TCP wrapped in `tokio_openssl::SslStream` for TLS-bearing
/// adapters. Boxing lets `Session` hold either without a generic
/// parameter on every adapter.
pub trait IoStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> IoStream for T {}

pub type BoxedStream = std::pin::Pin<Box<dyn IoStream>>;

/// What an ingress adapter learned from the client during its handshake.
pub struct Accepted {
    /// Destination the client asked to reach.
    pub remote: Endpoint,
    /// Name of the egress the session should use, when the adapter (not
    /// the router) pins the destination — TUNNEL's balancer pick.
    pub forced_egress: Option<String>,
    /// Already-decrypted plaintext that followed the address in the same
    /// frame (Shadowsocks AEAD's first frame, Trojan's request) and must
    /// be forwarded to the egress ahead of any further reads from the
    /// client.
    pub prelude: Vec<u8>,
    /// TUNNEL's balancer pick, to be returned via
    /// [`tunnel::TunnelIngress::release`] once the session ends.
    pub balancer_index: Option<usize>,
}

impl Accepted {
    pub(crate) fn new(remote: Endpoint) -> Self {
        Self {
            remote,
            forced_egress: None,
            prelude: Vec::new(),
            balancer_index: None,
        }
    }
}

pub enum IngressAdapter {
    Socks5(socks5::Socks5Ingress),
    Http(http::HttpIngress),
    Ss(shadowsocks::ShadowsocksIngress),
    Tunnel(tunnel::TunnelIngress),
    Trojan(trojan::TrojanIngress),
}

impl IngressAdapter {
    pub fn new(vo: &IngressVo) -> Result<Self> {
        Ok(match vo.r#type {
            AdapterType::Socks5 => Self::Socks5(socks5::Socks5Ingress::new(vo)),
            AdapterType::Http => Self::Http(http::HttpIngress::new(vo)),
            AdapterType::Ss => Self::Ss(shadowsocks::ShadowsocksIngress::new(vo)?),
            AdapterType::Tunnel => Self::Tunnel(tunnel::TunnelIngress::new(vo)?),
            AdapterType::Trojan => Self::Trojan(trojan::TrojanIngress::new(vo)?),
            other => {
                return Err(crate::error::Error::SemanticError(format!(
                    "{other} is not a valid ingress type"
                )))
            }
        })
    }

    /// Reads the client's handshake off `stream`, returning the (possibly
    /// rewrapped, e.g. cipher-decorated) stream and the requested
    /// destination. The adapter has not yet written any reply — that
    /// happens in [`Self::confirm`]/[`Self::disconnect`] once the egress
    /// side is known to have succeeded or failed.
    pub async fn accept(&self, stream: BoxedStream) -> Result<(BoxedStream, Accepted)> {
        match self {
            Self::Socks5(a) => a.accept(stream).await,
            Self::Http(a) => a.accept(stream).await,
            Self::Ss(a) => a.accept(stream).await,
            Self::Tunnel(a) => a.accept(stream).await,
            Self::Trojan(a) => a.accept(stream).await,
        }
    }

    /// Writes whatever success reply the protocol requires, now that the
    /// egress side has connected to `bound`.
    pub async fn confirm(&self, stream: &mut BoxedStream, bound: &SocketAddr) -> Result<()> {
        match self {
            Self::Socks5(a) => a.confirm(stream, bound).await,
            Self::Http(a) => a.confirm(stream).await,
            Self::Ss(_) | Self::Tunnel(_) | Self::Trojan(_) => Ok(()),
        }
    }

    /// Writes a failure reply, when the protocol has one.
    pub async fn disconnect(&self, stream: &mut BoxedStream, err: &crate::error::Error) {
        match self {
            Self::Socks5(a) => a.disconnect(stream, err).await,
            Self::Http(a) => a.disconnect(stream, err).await,
            Self::Ss(_) | Self::Tunnel(_) | Self::Trojan(_) => {}
        }
    }
}

pub enum EgressAdapter {
    Direct(direct::DirectEgress),
    Reject(reject::RejectEgress),
    Socks5(socks5::Socks5Egress),
    Http(http::HttpEgress),
    Ss(shadowsocks::ShadowsocksEgress),
    Trojan(trojan::TrojanEgress),
}

impl EgressAdapter {
    pub fn new(vo: &EgressVo) -> Result<Self> {
        Ok(match vo.r#type {
            AdapterType::Direct => Self::Direct(direct::DirectEgress),
            AdapterType::Reject => Self::Reject(reject::RejectEgress::new(vo)),
            AdapterType::Socks5 => Self::Socks5(socks5::Socks5Egress::new(vo)?),
            AdapterType::Http => Self::Http(http::HttpEgress::new(vo)?),
            AdapterType::Ss => Self::Ss(shadowsocks::ShadowsocksEgress::new(vo)?),
            AdapterType::Trojan => Self::Trojan(trojan::TrojanEgress::new(vo)?),
            other => {
                return Err(crate::error::Error::SemanticError(format!(
                    "{other} is not a valid egress type"
                )))
            }
        })
    }

    /// Connects to `remote` (resolved via `resolved`, already DNS'd by the
    /// caller when the egress needs a concrete address) and returns the
    /// live stream plus the local/peer address pair the ingress reply
    /// needs. `geo`/ingress metadata is unused by every current egress but
    /// threaded through for symmetry with the router.
    pub async fn connect(&self, remote: &Endpoint, resolved: &[SocketAddr]) -> Result<(BoxedStream, SocketAddr)> {
        match self {
            Self::Direct(a) => a.connect(remote, resolved).await,
            Self::Reject(a) => a.connect().await,
            Self::Socks5(a) => a.connect(remote).await,
            Self::Http(a) => a.connect(remote).await,
            Self::Ss(a) => a.connect(remote).await,
            Self::Trojan(a) => a.connect(remote).await,
        }
    }
}

pub(crate) fn fake_bound_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 0))
}

/// Replays `prefix` to readers before falling through to `inner` — used
/// to put back bytes an adapter peeked at but didn't consume (the trojan
/// fallback's header probe, an HTTP CONNECT client's pipelined bytes).
pub(crate) struct PrefixedStream {
    inner: BoxedStream,
    prefix: Vec<u8>,
    pos: usize,
}

impl PrefixedStream {
    pub(crate) fn new(inner: BoxedStream, prefix: Vec<u8>) -> Self {
        Self { inner, prefix, pos: 0 }
    }
}

impl AsyncRead for PrefixedStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if this.pos < this.prefix.len() {
            let n = (this.prefix.len() - this.pos).min(buf.remaining());
            buf.put_slice(&this.prefix[this.pos..this.pos + n]);
            this.pos += n;
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for PrefixedStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }
    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

impl IoStream for PrefixedStream {}
