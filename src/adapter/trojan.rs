//! Trojan (§4.A): the client leads with a 56-character hex SHA-224 of the
//! password, then a CRLF-delimited SOCKS5-style request. A password that
//! doesn't match falls back to transparently proxying the connection to a
//! fixed remote, byte for byte, so a prober scanning for Trojan listeners
//! sees ordinary traffic instead of a protocol error.

use std::collections::HashSet;

use sha2::{Digest, Sha224};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::{Accepted, BoxedStream, PrefixedStream};
use crate::error::{Error, Result};
use crate::model::{self, Endpoint};
use crate::vo::{EgressVo, IngressVo, TlsEgressOption};

const HASH_HEX_LEN: usize = 56;

pub struct TrojanIngress {
    password_hashes: HashSet<String>,
    fallback_remote: Endpoint,
}

impl TrojanIngress {
    pub fn new(vo: &IngressVo) -> Result<Self> {
        let opt = vo
            .trojan_option
            .as_ref()
            .ok_or_else(|| Error::SemanticError("trojan ingress requires trojanOption".into()))?;
        let password_hashes = vo
            .credentials
            .passwords()
            .into_iter()
            .map(hash_password)
            .collect();
        Ok(Self {
            password_hashes,
            fallback_remote: opt.remote.clone(),
        })
    }

    pub async fn accept(&self, mut stream: BoxedStream) -> Result<(BoxedStream, Accepted)> {
        let mut hash = vec![0u8; HASH_HEX_LEN];
        let n = read_prefix(&mut stream, &mut hash).await?;
        let received = String::from_utf8_lossy(&hash[..n]);

        if n < HASH_HEX_LEN || !self.password_hashes.contains(received.as_ref()) {
            let fallback: BoxedStream = Box::pin(PrefixedStream::new(stream, hash[..n].to_vec()));
            let mut accepted = Accepted::new(self.fallback_remote.clone());
            accepted.forced_egress = Some("direct".to_string());
            return Ok((fallback, accepted));
        }

        let mut crlf = [0u8; 2];
        stream.read_exact(&mut crlf).await?;
        if &crlf != b"\r\n" {
            return Err(Error::bad_proto("malformed trojan header"));
        }

        let _cmd = stream.read_u8().await?;
        let remote = model::parse_endpoint(&mut stream).await?;

        let mut crlf = [0u8; 2];
        stream.read_exact(&mut crlf).await?;
        if &crlf != b"\r\n" {
            return Err(Error::bad_proto("malformed trojan header"));
        }

        Ok((stream, Accepted::new(remote)))
    }
}

/// Reads up to `buf.len()` bytes, stopping early (and returning the
/// short count) on EOF instead of erroring — the fallback path needs to
/// know exactly how many header bytes the client actually sent.
async fn read_prefix(stream: &mut BoxedStream, buf: &mut [u8]) -> Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        let n = stream.read(&mut buf[total..]).await?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}

fn hash_password(password: &str) -> String {
    hex_str(&Sha224::digest(password.as_bytes()))
}

fn hex_str(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Client side of Trojan: writes the password hash and request header,
/// then hands back the raw TLS/TCP stream for the session to splice.
/// Trojan runs over TLS in the wild; `tls` defaults to an insecure
/// handshake with no verification if the VO leaves it unset, since a
/// Trojan deployment that skips TLS entirely is indistinguishable from a
/// plaintext PSK proxy and still needs to interoperate with a real server.
pub struct TrojanEgress {
    host: String,
    port: u16,
    password_hash: String,
    tls: TlsEgressOption,
}

impl TrojanEgress {
    pub fn new(vo: &EgressVo) -> Result<Self> {
        let host = vo
            .host
            .clone()
            .ok_or_else(|| Error::SemanticError("trojan egress requires host".into()))?;
        let port = vo
            .port
            .as_ref()
            .ok_or_else(|| Error::SemanticError("trojan egress requires port".into()))?
            .parse()
            .map_err(|_| Error::SemanticError("invalid trojan egress port".into()))?;
        let password = vo
            .password
            .clone()
            .ok_or_else(|| Error::SemanticError("trojan egress requires password".into()))?;
        let tls = vo.tls.clone().unwrap_or(TlsEgressOption {
            insecure: true,
            ca_file: None,
            server_name: None,
            sni: None,
        });
        Ok(Self {
            host,
            port,
            password_hash: hash_password(&password),
            tls,
        })
    }

    pub async fn connect(&self, remote: &Endpoint) -> Result<(BoxedStream, std::net::SocketAddr)> {
        let mut stream = crate::tls::connect(&self.host, self.port, Some(&self.tls)).await?;
        let bound = super::fake_bound_addr();

        let mut req = Vec::new();
        req.extend_from_slice(self.password_hash.as_bytes());
        req.extend_from_slice(b"\r\n");
        req.push(0x01); // CMD_CONNECT
        model::serialize_endpoint(remote, &mut req)?;
        req.extend_from_slice(b"\r\n");
        stream.write_all(&req).await?;

        Ok((stream, bound))
    }
}
