//! Core value types shared by adapters, the router, and the registries:
//! [`Endpoint`], [`AdapterType`], [`CryptoMethod`], and the SOCKS5-style
//! address wire format (§4.A).

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum HostType {
    IPv4,
    IPv6,
    DomainName,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub r#type: HostType,
    pub host: String,
    pub port: String,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Result<Self> {
        let host = host.into();
        let port = port.into();
        validate_port(&port)?;
        let r#type = detect_host_type(&host);
        Ok(Self { r#type, host, port })
    }

    /// Binds (`Ingress::binds`) must not be domains.
    pub fn is_numeric(&self) -> bool {
        !matches!(self.r#type, HostType::DomainName)
    }

    pub fn port_u16(&self) -> u16 {
        self.port.parse().expect("port validated at construction")
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.r#type {
            HostType::IPv6 => write!(f, "[{}]:{}", self.host, self.port),
            _ => write!(f, "{}:{}", self.host, self.port),
        }
    }
}

fn validate_port(port: &str) -> Result<()> {
    match port.parse::<u32>() {
        Ok(p) if p >= 1 && p <= 65535 => Ok(()),
        _ => Err(Error::bad_proto(format!("invalid port: {port}"))),
    }
}

/// `detectHostType`: IPv4 first, then IPv6, else DomainName. Malformed
/// numeric-looking strings fall through to DomainName rather than failing.
pub fn detect_host_type(host: &str) -> HostType {
    if host.parse::<Ipv4Addr>().is_ok() {
        HostType::IPv4
    } else if host.parse::<Ipv6Addr>().is_ok() {
        HostType::IPv6
    } else {
        HostType::DomainName
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterType {
    Direct,
    Reject,
    Socks5,
    Http,
    Ss,
    Tunnel,
    Trojan,
}

impl AdapterType {
    pub fn is_ingress_only(&self) -> bool {
        matches!(self, Self::Tunnel | Self::Trojan)
    }
    pub fn is_egress_only(&self) -> bool {
        matches!(self, Self::Direct | Self::Reject)
    }
}

impl fmt::Display for AdapterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = serde_json::to_value(self).unwrap();
        write!(f, "{}", s.as_str().unwrap())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayMode {
    Random,
    Fixed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceType {
    Random,
    RoundRobin,
    LeastConn,
}

/// Retained from the original source's enumerations for parity; only
/// [`HashAlgorithm::Sha224`] is exercised by this implementation (Trojan's
/// password header).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CryptoMethod {
    RC4Md5,
    BfCfb,
    Aes128Ctr,
    Aes192Ctr,
    Aes256Ctr,
    Aes128Cfb,
    Aes192Cfb,
    Aes256Cfb,
    Camellia128Cfb,
    Camellia192Cfb,
    Camellia256Cfb,
    Chacha20,
    Salsa20,
    Chacha20Ietf,
    Aes128Gcm,
    Aes192Gcm,
    Aes256Gcm,
    Chacha20IetfPoly1305,
    Xchacha20IetfPoly1305,
}

impl CryptoMethod {
    pub fn is_aead(&self) -> bool {
        matches!(
            self,
            Self::Aes128Gcm
                | Self::Aes192Gcm
                | Self::Aes256Gcm
                | Self::Chacha20IetfPoly1305
                | Self::Xchacha20IetfPoly1305
        )
    }

    pub fn key_size(&self) -> usize {
        match self {
            Self::RC4Md5 | Self::BfCfb => 16,
            Self::Aes128Ctr | Self::Aes128Cfb | Self::Camellia128Cfb | Self::Aes128Gcm => 16,
            Self::Aes192Ctr | Self::Aes192Cfb | Self::Camellia192Cfb | Self::Aes192Gcm => 24,
            Self::Aes256Ctr | Self::Aes256Cfb | Self::Camellia256Cfb | Self::Aes256Gcm => 32,
            Self::Chacha20 | Self::Salsa20 | Self::Chacha20Ietf => 32,
            Self::Chacha20IetfPoly1305 | Self::Xchacha20IetfPoly1305 => 32,
        }
    }

    /// IV size for stream ciphers; meaningless for AEAD (see [`Self::salt_size`]).
    pub fn iv_size(&self) -> usize {
        match self {
            Self::RC4Md5 => 16,
            Self::BfCfb => 8,
            Self::Aes128Ctr
            | Self::Aes192Ctr
            | Self::Aes256Ctr
            | Self::Aes128Cfb
            | Self::Aes192Cfb
            | Self::Aes256Cfb
            | Self::Camellia128Cfb
            | Self::Camellia192Cfb
            | Self::Camellia256Cfb => 16,
            Self::Chacha20 | Self::Salsa20 => 8,
            Self::Chacha20Ietf => 12,
            _ => 0,
        }
    }

    /// Salt size for AEAD ciphers (equal to key size, except XChaCha20).
    pub fn salt_size(&self) -> usize {
        match self {
            Self::Aes128Gcm => 16,
            Self::Aes192Gcm => 24,
            Self::Aes256Gcm => 32,
            Self::Chacha20IetfPoly1305 => 32,
            Self::Xchacha20IetfPoly1305 => 32,
            _ => 0,
        }
    }

    pub fn nonce_size(&self) -> usize {
        match self {
            Self::Xchacha20IetfPoly1305 => 24,
            m if m.is_aead() => 12,
            _ => 0,
        }
    }

    pub fn tag_size(&self) -> usize {
        if self.is_aead() { 16 } else { 0 }
    }
}

pub const MAX_FRAME_SIZE: usize = 16383;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// `serializeEndpoint`: SOCKS5 address form. Returns the number of bytes
/// appended to `buf`.
pub fn serialize_endpoint(ep: &Endpoint, buf: &mut Vec<u8>) -> Result<usize> {
    let start = buf.len();
    match ep.r#type {
        HostType::IPv4 => {
            let ip: Ipv4Addr = ep
                .host
                .parse()
                .map_err(|_| Error::bad_proto("invalid ipv4 host"))?;
            buf.push(ATYP_IPV4);
            buf.extend_from_slice(&ip.octets());
        }
        HostType::IPv6 => {
            let ip: Ipv6Addr = ep
                .host
                .parse()
                .map_err(|_| Error::bad_proto("invalid ipv6 host"))?;
            buf.push(ATYP_IPV6);
            buf.extend_from_slice(&ip.octets());
        }
        HostType::DomainName => {
            if ep.host.len() > 255 {
                return Err(Error::bad_proto("domain name too long"));
            }
            buf.push(ATYP_DOMAIN);
            buf.push(ep.host.len() as u8);
            buf.extend_from_slice(ep.host.as_bytes());
        }
    }
    buf.extend_from_slice(&ep.port_u16().to_be_bytes());
    Ok(buf.len() - start)
}

/// `parseEndpoint`: the dual of [`serialize_endpoint`], reading directly
/// off a live async stream (SOCKS5 ingress/egress requests, and the
/// Shadowsocks stream cipher's decrypting reader).
pub async fn parse_endpoint<R>(stream: &mut R) -> Result<Endpoint>
where
    R: tokio::io::AsyncRead + Unpin,
{
    use tokio::io::AsyncReadExt;

    let atyp = stream.read_u8().await?;

    let (host, r#type) = match atyp {
        ATYP_IPV4 => {
            let mut b = [0u8; 4];
            stream.read_exact(&mut b).await?;
            (Ipv4Addr::from(b).to_string(), HostType::IPv4)
        }
        ATYP_IPV6 => {
            let mut b = [0u8; 16];
            stream.read_exact(&mut b).await?;
            (Ipv6Addr::from(b).to_string(), HostType::IPv6)
        }
        ATYP_DOMAIN => {
            let len = stream.read_u8().await? as usize;
            let mut b = vec![0u8; len];
            stream.read_exact(&mut b).await?;
            let s = String::from_utf8(b).map_err(|_| Error::bad_proto("invalid domain"))?;
            (s, HostType::DomainName)
        }
        _ => return Err(Error::bad_proto("unknown address type")),
    };

    let port = stream.read_u16().await?;

    Ok(Endpoint {
        r#type,
        host,
        port: port.to_string(),
    })
}

/// The same decode, driven off an in-memory buffer instead of a stream —
/// used once a frame has already been decrypted in full (Trojan's header,
/// Shadowsocks AEAD's first logical frame). Returns the endpoint and the
/// number of bytes consumed.
pub fn parse_endpoint_from_slice(buf: &[u8]) -> Result<(Endpoint, usize)> {
    let short = || Error::bad_proto("short read");

    let atyp = *buf.first().ok_or_else(short)?;
    let mut pos = 1;

    let (host, r#type) = match atyp {
        ATYP_IPV4 => {
            let b = buf.get(pos..pos + 4).ok_or_else(short)?;
            pos += 4;
            (Ipv4Addr::new(b[0], b[1], b[2], b[3]).to_string(), HostType::IPv4)
        }
        ATYP_IPV6 => {
            let b = buf.get(pos..pos + 16).ok_or_else(short)?;
            let mut octets = [0u8; 16];
            octets.copy_from_slice(b);
            pos += 16;
            (Ipv6Addr::from(octets).to_string(), HostType::IPv6)
        }
        ATYP_DOMAIN => {
            let len = *buf.get(pos).ok_or_else(short)? as usize;
            pos += 1;
            let b = buf.get(pos..pos + len).ok_or_else(short)?;
            pos += len;
            let s = String::from_utf8(b.to_vec()).map_err(|_| Error::bad_proto("invalid domain"))?;
            (s, HostType::DomainName)
        }
        _ => return Err(Error::bad_proto("unknown address type")),
    };

    let port_bytes = buf.get(pos..pos + 2).ok_or_else(short)?;
    let port = u16::from_be_bytes([port_bytes[0], port_bytes[1]]);
    pos += 2;

    Ok((
        Endpoint {
            r#type,
            host,
            port: port.to_string(),
        },
        pos,
    ))
}

pub fn ip_addr_of(ep: &Endpoint) -> Option<IpAddr> {
    ep.host.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn parse_endpoint_round_trips_every_host_type() {
        for ep in [
            Endpoint::new("127.0.0.1", "80").unwrap(),
            Endpoint::new("::1", "443").unwrap(),
            Endpoint::new("example.com", "8080").unwrap(),
        ] {
            let mut buf = Vec::new();
            serialize_endpoint(&ep, &mut buf).unwrap();
            let mut cursor = Cursor::new(buf);
            let parsed = parse_endpoint(&mut cursor).await.unwrap();
            assert_eq!(parsed, ep);
        }
    }

    #[tokio::test]
    async fn parse_endpoint_rejects_unknown_address_type() {
        let mut cursor = Cursor::new(vec![0x7f, 0, 0]);
        let err = parse_endpoint(&mut cursor).await.unwrap_err();
        assert!(matches!(err, Error::BadProto(_)));
    }

    #[test]
    fn serialize_endpoint_rejects_overlong_domain() {
        let ep = Endpoint::new("a".repeat(256), "80").unwrap();
        let mut buf = Vec::new();
        assert!(matches!(serialize_endpoint(&ep, &mut buf), Err(Error::BadProto(_))));
    }
}
