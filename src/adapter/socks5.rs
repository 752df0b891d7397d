//! SOCKS5 (RFC 1928/1929): ingress runs the server side of the
//! greeting/method-select/request/reply state machine; egress runs the
//! client side against an upstream SOCKS5 proxy.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::{Accepted, BoxedStream};
use crate::error::{Error, Result};
use crate::model::{self, Endpoint};
use crate::vo::{Credentials, IngressVo, TlsEgressOption};

const VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_USER_PASS: u8 = 0x02;
const METHOD_NO_ACCEPTABLE: u8 = 0xFF;
const CMD_CONNECT: u8 = 0x01;

const REP_SUCCEEDED: u8 = 0x00;
const REP_GENERAL_FAILURE: u8 = 0x01;
const REP_CONN_REFUSED: u8 = 0x05;
const REP_CMD_NOT_SUPPORTED: u8 = 0x07;

pub struct Socks5Ingress {
    credentials: Credentials,
}

impl Socks5Ingress {
    pub fn new(vo: &IngressVo) -> Self {
        Self {
            credentials: vo.credentials.clone(),
        }
    }

    pub async fn accept(&self, mut stream: BoxedStream) -> Result<(BoxedStream, Accepted)> {
        let ver = stream.read_u8().await?;
        if ver != VERSION {
            return Err(Error::bad_proto("unsupported SOCKS version"));
        }

        let n_methods = stream.read_u8().await? as usize;
        let mut methods = vec![0u8; n_methods];
        stream.read_exact(&mut methods).await?;

        let auth_required = !self.credentials.is_empty();
        let wanted = if auth_required { METHOD_USER_PASS } else { METHOD_NO_AUTH };

        if !methods.contains(&wanted) {
            stream.write_all(&[VERSION, METHOD_NO_ACCEPTABLE]).await?;
            return Err(Error::BadAuthMethod("no acceptable auth method offered".into()));
        }
        stream.write_all(&[VERSION, wanted]).await?;

        if auth_required {
            self.authenticate(&mut stream).await?;
        }

        let ver = stream.read_u8().await?;
        if ver != VERSION {
            return Err(Error::bad_proto("unsupported SOCKS version in request"));
        }
        let cmd = stream.read_u8().await?;
        if cmd != CMD_CONNECT {
            let _ = write_reply(&mut stream, REP_CMD_NOT_SUPPORTED, &super::fake_bound_addr()).await;
            return Err(Error::bad_proto("only CONNECT is supported"));
        }
        let _reserved = stream.read_u8().await?;

        let remote = model::parse_endpoint(&mut stream).await?;

        Ok((stream, Accepted::new(remote)))
    }

    async fn authenticate(&self, stream: &mut BoxedStream) -> Result<()> {
        let ver = stream.read_u8().await?;
        if ver != 0x01 {
            return Err(Error::bad_proto("unsupported auth subnegotiation version"));
        }
        let ulen = stream.read_u8().await? as usize;
        let mut user = vec![0u8; ulen];
        stream.read_exact(&mut user).await?;
        let plen = stream.read_u8().await? as usize;
        let mut pass = vec![0u8; plen];
        stream.read_exact(&mut pass).await?;

        let user = String::from_utf8_lossy(&user);
        let pass = String::from_utf8_lossy(&pass);
        let ok = self.credentials.check(&user, &pass);

        stream.write_all(&[0x01, if ok { 0x00 } else { 0x01 }]).await?;
        if !ok {
            return Err(Error::Unauthenticated("bad socks5 credentials".into()));
        }
        Ok(())
    }

    pub async fn confirm(&self, stream: &mut BoxedStream, bound: &std::net::SocketAddr) -> Result<()> {
        write_reply(stream, REP_SUCCEEDED, bound).await
    }

    pub async fn disconnect(&self, stream: &mut BoxedStream, err: &Error) {
        let rep = match err {
            Error::ConnFailure(_) => REP_CONN_REFUSED,
            _ => REP_GENERAL_FAILURE,
        };
        let _ = write_reply(stream, rep, &super::fake_bound_addr()).await;
    }
}

async fn write_reply(stream: &mut BoxedStream, rep: u8, bound: &std::net::SocketAddr) -> Result<()> {
    let mut buf = vec![VERSION, rep, 0x00];
    let ep = Endpoint::new(bound.ip().to_string(), bound.port().to_string())?;
    model::serialize_endpoint(&ep, &mut buf)?;
    stream.write_all(&buf).await?;
    Ok(())
}

/// Client side of SOCKS5, used when the *egress* is itself an upstream
/// SOCKS5 proxy (`EgressVo { type: socks5, .. }`).
pub struct Socks5Egress {
    host: String,
    port: u16,
    credential: Option<(String, String)>,
    tls: Option<TlsEgressOption>,
}

impl Socks5Egress {
    pub fn new(vo: &crate::vo::EgressVo) -> Result<Self> {
        let host = vo
            .host
            .clone()
            .ok_or_else(|| Error::SemanticError("socks5 egress requires host".into()))?;
        let port = vo
            .port
            .as_ref()
            .ok_or_else(|| Error::SemanticError("socks5 egress requires port".into()))?
            .parse()
            .map_err(|_| Error::SemanticError("invalid socks5 egress port".into()))?;
        Ok(Self {
            host,
            port,
            credential: vo.credential.clone(),
            tls: vo.tls.clone(),
        })
    }

    pub async fn connect(&self, remote: &Endpoint) -> Result<(BoxedStream, std::net::SocketAddr)> {
        let mut stream = crate::tls::connect(&self.host, self.port, self.tls.as_ref()).await?;
        let bound = super::fake_bound_addr();

        let methods: &[u8] = if self.credential.is_some() {
            &[METHOD_NO_AUTH, METHOD_USER_PASS]
        } else {
            &[METHOD_NO_AUTH]
        };
        stream.write_all(&[VERSION, methods.len() as u8]).await?;
        stream.write_all(methods).await?;

        let mut reply = [0u8; 2];
        stream.read_exact(&mut reply).await?;
        if reply[0] != VERSION {
            return Err(Error::bad_proto("upstream spoke an unexpected socks version"));
        }

        match reply[1] {
            METHOD_NO_AUTH => {}
            METHOD_USER_PASS => {
                let (user, pass) = self
                    .credential
                    .as_ref()
                    .ok_or_else(|| Error::SemanticError("upstream demanded auth but none configured".into()))?;
                let mut buf = vec![0x01, user.len() as u8];
                buf.extend_from_slice(user.as_bytes());
                buf.push(pass.len() as u8);
                buf.extend_from_slice(pass.as_bytes());
                stream.write_all(&buf).await?;
                let mut auth_reply = [0u8; 2];
                stream.read_exact(&mut auth_reply).await?;
                if auth_reply[1] != 0x00 {
                    return Err(Error::Unauthenticated("upstream rejected credentials".into()));
                }
            }
            _ => return Err(Error::BadAuthMethod("upstream offered no acceptable method".into())),
        }

        let mut req = vec![VERSION, CMD_CONNECT, 0x00];
        model::serialize_endpoint(remote, &mut req)?;
        stream.write_all(&req).await?;

        let mut head = [0u8; 4];
        stream.read_exact(&mut head).await?;
        if head[0] != VERSION {
            return Err(Error::bad_proto("bad socks5 reply version"));
        }
        if head[1] != REP_SUCCEEDED {
            return Err(Error::conn_failure(format!("upstream refused CONNECT: rep={}", head[1])));
        }
        let _bound_ep = model::parse_endpoint(&mut stream).await?;

        Ok((stream, bound))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socks5_constants_match_rfc1928() {
        assert_eq!(VERSION, 0x05);
        assert_eq!(CMD_CONNECT, 0x01);
        assert_eq!(REP_SUCCEEDED, 0x00);
    }
}
