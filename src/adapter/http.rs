//! HTTP CONNECT ingress/egress, built on the line/header reader in
//! [`crate::http1`].

use tokio::io::{AsyncWriteExt, BufReader};

use super::{Accepted, BoxedStream, PrefixedStream};
use crate::error::{Error, Result};
use crate::http1;
use crate::model::Endpoint;
use crate::vo::{Credentials, EgressVo, IngressVo, TlsEgressOption};

const MAX_LINE: usize = 8192;

pub struct HttpIngress {
    credentials: Credentials,
}

impl HttpIngress {
    pub fn new(vo: &IngressVo) -> Self {
        Self {
            credentials: vo.credentials.clone(),
        }
    }

    pub async fn accept(&self, mut stream: BoxedStream) -> Result<(BoxedStream, Accepted)> {
        let (remote, proxy_authorization, leftover) = {
            let mut buf_reader = BufReader::new(&mut stream);
            let mut reader = http1::Reader::new(&mut buf_reader, Some(MAX_LINE));

            let request = reader.request_line(MAX_LINE).await.map_err(to_bad_proto)?;
            if !request.method().eq_ignore_ascii_case(b"CONNECT") {
                return Err(Error::bad_proto("only CONNECT is supported"));
            }

            let authority = std::str::from_utf8(request.path())
                .map_err(|_| Error::bad_proto("invalid request-target"))?;
            let (host, port) = split_authority(authority)?;
            let remote = Endpoint::new(host, port)?;

            let mut proxy_authorization: Option<String> = None;
            loop {
                match reader.header(MAX_LINE).await.map_err(to_bad_proto)? {
                    http1::HeaderRead::EndOfHeader => break,
                    http1::HeaderRead::Header(hdr) => {
                        if hdr.is(b"Proxy-Authorization") {
                            proxy_authorization =
                                Some(String::from_utf8_lossy(hdr.value()).into_owned());
                        }
                    }
                }
            }

            // A client is allowed to pipeline bytes right after the
            // CONNECT headers, before our 200 reply. `buf_reader` may
            // have already read some of those into its own buffer; grab
            // them before it's dropped so they aren't lost.
            let leftover = buf_reader.buffer().to_vec();
            (remote, proxy_authorization, leftover)
        };

        if !self.credentials.is_empty() {
            check_basic_auth(&self.credentials, proxy_authorization.as_deref())?;
        }

        let stream: BoxedStream = if leftover.is_empty() {
            stream
        } else {
            Box::pin(PrefixedStream::new(stream, leftover))
        };

        Ok((stream, Accepted::new(remote)))
    }

    pub async fn confirm(&self, stream: &mut BoxedStream) -> Result<()> {
        stream
            .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
            .await?;
        Ok(())
    }

    pub async fn disconnect(&self, stream: &mut BoxedStream, err: &Error) {
        let status = if matches!(err, Error::ConnFailure(_)) {
            "502 Bad Gateway"
        } else {
            "500 Internal Server Error"
        };
        let _ = stream
            .write_all(format!("HTTP/1.1 {status}\r\n\r\n").as_bytes())
            .await;
    }
}

fn split_authority(authority: &str) -> Result<(&str, &str)> {
    authority
        .rsplit_once(':')
        .ok_or_else(|| Error::bad_proto("CONNECT target missing port"))
}

fn check_basic_auth(creds: &Credentials, header: Option<&str>) -> Result<()> {
    use base64::Engine;

    let header = header.ok_or_else(|| Error::Unauthenticated("missing Proxy-Authorization".into()))?;
    let encoded = header
        .strip_prefix("Basic ")
        .ok_or_else(|| Error::Unauthenticated("expected Basic auth".into()))?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| Error::Unauthenticated("invalid base64".into()))?;
    let decoded = String::from_utf8(decoded).map_err(|_| Error::Unauthenticated("invalid utf8".into()))?;
    let (user, pass) = decoded
        .split_once(':')
        .ok_or_else(|| Error::Unauthenticated("missing colon".into()))?;

    if creds.check(user, pass) {
        Ok(())
    } else {
        Err(Error::Unauthenticated("bad http proxy credentials".into()))
    }
}

fn to_bad_proto(e: http1::Error) -> Error {
    Error::bad_proto(e.to_string())
}

/// Client side of HTTP CONNECT: dials the upstream, sends `CONNECT
/// host:port`, and checks for a 2xx status.
pub struct HttpEgress {
    host: String,
    port: u16,
    tls: Option<TlsEgressOption>,
}

impl HttpEgress {
    pub fn new(vo: &EgressVo) -> Result<Self> {
        let host = vo
            .host
            .clone()
            .ok_or_else(|| Error::SemanticError("http egress requires host".into()))?;
        let port = vo
            .port
            .as_ref()
            .ok_or_else(|| Error::SemanticError("http egress requires port".into()))?
            .parse()
            .map_err(|_| Error::SemanticError("invalid http egress port".into()))?;
        Ok(Self { host, port, tls: vo.tls.clone() })
    }

    pub async fn connect(&self, remote: &Endpoint) -> Result<(BoxedStream, std::net::SocketAddr)> {
        let mut stream = crate::tls::connect(&self.host, self.port, self.tls.as_ref()).await?;
        let bound = super::fake_bound_addr();

        let request = format!(
            "CONNECT {remote} HTTP/1.1\r\nHost: {remote}\r\n\r\n",
            remote = remote
        );
        stream.write_all(request.as_bytes()).await?;

        let mut buf_reader = BufReader::new(&mut stream);
        let mut reader = http1::Reader::new(&mut buf_reader, Some(MAX_LINE));
        let status = reader.status_line(MAX_LINE).await.map_err(to_bad_proto)?;
        let code = std::str::from_utf8(status.status())
            .ok()
            .and_then(|s| s.split_whitespace().next())
            .and_then(|s| s.parse::<u16>().ok())
            .ok_or_else(|| Error::bad_proto("invalid status line"))?;
        loop {
            match reader.header(MAX_LINE).await.map_err(to_bad_proto)? {
                http1::HeaderRead::EndOfHeader => break,
                http1::HeaderRead::Header(_) => {}
            }
        }

        if !(200..300).contains(&code) {
            return Err(Error::conn_failure(format!("upstream CONNECT rejected: {code}")));
        }

        Ok((stream, bound))
    }
}
