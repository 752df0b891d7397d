//! TLS handshake boundaries (§3 Non-goals: "only handshake boundaries are
//! referenced" — certificate provisioning, trust stores, and cipher suite
//! policy are the caller's problem). Used by ingress listeners whose VO
//! carries `tls` and by Trojan/any egress whose VO carries `tls`.

use std::pin::Pin;

use openssl::ssl::{self, SslContext, SslFiletype, SslMethod, SslVerifyMode};
use tokio::net::TcpStream;
use tokio_openssl::SslStream;

use crate::adapter::BoxedStream;
use crate::error::{Error, Result};
use crate::vo::{TlsEgressOption, TlsIngressOption};

fn to_misc<E: std::fmt::Display>(e: E) -> Error {
    Error::misc(e.to_string())
}

pub fn build_server_context(tls: &TlsIngressOption) -> Result<SslContext> {
    let mut builder = ssl::SslContextBuilder::new(SslMethod::tls_server()).map_err(to_misc)?;
    builder
        .set_private_key_file(&tls.key_file, SslFiletype::PEM)
        .map_err(to_misc)?;
    builder
        .set_certificate_chain_file(&tls.cert_file)
        .map_err(to_misc)?;
    Ok(builder.build())
}

pub async fn accept(ctx: &SslContext, tcp: TcpStream) -> Result<SslStream<TcpStream>> {
    let ssl = ssl::Ssl::new(ctx).map_err(to_misc)?;
    let mut stream = SslStream::new(ssl, tcp).map_err(to_misc)?;
    Pin::new(&mut stream).accept().await.map_err(to_misc)?;
    Ok(stream)
}

/// Dials a plain TCP connection to `host`:`port`, then, if `tls` is set,
/// performs a client handshake over it. `insecure` skips verification;
/// `serverName`/`sni` (synonymous in the VO) set the SNI/hostname check.
pub async fn connect(host: &str, port: u16, tls: Option<&TlsEgressOption>) -> Result<BoxedStream> {
    let tcp = TcpStream::connect((host, port)).await.map_err(Error::from)?;
    let Some(tls) = tls else {
        return Ok(Box::pin(tcp));
    };

    let mut builder = ssl::SslContextBuilder::new(SslMethod::tls_client()).map_err(to_misc)?;
    if tls.insecure {
        builder.set_verify(SslVerifyMode::NONE);
    } else {
        builder.set_verify(SslVerifyMode::PEER);
        if let Some(ca_file) = &tls.ca_file {
            builder.set_ca_file(ca_file).map_err(to_misc)?;
        }
    }
    let ctx = builder.build();

    let server_name = tls.server_name.as_deref().or(tls.sni.as_deref()).unwrap_or(host);
    let mut ssl = ssl::Ssl::new(&ctx).map_err(to_misc)?;
    ssl.set_hostname(server_name).map_err(to_misc)?;
    let mut stream = SslStream::new(ssl, tcp).map_err(to_misc)?;
    Pin::new(&mut stream).connect().await.map_err(to_misc)?;
    Ok(Box::pin(stream))
}
