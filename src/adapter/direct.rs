//! DIRECT egress (§4.C): dial whichever of the caller's already-resolved
//! addresses accepts a connection first.

use std::net::SocketAddr;

use tokio::net::TcpStream;

use super::BoxedStream;
use crate::error::{Error, Result};
use crate::model::Endpoint;

pub struct DirectEgress;

impl DirectEgress {
    pub async fn connect(&self, remote: &Endpoint, resolved: &[SocketAddr]) -> Result<(BoxedStream, SocketAddr)> {
        let addrs: Vec<SocketAddr> = if resolved.is_empty() {
            tokio::net::lookup_host((remote.host.as_str(), remote.port_u16()))
                .await
                .map_err(|e| Error::conn_failure(e.to_string()))?
                .collect()
        } else {
            resolved.to_vec()
        };

        if addrs.is_empty() {
            return Err(Error::conn_failure(format!("could not resolve {remote}")));
        }

        let mut last_err = None;
        for addr in &addrs {
            match TcpStream::connect(addr).await {
                Ok(tcp) => {
                    return Ok((Box::pin(tcp), super::fake_bound_addr()));
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(Error::conn_failure(
            last_err.map(|e| e.to_string()).unwrap_or_else(|| "no addresses".into()),
        ))
    }
}
