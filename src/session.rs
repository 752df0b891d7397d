//! The session bridge (§5): accept -> resolve -> route -> connect ->
//! confirm -> bidirectional copy -> symmetric close. One task per
//! accepted connection; tokio's own cancellation (dropping the task)
//! closes both sides and turns in-flight reads/writes into the benign
//! "operation aborted" `io::Error` kind already mapped by
//! `Error::from<io::Error>`.
//!
//! The Router/EgressManager only need to be consulted once, briefly, to
//! pick an egress — the "control strand" discipline (§5) is kept by
//! locking [`SharedState`] just long enough to clone the decision out,
//! never across an `.await`.

use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, warn};
use tokio::io::AsyncWriteExt;

use crate::adapter::{BoxedStream, IngressAdapter};
use crate::error::{Error, Result};
use crate::model::{AdapterType, Endpoint};
use crate::server::SharedState;

pub struct Session {
    pub ingress_name: String,
    pub ingress_type: AdapterType,
    pub ingress_adapter: Arc<IngressAdapter>,
    pub state: Arc<SharedState>,
}

impl Session {
    pub async fn run(self, stream: BoxedStream) {
        if let Err(e) = self.run_inner(stream).await {
            if e.is_benign_eof() {
                debug!("session on ingress {} closed: {}", self.ingress_name, e);
            } else {
                warn!(
                    "session on ingress {} ({}): {}",
                    self.ingress_name, self.ingress_type, e
                );
            }
        }
    }

    async fn run_inner(&self, raw: BoxedStream) -> Result<()> {
        let (mut stream, accepted) = self.ingress_adapter.accept(raw).await?;
        let _release_guard = ReleaseOnDrop(
            accepted
                .balancer_index
                .map(|index| (Arc::clone(&self.ingress_adapter), index)),
        );

        let needs_resolving = self.state.router.lock().expect("router mutex poisoned").needs_resolving();
        let resolved = if needs_resolving {
            resolve(&accepted.remote).await.unwrap_or_default()
        } else {
            Vec::new()
        };
        let resolved_ips: Vec<std::net::IpAddr> = resolved.iter().map(|a| a.ip()).collect();

        let egress_name = match &accepted.forced_egress {
            Some(name) => name.clone(),
            None => self.state.router.lock().expect("router mutex poisoned").route(
                &accepted.remote,
                &self.ingress_name,
                self.ingress_type,
                &resolved_ips,
                &*self.state.geo,
            ),
        };

        let egress = self
            .state
            .egresses
            .lock()
            .expect("egress mutex poisoned")
            .adapter(&egress_name)
            .ok_or_else(|| Error::misc(format!("egress {egress_name} does not exist")))?;

        match egress.connect(&accepted.remote, &resolved).await {
            Ok((mut egress_stream, bound)) => {
                self.ingress_adapter.confirm(&mut stream, &bound).await?;
                if !accepted.prelude.is_empty() {
                    egress_stream.write_all(&accepted.prelude).await?;
                }
                bridge(&mut stream, &mut egress_stream).await
            }
            Err(e) => {
                self.ingress_adapter.disconnect(&mut stream, &e).await;
                Err(e)
            }
        }
    }
}

/// Copies bytes both ways until either side reaches EOF; the
/// protocol-specific failure reply was already sent by `disconnect` on
/// the error path, so teardown from here on is a plain socket close.
async fn bridge(a: &mut BoxedStream, b: &mut BoxedStream) -> Result<()> {
    tokio::io::copy_bidirectional(a, b).await?;
    Ok(())
}

async fn resolve(remote: &Endpoint) -> Result<Vec<SocketAddr>> {
    if let Some(ip) = crate::model::ip_addr_of(remote) {
        return Ok(vec![SocketAddr::new(ip, remote.port_u16())]);
    }
    let host_port = format!("{}:{}", remote.host, remote.port_u16());
    let addrs = tokio::net::lookup_host(host_port)
        .await
        .map_err(|e| Error::conn_failure(e.to_string()))?
        .collect();
    Ok(addrs)
}

/// Returns a TUNNEL balancer pick to its owner when the session ends,
/// whether that's from a clean close or an early `?`.
struct ReleaseOnDrop(Option<(Arc<IngressAdapter>, usize)>);

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        if let Some((adapter, index)) = self.0.take() {
            if let IngressAdapter::Tunnel(t) = &*adapter {
                t.release(index);
            }
        }
    }
}
