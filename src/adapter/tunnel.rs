//! TUNNEL ingress (§4.A): no handshake at all — every accepted connection
//! is routed to one of a fixed set of destinations, chosen by the
//! configured [`Balancer`].

use std::sync::Mutex;

use super::{Accepted, BoxedStream};
use crate::balancer::Balancer;
use crate::error::{Error, Result};
use crate::vo::IngressVo;

pub struct TunnelIngress {
    destinations: Vec<crate::model::Endpoint>,
    balancer: Mutex<Balancer>,
}

impl TunnelIngress {
    pub fn new(vo: &IngressVo) -> Result<Self> {
        let opt = vo
            .tunnel_option
            .as_ref()
            .ok_or_else(|| Error::SemanticError("tunnel ingress requires tunnelOption".into()))?;
        if opt.destinations.is_empty() {
            return Err(Error::SemanticError("tunnel ingress needs at least one destination".into()));
        }
        Ok(Self {
            destinations: opt.destinations.clone(),
            balancer: Mutex::new(Balancer::new(opt.balance, opt.destinations.len())),
        })
    }

    pub async fn accept(&self, stream: BoxedStream) -> Result<(BoxedStream, Accepted)> {
        let index = self
            .balancer
            .lock()
            .expect("balancer mutex is never poisoned")
            .select();
        let remote = self.destinations[index].clone();
        let mut accepted = Accepted::new(remote);
        accepted.balancer_index = Some(index);
        Ok((stream, accepted))
    }

    /// `least_conn` needs to know when a tunneled session ends; `Session`
    /// calls this with the index handed back in `Accepted::balancer_index`.
    pub fn release(&self, index: usize) {
        self.balancer
            .lock()
            .expect("balancer mutex is never poisoned")
            .release(index);
    }
}
