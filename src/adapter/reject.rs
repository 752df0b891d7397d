//! REJECT egress (§4.C): never connects — waits out a delay, then always
//! fails with `ConnFailure`, so slow/fixed rejection can mimic or
//! deliberately differ from a real dead upstream.

use std::net::SocketAddr;
use std::time::Duration;

use super::BoxedStream;
use crate::error::{Error, Result};
use crate::model::DelayMode;
use crate::vo::EgressVo;

const RANDOM_DELAY_MAX_SECS: u64 = 300;

pub struct RejectEgress {
    mode: DelayMode,
    delay_secs: u64,
}

impl RejectEgress {
    pub fn new(vo: &EgressVo) -> Self {
        Self {
            mode: vo.mode.unwrap_or(DelayMode::Fixed),
            delay_secs: vo.delay.unwrap_or(0) as u64,
        }
    }

    pub async fn connect(&self) -> Result<(BoxedStream, SocketAddr)> {
        let delay = match self.mode {
            DelayMode::Fixed => self.delay_secs,
            DelayMode::Random => fastrand::u64(0..=RANDOM_DELAY_MAX_SECS),
        };
        if delay > 0 {
            tokio::time::sleep(Duration::from_secs(delay)).await;
        }
        Err(Error::conn_failure("rejected by policy"))
    }
}
