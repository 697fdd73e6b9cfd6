//! Probe module for reachability checks.
//!
//! A probe never fails from the caller's point of view: every transport
//! problem is reported as a `down` outcome.

mod ping;

pub use ping::*;

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::db::CheckOutcome;

/// Probe error types. Internal to probers; folded into `down` outcomes.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("command failed: {0}")]
    Command(String),
}

/// Performs one reachability check against one address.
///
/// Implementations hold no per-call state and may be invoked concurrently.
pub trait Prober: Send + Sync + 'static {
    fn probe(&self, address: &str, timeout: Duration) -> impl Future<Output = CheckOutcome> + Send;
}

/// ICMP echo prober, falling back to the system `ping` command when raw or
/// datagram ICMP sockets are unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct PingProber;

impl Prober for PingProber {
    async fn probe(&self, address: &str, timeout: Duration) -> CheckOutcome {
        match run_ping_probe(address, timeout).await {
            Ok(rtt) => CheckOutcome::up(rtt.as_secs_f64() * 1000.0),
            Err(e) => {
                tracing::debug!("Ping to {} failed: {}", address, e);
                CheckOutcome::down()
            }
        }
    }
}
