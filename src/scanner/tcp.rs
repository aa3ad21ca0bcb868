use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::scanner::results::{ProbeError, ProbeResult, Target};

/// Checks a single (host, port) pair. Implementations must be safe to call
/// concurrently for distinct targets.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, target: Target, timeout: Duration) -> ProbeResult;
}

/// Full TCP handshake probe, needs no privileges.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnectProber;

#[async_trait]
impl Prober for TcpConnectProber {
    async fn probe(&self, target: Target, timeout: Duration) -> ProbeResult {
        let result = connect_scan(target.socket_addr(), timeout).await;
        tracing::debug!(%target, status = %result.status, "probe finished");
        result
    }
}

pub async fn connect_scan(addr: SocketAddr, limit: Duration) -> ProbeResult {
    classify_attempt(TcpStream::connect(addr), limit).await
}

/// Races `attempt` against `limit` and maps the outcome onto a port state.
/// Refused means closed; running out of time means filtered; any other
/// failure is kept as an error.
pub async fn classify_attempt<F, S>(attempt: F, limit: Duration) -> ProbeResult
where
    F: Future<Output = io::Result<S>>,
{
    let started = Instant::now();

    match timeout(limit, attempt).await {
        Ok(Ok(_stream)) => ProbeResult::open(started.elapsed()),
        Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => {
            ProbeResult::closed(started.elapsed())
        }
        Ok(Err(e)) => ProbeResult::error(ProbeError::Connection(e.to_string())),
        Err(_) => ProbeResult::filtered(limit),
    }
}
