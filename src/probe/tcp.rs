//! TCP connect prober. Targets must carry an explicit port
//! (`host:port`); a completed handshake counts as reachable.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;

use super::{ProbeError, ProbeOutcome, Prober};
use crate::config::Target;

pub struct TcpProber {
    timeout: Duration,
}

impl TcpProber {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn check(&self, target: &Target) -> Result<(), ProbeError> {
        let address = target.address();
        if !address.contains(':') {
            return Err(ProbeError::Network(format!(
                "tcp probe target {address} is missing a port"
            )));
        }

        match tokio::time::timeout(self.timeout, TcpStream::connect(address)).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(ProbeError::Network(format!("connect failed: {e}"))),
            Err(_) => Err(ProbeError::Timeout(self.timeout)),
        }
    }
}

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, target: &Target) -> ProbeOutcome {
        match self.check(target).await {
            Ok(()) => ProbeOutcome::Reachable,
            Err(e) => {
                tracing::debug!("tcp probe {} failed: {}", target, e);
                ProbeOutcome::Unreachable
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_open_port_is_reachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let prober = TcpProber::new(Duration::from_secs(1));
        let outcome = prober.probe(&Target::new(addr.to_string())).await;
        assert_eq!(outcome, ProbeOutcome::Reachable);
    }

    #[tokio::test]
    async fn test_closed_port_is_unreachable() {
        // Bind then drop so the port is known-free.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let prober = TcpProber::new(Duration::from_secs(1));
        let outcome = prober.probe(&Target::new(addr.to_string())).await;
        assert_eq!(outcome, ProbeOutcome::Unreachable);
    }

    #[tokio::test]
    async fn test_missing_port_is_unreachable() {
        let prober = TcpProber::new(Duration::from_secs(1));
        let outcome = prober.probe(&Target::new("127.0.0.1")).await;
        assert_eq!(outcome, ProbeOutcome::Unreachable);
    }
}
