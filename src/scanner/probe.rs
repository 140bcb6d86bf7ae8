use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Timeout tiers used by the sweep layers.
pub const ULTRA_TIMEOUT: Duration = Duration::from_millis(120);
pub const QUICK_TIMEOUT: Duration = Duration::from_millis(200);
pub const NEARBY_TIMEOUT: Duration = Duration::from_millis(500);
pub const EXTENDED_TIMEOUT: Duration = Duration::from_millis(1500);

/// Guard margin added on top of the caller's budget so a stalled connect can
/// never overshoot it.
const SAFETY_SLACK: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Open,
    Closed,
    Error,
}

impl ProbeOutcome {
    pub fn is_open(self) -> bool {
        self == ProbeOutcome::Open
    }
}

/// Single TCP connect against `ip:port`. Open means a fully established
/// handshake; refusals, timeouts and connect errors all read as closed.
/// A malformed address is the only thing reported as an error.
pub async fn probe_tcp(ip: &str, port: u16, budget: Duration) -> ProbeOutcome {
    let addr: SocketAddr = match format!("{}:{}", ip, port).parse() {
        Ok(addr) => addr,
        Err(_) => return ProbeOutcome::Error,
    };

    match timeout(budget + SAFETY_SLACK, TcpStream::connect(&addr)).await {
        // Dropping the stream tears the socket down before we return.
        Ok(Ok(_stream)) => ProbeOutcome::Open,
        Ok(Err(_)) => ProbeOutcome::Closed,
        Err(_) => ProbeOutcome::Closed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn malformed_address_is_an_error() {
        let outcome = probe_tcp("not-an-ip", 22, Duration::from_millis(100)).await;
        assert_eq!(outcome, ProbeOutcome::Error);
    }

    #[tokio::test]
    async fn unroutable_host_reads_closed() {
        // TEST-NET-1 is guaranteed unroutable; the budget expires first.
        let outcome = probe_tcp("192.0.2.1", 22, Duration::from_millis(100)).await;
        assert_eq!(outcome, ProbeOutcome::Closed);
    }

    #[tokio::test]
    async fn refused_port_reads_closed() {
        let outcome = probe_tcp("127.0.0.1", 1, Duration::from_millis(200)).await;
        assert_eq!(outcome, ProbeOutcome::Closed);
    }
}
