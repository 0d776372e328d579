//! Connectivity probing.
//!
//! A single blocked endpoint must not make the gateway believe it is
//! offline, so a probe round races TCP connects to several lightweight
//! endpoints and succeeds on the first one that answers. Only after every
//! round fails is the gateway declared offline.

use futures::future::select_ok;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Endpoints tried by default: plain HTTP first, then TLS and DNS ports.
pub const DEFAULT_ENDPOINTS: &[&str] = &[
    "clients3.google.com:80",
    "www.gstatic.com:443",
    "1.1.1.1:443",
    "8.8.8.8:53",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    /// `host:port` pairs.
    pub endpoints: Vec<String>,
    /// Per-connect timeout.
    pub timeout: Duration,
    /// Rounds before declaring the gateway offline.
    pub rounds: u32,
    /// Pause between rounds.
    pub round_pause: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            endpoints: DEFAULT_ENDPOINTS.iter().map(ToString::to_string).collect(),
            timeout: Duration::from_secs(5),
            rounds: 3,
            round_pause: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
enum ProbeKind {
    Endpoints(ProbeConfig),
    /// Fixed answer, switchable at runtime; used by simulation and tests.
    Static(Arc<AtomicBool>),
}

/// Connectivity probe with the last observed state.
#[derive(Debug, Clone)]
pub struct ConnectivityProbe {
    kind: ProbeKind,
    last_known: Arc<AtomicBool>,
}

impl ConnectivityProbe {
    pub fn endpoints(config: ProbeConfig) -> Self {
        Self {
            kind: ProbeKind::Endpoints(config),
            last_known: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A probe that always answers `online` until [`set_online`](Self::set_online).
    pub fn fixed(online: bool) -> Self {
        Self {
            kind: ProbeKind::Static(Arc::new(AtomicBool::new(online))),
            last_known: Arc::new(AtomicBool::new(online)),
        }
    }

    /// Switch a fixed probe. No effect on an endpoint probe.
    pub fn set_online(&self, online: bool) {
        if let ProbeKind::Static(flag) = &self.kind {
            flag.store(online, Ordering::SeqCst);
        }
    }

    /// Result of the most recent [`check`](Self::check).
    pub fn last_known(&self) -> bool {
        self.last_known.load(Ordering::SeqCst)
    }

    /// Probe now and remember the answer.
    pub async fn check(&self) -> bool {
        let online = match &self.kind {
            ProbeKind::Static(flag) => flag.load(Ordering::SeqCst),
            ProbeKind::Endpoints(config) => probe_endpoints(config).await,
        };

        let previous = self.last_known.swap(online, Ordering::SeqCst);
        if previous != online {
            if online {
                info!("Connectivity restored");
            } else {
                warn!("Connectivity lost");
            }
        }
        online
    }
}

async fn probe_endpoints(config: &ProbeConfig) -> bool {
    if config.endpoints.is_empty() {
        return false;
    }

    for round in 0..config.rounds.max(1) {
        if round > 0 {
            tokio::time::sleep(config.round_pause).await;
        }

        let attempts = config.endpoints.iter().map(|endpoint| {
            let timeout = config.timeout;
            Box::pin(async move {
                match tokio::time::timeout(timeout, TcpStream::connect(endpoint.as_str())).await {
                    Ok(Ok(_stream)) => Ok(endpoint.as_str()),
                    Ok(Err(e)) => Err(format!("{endpoint}: {e}")),
                    Err(_) => Err(format!("{endpoint}: timeout after {}ms", timeout.as_millis())),
                }
            })
        });

        match select_ok(attempts).await {
            Ok((endpoint, _)) => {
                debug!(endpoint, round, "Connectivity probe succeeded");
                return true;
            }
            Err(last) => debug!(round, error = %last, "Connectivity probe round failed"),
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_fixed_probe() {
        let probe = ConnectivityProbe::fixed(false);
        assert!(!probe.check().await);

        probe.set_online(true);
        assert!(probe.check().await);
        assert!(probe.last_known());
    }

    #[tokio::test]
    async fn test_endpoint_probe_succeeds_if_any_endpoint_answers() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let live = listener.local_addr().unwrap().to_string();

        // Bind then drop to get a port nothing listens on.
        let dead = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().to_string()
        };

        let probe = ConnectivityProbe::endpoints(ProbeConfig {
            endpoints: vec![dead, live],
            timeout: Duration::from_millis(500),
            rounds: 1,
            round_pause: Duration::ZERO,
        });
        assert!(probe.check().await);
    }

    #[tokio::test]
    async fn test_endpoint_probe_fails_when_all_refuse() {
        let dead = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().to_string()
        };

        let probe = ConnectivityProbe::endpoints(ProbeConfig {
            endpoints: vec![dead],
            timeout: Duration::from_millis(200),
            rounds: 2,
            round_pause: Duration::from_millis(10),
        });
        assert!(!probe.check().await);
        assert!(!probe.last_known());
    }

    #[tokio::test]
    async fn test_no_endpoints_is_offline() {
        let probe = ConnectivityProbe::endpoints(ProbeConfig {
            endpoints: Vec::new(),
            ..ProbeConfig::default()
        });
        assert!(!probe.check().await);
    }
}
