//! Connectivity oracle.
//!
//! A [`NetworkDetector`] reports the raw network state. [`Connectivity`]
//! turns that into a single reachability answer and fails open: if the
//! detector itself breaks, the answer is "reachable" so a detector bug never
//! locks the user out. [`ConnectivityMonitor`] polls a detector in the
//! background and publishes changes through a `watch` channel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Errors raised by a detector while querying the network state.
#[derive(Debug, Error)]
pub enum DetectorError {
    /// The probe target is not usable.
    #[error("invalid probe address: {0}")]
    InvalidAddress(String),

    /// The detector failed internally.
    #[error("network detector failed: {0}")]
    Internal(String),
}

/// Raw network state as reported by a detector.
///
/// Either field may be unknown. Only `is_connected` decides reachability;
/// `is_internet_reachable` is informational because several platforms leave
/// it unset even when a connection is up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkState {
    /// Whether a network link is up.
    pub is_connected: Option<bool>,
    /// Whether the wider internet answered.
    pub is_internet_reachable: Option<bool>,
}

impl NetworkState {
    /// A state with a working connection.
    #[must_use]
    pub const fn online() -> Self {
        Self {
            is_connected: Some(true),
            is_internet_reachable: Some(true),
        }
    }

    /// A state with no connection.
    #[must_use]
    pub const fn offline() -> Self {
        Self {
            is_connected: Some(false),
            is_internet_reachable: Some(false),
        }
    }

    /// Whether this state counts as reachable.
    #[must_use]
    pub fn is_reachable(&self) -> bool {
        self.is_connected == Some(true)
    }
}

/// Something that can report the current network state.
#[async_trait]
pub trait NetworkDetector: Send + Sync + std::fmt::Debug {
    /// Query the network state once.
    ///
    /// # Errors
    ///
    /// Returns an error if the detector cannot produce a state.
    async fn fetch(&self) -> Result<NetworkState, DetectorError>;
}

/// Answers "can the remote be reached right now".
#[async_trait]
pub trait ConnectivityOracle: Send + Sync {
    /// Query reachability once. Never retries.
    async fn is_reachable(&self) -> bool;
}

/// Detector that opens a TCP connection to a fixed address.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    address: String,
    timeout: Duration,
}

impl TcpProbe {
    /// Create a probe for `host:port`.
    ///
    /// # Errors
    ///
    /// Returns an error if `address` does not have the `host:port` form.
    pub fn new(address: impl Into<String>, timeout: Duration) -> Result<Self, DetectorError> {
        let address = address.into();
        match address.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Ok(Self { address, timeout })
            }
            _ => Err(DetectorError::InvalidAddress(address)),
        }
    }

    /// The probed address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl NetworkDetector for TcpProbe {
    async fn fetch(&self) -> Result<NetworkState, DetectorError> {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(_stream)) => Ok(NetworkState::online()),
            Ok(Err(e)) => {
                trace!(address = %self.address, error = %e, "Probe connection failed");
                Ok(NetworkState::offline())
            }
            Err(_) => {
                trace!(address = %self.address, "Probe timed out");
                Ok(NetworkState::offline())
            }
        }
    }
}

/// Oracle backed by a [`NetworkDetector`].
#[derive(Debug, Clone)]
pub struct Connectivity {
    detector: Arc<dyn NetworkDetector>,
}

impl Connectivity {
    /// Wrap a detector.
    #[must_use]
    pub fn new(detector: Arc<dyn NetworkDetector>) -> Self {
        Self { detector }
    }
}

#[async_trait]
impl ConnectivityOracle for Connectivity {
    async fn is_reachable(&self) -> bool {
        match self.detector.fetch().await {
            Ok(state) => {
                let reachable = state.is_reachable();
                debug!(?state, reachable, "Connectivity check");
                reachable
            }
            Err(e) => {
                warn!(error = %e, "Connectivity check failed, assuming reachable");
                true
            }
        }
    }
}

/// Oracle with a fixed answer, e.g. for a forced offline mode.
#[derive(Debug, Clone, Copy)]
pub struct StaticConnectivity(pub bool);

#[async_trait]
impl ConnectivityOracle for StaticConnectivity {
    async fn is_reachable(&self) -> bool {
        self.0
    }
}

/// Background poller publishing reachability changes.
///
/// The published value is `None` until the first poll completes. The polling
/// task stops when the monitor is dropped.
#[derive(Debug)]
pub struct ConnectivityMonitor {
    rx: watch::Receiver<Option<bool>>,
    task: JoinHandle<()>,
}

impl ConnectivityMonitor {
    /// Start polling `detector` every `interval`.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(detector: Arc<dyn NetworkDetector>, interval: Duration) -> Self {
        let (tx, rx) = watch::channel(None);
        let oracle = Connectivity::new(detector);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let reachable = oracle.is_reachable().await;
                let changed = tx.send_if_modified(|current| {
                    if *current == Some(reachable) {
                        false
                    } else {
                        *current = Some(reachable);
                        true
                    }
                });
                if changed {
                    debug!(reachable, "Connectivity changed");
                }
                if tx.is_closed() {
                    break;
                }
            }
        });

        Self { rx, task }
    }

    /// Subscribe to reachability changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<bool>> {
        self.rx.clone()
    }

    /// The last observed reachability, if any poll has completed.
    #[must_use]
    pub fn current(&self) -> Option<bool> {
        *self.rx.borrow()
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}
