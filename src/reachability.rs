//! Network reachability monitor.
//!
//! A cheap, non-authoritative "are we online" signal used to fail fast before
//! opening a completion stream. A stream can still fail after this reports
//! connected; that failure is handled by the session engine on its own.
//!
//! The monitor must be initialized before use. Until then it reports
//! disconnected so callers err on the side of not attempting network calls.

use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

static SHARED_MONITOR: Lazy<Arc<NetworkMonitor>> = Lazy::new(|| Arc::new(NetworkMonitor::new()));

/// Where and how often the background probe checks connectivity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    /// `host:port` the probe opens a TCP connection to.
    pub addr: String,
    pub interval: Duration,
    pub timeout: Duration,
}

pub struct NetworkMonitor {
    initialized: AtomicBool,
    warned_uninitialized: AtomicBool,
    connected: watch::Sender<bool>,
    probe: Mutex<Option<JoinHandle<()>>>,
}

impl NetworkMonitor {
    pub fn new() -> Self {
        let (connected, _) = watch::channel(false);
        Self {
            initialized: AtomicBool::new(false),
            warned_uninitialized: AtomicBool::new(false),
            connected,
            probe: Mutex::new(None),
        }
    }

    /// Process-wide monitor.
    pub fn shared() -> Arc<NetworkMonitor> {
        SHARED_MONITOR.clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Current connectivity. Always `false` before initialization.
    pub fn is_connected(&self) -> bool {
        if !self.is_initialized() {
            if !self.warned_uninitialized.swap(true, Ordering::Relaxed) {
                tracing::warn!("network monitor queried before initialization; reporting offline");
            }
            return false;
        }
        *self.connected.borrow()
    }

    /// Receives every connectivity change after initialization.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    /// Start the background probe. Repeated calls are ignored.
    ///
    /// Must be called from within a tokio runtime.
    pub fn initialize(self: &Arc<Self>, probe: ProbeConfig) {
        let mut slot = self.probe.lock().unwrap_or_else(|e| e.into_inner());
        if self.initialized.swap(true, Ordering::AcqRel) {
            return;
        }

        let monitor = Arc::clone(self);
        *slot = Some(tokio::spawn(async move {
            tracing::info!(addr = %probe.addr, "network monitor started");
            loop {
                let reachable = matches!(
                    tokio::time::timeout(probe.timeout, TcpStream::connect(probe.addr.as_str())).await,
                    Ok(Ok(_))
                );
                monitor.set_connected(reachable);
                tokio::time::sleep(probe.interval).await;
            }
        }));
    }

    /// Initialize without a probe. Connectivity is then driven entirely by
    /// [`NetworkMonitor::set_connected`], e.g. from a platform path monitor.
    pub fn initialize_manual(&self, connected: bool) {
        if self.initialized.swap(true, Ordering::AcqRel) {
            return;
        }
        self.set_connected(connected);
    }

    /// Record a connectivity update. Ignored before initialization.
    pub fn set_connected(&self, connected: bool) {
        if !self.is_initialized() {
            return;
        }
        let changed = self.connected.send_if_modified(|current| {
            if *current == connected {
                false
            } else {
                *current = connected;
                true
            }
        });
        if changed {
            tracing::info!(connected, "network reachability changed");
        }
    }

    /// Stop monitoring and return to the uninitialized (offline) state.
    pub fn stop(&self) {
        let mut slot = self.probe.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = slot.take() {
            handle.abort();
        }
        self.initialized.store(false, Ordering::Release);
        self.connected.send_replace(false);
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new()
    }
}
