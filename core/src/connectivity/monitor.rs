//! Online/offline tracking from platform events and request feedback.

use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::util::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityTransition {
    WentOffline,
    WentOnline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivitySource {
    Platform,
    RequestFailure,
    RequestSuccess,
}

pub struct ConnectionMonitor {
    state: Mutex<MonitorState>,
}

struct MonitorState {
    online: bool,
    tx: mpsc::UnboundedSender<ConnectivityTransition>,
    rx: Option<mpsc::UnboundedReceiver<ConnectivityTransition>>,
}

impl ConnectionMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            state: Mutex::new(MonitorState {
                online: initially_online,
                tx,
                rx: Some(rx),
            }),
        }
    }

    pub fn is_online(&self) -> bool {
        lock(&self.state).online
    }

    /// Transitions go to exactly one subscriber; later calls get `None`.
    pub fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<ConnectivityTransition>> {
        lock(&self.state).rx.take()
    }

    pub fn platform_event(&self, online: bool) -> Option<ConnectivityTransition> {
        self.observe(online, ConnectivitySource::Platform)
    }

    /// A request failed because the network is unreachable.
    pub fn report_request_failure(&self) -> Option<ConnectivityTransition> {
        self.observe(false, ConnectivitySource::RequestFailure)
    }

    pub fn report_request_success(&self) -> Option<ConnectivityTransition> {
        self.observe(true, ConnectivitySource::RequestSuccess)
    }

    /// Emits only on edges. The state lock is held across the send so
    /// transitions reach the subscriber in the order they happened.
    pub fn observe(&self, online: bool, source: ConnectivitySource) -> Option<ConnectivityTransition> {
        let mut state = lock(&self.state);
        if state.online == online {
            return None;
        }
        state.online = online;
        let transition = if online {
            ConnectivityTransition::WentOnline
        } else {
            ConnectivityTransition::WentOffline
        };
        tracing::info!(
            target: "tabsync.connectivity",
            transition = ?transition,
            source = ?source,
            "connectivity changed"
        );
        // No receiver left just means nobody is listening for replay triggers.
        let _ = state.tx.send(transition);
        Some(transition)
    }
}
