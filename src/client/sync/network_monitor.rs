//! # Network Monitor
//!
//! Holds the platform signals the coordinator reacts to: connectivity and
//! document visibility. The embedding application reports changes; the sync
//! loop watches them.

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    Online,
    Offline,
}

impl From<bool> for NetworkStatus {
    fn from(online: bool) -> Self {
        if online {
            Self::Online
        } else {
            Self::Offline
        }
    }
}

#[derive(Debug)]
pub struct NetworkMonitor {
    status: watch::Sender<NetworkStatus>,
    visible: watch::Sender<bool>,
}

impl NetworkMonitor {
    pub fn new(online: bool) -> Self {
        Self {
            status: watch::channel(NetworkStatus::from(online)).0,
            visible: watch::channel(true).0,
        }
    }

    pub fn get_status(&self) -> NetworkStatus {
        *self.status.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.get_status() == NetworkStatus::Online
    }

    pub fn is_visible(&self) -> bool {
        *self.visible.borrow()
    }

    /// Report a connectivity change; returns whether the status changed
    pub fn set_online(&self, online: bool) -> bool {
        let status = NetworkStatus::from(online);
        self.status.send_if_modified(|current| {
            let changed = *current != status;
            *current = status;
            changed
        })
    }

    /// Report a visibility change; returns whether it changed
    pub fn set_visible(&self, visible: bool) -> bool {
        self.visible.send_if_modified(|current| {
            let changed = *current != visible;
            *current = visible;
            changed
        })
    }

    pub fn watch_status(&self) -> watch::Receiver<NetworkStatus> {
        self.status.subscribe()
    }

    pub fn watch_visibility(&self) -> watch::Receiver<bool> {
        self.visible.subscribe()
    }
}
