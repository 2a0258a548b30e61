//! Periodic port scan that publishes port-list changes and reports unplugs.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Sender};
use log::{debug, warn};

use crate::manager::ChannelManager;
use crate::transport::PortInfo;

/// Background thread polling the transport's port list.
///
/// The first scan always publishes `PortsUpdated`; later scans publish only
/// when the set of port names changes. Every port that disappears is handed
/// to [`ChannelManager::handle_unplug`].
pub struct PortWatcher {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PortWatcher {
    pub fn spawn(manager: Arc<ChannelManager>, interval: Duration) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("serhub-port-watch".into())
            .spawn(move || {
                let ticker = tick(interval);
                let mut known: Option<Vec<PortInfo>> = None;
                scan(&manager, &mut known);
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => scan(&manager, &mut known),
                    }
                }
                debug!("port watcher stopped");
            })?;
        Ok(Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Spawns with the manager's configured scan interval.
    pub fn start(manager: Arc<ChannelManager>) -> std::io::Result<Self> {
        let interval = manager.options().port_scan_interval();
        Self::spawn(manager, interval)
    }

    pub fn stop(&mut self) {
        // Dropping the sender wakes the select.
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("port watcher panicked");
            }
        }
    }
}

impl Drop for PortWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn scan(manager: &ChannelManager, known: &mut Option<Vec<PortInfo>>) {
    let current = match manager.list_ports() {
        Ok(ports) => ports,
        Err(e) => {
            warn!("port scan failed: {e}");
            return;
        }
    };

    let changed = match known.as_ref() {
        Some(prev) => names(prev) != names(&current),
        None => true,
    };
    if !changed {
        return;
    }

    if let Some(prev) = known.as_ref() {
        for port in vanished(prev, &current) {
            manager.handle_unplug(&port);
        }
    }
    manager.publish_ports(current.clone());
    *known = Some(current);
}

fn names(ports: &[PortInfo]) -> BTreeSet<&str> {
    ports.iter().map(|p| p.port_name.as_str()).collect()
}

/// Port names present in `prev` but missing from `current`.
fn vanished(prev: &[PortInfo], current: &[PortInfo]) -> Vec<String> {
    let now = names(current);
    prev.iter()
        .map(|p| p.port_name.as_str())
        .filter(|name| !now.contains(name))
        .map(str::to_string)
        .collect()
}
