//! Replays desired state onto the live routing graph.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::engine::Engine;
use crate::runner::Invocation;
use crate::types::*;

/// Per-item tallies of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub devices_attached: usize,
    /// Both clients were already present in the daemon.
    pub devices_present: usize,
    pub devices_failed: usize,
    pub connections_restored: usize,
    pub connections_present: usize,
    pub connections_failed: usize,
}

impl Engine {
    /// Re-attach every loaded device, then re-issue every saved connection.
    ///
    /// Never fails: each row that cannot be replayed is logged and counted.
    /// Items already live are left alone, so repeated passes are no-ops.
    pub async fn reconcile(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let live_ports: HashSet<PortRef> = match self.list_ports().await {
            Ok(ports) => ports.into_iter().collect(),
            Err(e) => {
                tracing::warn!("could not list live ports before reconcile: {}", e);
                HashSet::new()
            }
        };

        match self.db.list_loaded() {
            Ok(loaded) => {
                for entry in loaded {
                    let missing = missing_directions(&live_ports, &entry.device_id);
                    if missing.is_empty() {
                        report.devices_present += 1;
                        continue;
                    }
                    match self.attach_live(&entry, &missing).await {
                        Ok(()) => {
                            tracing::info!(device = %entry.device_id, client = %entry.client, "device re-attached");
                            report.devices_attached += 1;
                        }
                        Err(e) => {
                            tracing::warn!(device = %entry.device_id, "re-attach failed: {}", e);
                            report.devices_failed += 1;
                        }
                    }
                }
            }
            Err(e) => tracing::warn!("could not read loaded-device ledger: {:#}", e),
        }

        let live_links: HashSet<(PortRef, PortRef)> = match self.list_patches().await {
            Ok(groups) => groups
                .into_iter()
                .flat_map(|g| {
                    let source = g.source;
                    g.destinations
                        .into_iter()
                        .map(move |d| (source.clone(), d))
                })
                .collect(),
            Err(e) => {
                tracing::warn!("could not list live connections before reconcile: {}", e);
                HashSet::new()
            }
        };

        match self.db.list_connections() {
            Ok(connections) => {
                for entry in connections {
                    let source = entry.source_port();
                    let destination = entry.destination_port();
                    if live_links.contains(&(source.clone(), destination.clone())) {
                        report.connections_present += 1;
                        continue;
                    }

                    let invocation = Invocation::new(
                        "jack_connect",
                        [source.port_name(), destination.port_name()],
                    );
                    match self.exec(invocation).await {
                        Ok(_) => report.connections_restored += 1,
                        Err(e) => {
                            tracing::warn!(
                                source = %source.port_name(),
                                destination = %destination.port_name(),
                                "reconnect failed: {}",
                                e
                            );
                            report.connections_failed += 1;
                        }
                    }
                }
            }
            Err(e) => tracing::warn!("could not read connection ledger: {:#}", e),
        }

        tracing::info!(
            attached = report.devices_attached,
            present = report.devices_present,
            failed = report.devices_failed,
            restored = report.connections_restored,
            connections_present = report.connections_present,
            connections_failed = report.connections_failed,
            "reconciliation finished"
        );
        report
    }
}

/// Directions whose client exposes no live port for this device.
fn missing_directions(ports: &HashSet<PortRef>, id: &DeviceId) -> Vec<Direction> {
    Direction::ALL
        .into_iter()
        .filter(|dir| !ports.iter().any(|p| &p.id == id && p.direction == *dir))
        .collect()
}
