//! Reconciliation of SCAN results into the resource repository.
//!
//! Each resource type is merged independently by its stable key: port MAC for
//! networks, qualified name for block exports. Matched resources get their
//! state refreshed, unmatched scanned entities become new resources, and
//! resources missing from the scan are marked lost. Nothing is deleted and
//! locked resources are never touched. NFS exports are not reconciled.

use testlib_proto::{Job, ScanInventory, ScannedExport, ScannedNetwork, ScannedPort};
use testlib_reconcile::{plan_merge, MergeStats};
use tracing::{debug, info, instrument, warn};

use crate::domain::Domain;
use crate::error::ControlError;
use crate::resources::{
    now_ms, Export, ExportParams, ExportProto, ExportState, ExportTransport, Health, Network,
    NetworkParams, NetworkState, NicDriver, ProtoParams, RepositoryError, Resource, ResourceKind,
    ResourceRepository, ResourceState,
};

/// Merges the inventory of a finished SCAN job into the domain.
#[instrument(skip_all, fields(job_id = %job.id))]
pub fn reconcile(domain: &mut Domain, job: &Job) -> Result<MergeStats, ControlError> {
    if !job.is_ok() {
        debug!(status = %job.status, "Scan did not succeed; nothing to reconcile");
        return Ok(MergeStats::default());
    }

    let Some(inventory) = ScanInventory::from_result(&job.result)? else {
        debug!("Scan carried no inventory");
        return Ok(MergeStats::default());
    };

    let stats = reconcile_inventory(&mut domain.resources, &job.environment_key, &inventory)?;
    if stats.is_noop() {
        debug!(%stats, "Scan reconciled without changes");
    } else {
        info!(%stats, "Scan reconciled");
    }
    Ok(stats)
}

/// Merges `inventory` into the resources of `environment_key`.
pub fn reconcile_inventory(
    repo: &mut ResourceRepository,
    environment_key: &str,
    inventory: &ScanInventory,
) -> Result<MergeStats, RepositoryError> {
    let mut stats = reconcile_networks(repo, environment_key, inventory)?;
    stats.absorb(reconcile_block_exports(repo, environment_key, inventory)?);
    Ok(stats)
}

fn reconcile_networks(
    repo: &mut ResourceRepository,
    environment_key: &str,
    inventory: &ScanInventory,
) -> Result<MergeStats, RepositoryError> {
    let known: Vec<Resource> = repo
        .iter()
        .filter(|r| r.environment_key == environment_key && r.as_network().is_some())
        .cloned()
        .collect();
    let ports: Vec<(&ScannedNetwork, &ScannedPort)> = inventory
        .ports()
        .filter(|(_, port)| !port.mac.trim().is_empty())
        .collect();

    let plan = plan_merge(
        &known,
        ports.iter(),
        |resource: &Resource| {
            resource
                .as_network()
                .map(|network| mac_key(&network.params.mac))
                .filter(|mac| !mac.is_empty())
        },
        |(_, port): &(&ScannedNetwork, &ScannedPort)| mac_key(&port.mac),
    );
    if plan.duplicates > 0 {
        warn!(duplicates = plan.duplicates, "Scan reported the same MAC more than once");
    }

    let mut stats = MergeStats::default();
    mark_lost(repo, &plan.lost, &mut stats)?;

    for (resource, (_, port)) in plan.matched {
        if resource.locked {
            stats.skipped_locked += 1;
            continue;
        }
        if repo.set_state(&resource.id, ResourceState::Network(network_state(port)))? {
            stats.updated += 1;
        } else {
            stats.unchanged += 1;
        }
    }

    for (device, port) in plan.unmatched {
        let name = if port.name.is_empty() {
            port.mac.trim().to_string()
        } else {
            port.name.clone()
        };
        let network = Network {
            params: NetworkParams {
                driver: NicDriver::from_name(&device.driver),
                pci_slot: device.pci_slot.clone(),
                numa_id: device.numa_id.clone(),
                full_name: device.full_name.clone(),
                mac: port.mac.trim().to_string(),
                max_link_speed_mbps: port.max_link_speed_mbps.clone(),
            },
            state: network_state(port),
        };
        let id = repo.make_id();
        repo.add(Resource::new(
            id,
            environment_key,
            name,
            ResourceKind::Network(network),
            now_ms(),
        ))?;
        stats.created += 1;
    }

    Ok(stats)
}

fn reconcile_block_exports(
    repo: &mut ResourceRepository,
    environment_key: &str,
    inventory: &ScanInventory,
) -> Result<MergeStats, RepositoryError> {
    let known: Vec<Resource> = repo
        .iter()
        .filter(|r| {
            r.environment_key == environment_key
                && r.as_export().is_some_and(|export| export.params.proto.is_block())
        })
        .cloned()
        .collect();
    let scanned: Vec<&ScannedExport> = inventory
        .block_exports()
        .filter(|export| !export.export_path.is_empty())
        .collect();

    let plan = plan_merge(
        &known,
        scanned.iter(),
        |resource: &Resource| {
            resource
                .as_export()
                .and_then(|export| export.params.qualified_name())
                .map(str::to_string)
        },
        |export: &&ScannedExport| export.export_path.clone(),
    );
    if plan.duplicates > 0 {
        warn!(duplicates = plan.duplicates, "Scan reported the same export more than once");
    }

    let mut stats = MergeStats::default();
    mark_lost(repo, &plan.lost, &mut stats)?;

    for (resource, scanned) in plan.matched {
        if resource.locked {
            stats.skipped_locked += 1;
            continue;
        }
        if repo.set_state(&resource.id, ResourceState::Export(export_state(scanned)))? {
            stats.updated += 1;
        } else {
            stats.unchanged += 1;
        }
    }

    for scanned in plan.unmatched {
        let Some(proto) = ExportProto::parse(&scanned.proto).filter(ExportProto::is_block) else {
            warn!(
                export_path = %scanned.export_path,
                proto = %scanned.proto,
                "Skipping scanned export with a non-block protocol"
            );
            continue;
        };
        let name = if scanned.name.is_empty() {
            scanned.export_path.clone()
        } else {
            scanned.name.clone()
        };
        let export = Export {
            params: ExportParams {
                proto,
                proto_params: ProtoParams {
                    transport: ExportTransport::Tcp,
                    qn: Some(scanned.export_path.clone()),
                    port: match proto {
                        ExportProto::Nvmeof => scanned.port.clone(),
                        _ => None,
                    },
                    ..Default::default()
                },
                relation_id: None,
            },
            state: export_state(scanned),
        };
        let id = repo.make_id();
        repo.add(Resource::new(
            id,
            environment_key,
            name,
            ResourceKind::Export(export),
            now_ms(),
        ))?;
        stats.created += 1;
    }

    Ok(stats)
}

fn mark_lost(
    repo: &mut ResourceRepository,
    lost: &[&Resource],
    stats: &mut MergeStats,
) -> Result<(), RepositoryError> {
    for resource in lost {
        if resource.locked {
            stats.skipped_locked += 1;
            continue;
        }
        if repo.mark_as_lost(&resource.id)? {
            stats.lost += 1;
        }
    }
    Ok(())
}

fn mac_key(mac: &str) -> String {
    mac.trim().to_ascii_lowercase()
}

fn non_empty(raw: &str) -> Option<String> {
    let raw = raw.trim();
    (!raw.is_empty()).then(|| raw.to_string())
}

fn network_state(port: &ScannedPort) -> NetworkState {
    NetworkState {
        health: Health::from_scanned(&port.health),
        addresses: port.addresses.clone(),
        power: non_empty(&port.power),
        status: non_empty(&port.status),
    }
}

fn export_state(scanned: &ScannedExport) -> ExportState {
    ExportState {
        health: Health::from_scanned(&scanned.health),
        clients: scanned.clients.clone(),
        export_path: Some(scanned.export_path.clone()),
    }
}
