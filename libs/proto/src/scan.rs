//! Inventory reported by SCAN jobs.

use serde::{Deserialize, Serialize};

use crate::{JobResult, ProtoError};

/// Everything an agent observed during a scan.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScanInventory {
    #[serde(default)]
    pub nvmeof_exports: Vec<ScannedExport>,
    #[serde(default)]
    pub scst_exports: Vec<ScannedExport>,
    #[serde(default)]
    pub nfs_exports: Vec<ScannedExport>,
    #[serde(default)]
    pub net_interfaces: Vec<ScannedNetwork>,
}

impl ScanInventory {
    /// Decodes the inventory carried by a SCAN result, if any.
    pub fn from_result(result: &JobResult) -> Result<Option<Self>, ProtoError> {
        match &result.resources {
            None => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
        }
    }

    /// Block-protocol exports (SCST and NVMe-oF), the ones subject to
    /// reconciliation.
    pub fn block_exports(&self) -> impl Iterator<Item = &ScannedExport> {
        self.scst_exports.iter().chain(self.nvmeof_exports.iter())
    }

    /// Every scanned network port together with the device it belongs to.
    pub fn ports(&self) -> impl Iterator<Item = (&ScannedNetwork, &ScannedPort)> {
        self.net_interfaces
            .iter()
            .flat_map(|device| device.ports.iter().map(move |port| (device, port)))
    }
}

/// An export as seen on the host.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannedExport {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub health: String,
    #[serde(default)]
    pub proto: String,
    #[serde(default)]
    pub export_path: String,
    #[serde(default)]
    pub clients: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// A network device with its ports.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannedNetwork {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub driver: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub pci_slot: String,
    #[serde(default)]
    pub numa_id: String,
    #[serde(default)]
    pub ports: Vec<ScannedPort>,
}

/// One network port; its MAC is the reconciliation key.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannedPort {
    #[serde(default)]
    pub name: String,
    pub mac: String,
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default)]
    pub max_link_speed_mbps: String,
    #[serde(default)]
    pub power: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub health: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_inventory_from_result() {
        let result = JobResult {
            environment_key: "lab".into(),
            resources: Some(json!({
                "scst_exports": [{ "name": "disk1", "proto": "iscsi", "exportPath": "iqn.a", "health": "OK" }],
                "nvmeof_exports": [{ "name": "disk2", "proto": "nvmeof", "exportPath": "nqn.b", "port": "4420" }],
                "net_interfaces": [{
                    "driver": "MLX5_CORE",
                    "fullName": "ConnectX-6",
                    "pciSlot": "0000:3b:00.0",
                    "numaId": "0",
                    "ports": [
                        { "name": "ens1f0", "mac": "aa:bb:cc:dd:ee:01", "maxLinkSpeedMbps": "100000" },
                        { "name": "ens1f1", "mac": "aa:bb:cc:dd:ee:02" }
                    ]
                }]
            })),
            ..Default::default()
        };

        let inventory = ScanInventory::from_result(&result).unwrap().unwrap();
        let paths: Vec<_> = inventory.block_exports().map(|e| e.export_path.as_str()).collect();
        assert_eq!(paths, vec!["iqn.a", "nqn.b"]);
        assert!(inventory.nfs_exports.is_empty());

        let ports: Vec<_> = inventory.ports().map(|(dev, p)| (dev.pci_slot.as_str(), p.mac.as_str())).collect();
        assert_eq!(
            ports,
            vec![("0000:3b:00.0", "aa:bb:cc:dd:ee:01"), ("0000:3b:00.0", "aa:bb:cc:dd:ee:02")]
        );
    }

    #[test]
    fn test_result_without_inventory() {
        assert!(ScanInventory::from_result(&JobResult::default()).unwrap().is_none());
    }

    #[test]
    fn test_malformed_inventory() {
        let result = JobResult {
            resources: Some(json!({ "net_interfaces": "nope" })),
            ..Default::default()
        };
        assert!(matches!(
            ScanInventory::from_result(&result),
            Err(ProtoError::Malformed(_))
        ));
    }
}
