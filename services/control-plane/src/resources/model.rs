//! Resource model: a closed set of resource kinds with protocol-specific
//! params and observed state.

use serde::{Deserialize, Serialize};
use testlib_id::ResourceId;

// =============================================================================
// Shared vocabulary
// =============================================================================

/// Administrative lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceStatus {
    #[default]
    New,
    Creating,
    Ok,
    Unknown,
    Removing,
}

/// Operational health, independent of the administrative status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Health {
    #[default]
    Unknown,
    Ok,
    Degraded,
    Failed,
    Lost,
}

impl Health {
    /// Maps a health string reported by a scan. Anything unrecognised is
    /// `Unknown`.
    pub fn from_scanned(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "OK" => Health::Ok,
            "DEGRADED" => Health::Degraded,
            "FAILED" => Health::Failed,
            "LOST" => Health::Lost,
            _ => Health::Unknown,
        }
    }
}

/// Discriminant of [`ResourceKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    Export,
    Network,
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceType::Export => f.write_str("Export"),
            ResourceType::Network => f.write_str("Network"),
        }
    }
}

/// An error attached to a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceError {
    #[serde(rename = "error")]
    pub code: String,
    pub message: String,
}

// =============================================================================
// Export
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportProto {
    Nvmeof,
    Iscsi,
    Nfs,
}

impl ExportProto {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "nvmeof" => Some(ExportProto::Nvmeof),
            "iscsi" => Some(ExportProto::Iscsi),
            "nfs" => Some(ExportProto::Nfs),
            _ => None,
        }
    }

    /// Block protocols are matched by qualified name during reconciliation.
    pub fn is_block(&self) -> bool {
        matches!(self, ExportProto::Nvmeof | ExportProto::Iscsi)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExportTransport {
    #[default]
    Tcp,
    Rdma,
}

/// Protocol parameters. `qn` (and `port`) apply to block protocols,
/// `allowedNetworks` and `mountPath` to NFS.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtoParams {
    pub transport: ExportTransport,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_networks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportParams {
    pub proto: ExportProto,
    pub proto_params: ProtoParams,
    /// Volume this export publishes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation_id: Option<ResourceId>,
}

impl ExportParams {
    /// Qualified name of a block export, the reconciliation key.
    pub fn qualified_name(&self) -> Option<&str> {
        if self.proto.is_block() {
            self.proto_params.qn.as_deref().filter(|qn| !qn.is_empty())
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportState {
    pub health: Health,
    #[serde(default)]
    pub clients: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Export {
    pub params: ExportParams,
    pub state: ExportState,
}

// =============================================================================
// Network
// =============================================================================

macro_rules! nic_drivers {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// Kernel or DPDK driver of a network device.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub enum NicDriver {
            #[default]
            Unknown,
            $($variant,)+
        }

        impl NicDriver {
            pub fn as_str(&self) -> &'static str {
                match self {
                    NicDriver::Unknown => "UNKNOWN",
                    $(NicDriver::$variant => $name,)+
                }
            }

            /// Resolves a driver name case-insensitively; unknown names map to
            /// `Unknown`.
            pub fn from_name(raw: &str) -> Self {
                match raw.trim().to_ascii_uppercase().as_str() {
                    $($name => NicDriver::$variant,)+
                    _ => NicDriver::Unknown,
                }
            }
        }
    };
}

nic_drivers! {
    AfXdp => "AF_XDP",
    AfPacket => "AF_PACKET",
    Ark => "ARK",
    Atlantic => "ATLANTIC",
    Avp => "AVP",
    Axgbe => "AXGBE",
    Bnx2x => "BNX2X",
    Bnxt => "BNXT",
    Cxgbe => "CXGBE",
    Cxgbevf => "CXGBEVF",
    Dpaa => "DPAA",
    Dpaa2 => "DPAA2",
    E1000 => "E1000",
    Ena => "ENA",
    Enetc => "ENETC",
    Enic => "ENIC",
    Failsafe => "FAILSAFE",
    Fm10k => "FM10K",
    Fm10kvf => "FM10KVF",
    Hinic => "HINIC",
    Hns3 => "HNS3",
    Hns3vf => "HNS3VF",
    I40e => "I40E",
    I40evf => "I40EVF",
    Iavf => "IAVF",
    Ice => "ICE",
    IceDcf => "ICE_DCF",
    Igb => "IGB",
    Igbvf => "IGBVF",
    Igc => "IGC",
    Ionic => "IONIC",
    Ipn3ke => "IPN3KE",
    Ixgbe => "IXGBE",
    Ixgbevf => "IXGBEVF",
    Liquidio => "LIQUIDIO",
    Memif => "MEMIF",
    Mlx4 => "MLX4",
    Mlx5 => "MLX5",
    Mvneta => "MVNETA",
    Mvpp2 => "MVPP2",
    Netvsc => "NETVSC",
    Nfb => "NFB",
    Nfp => "NFP",
    Octeontx => "OCTEONTX",
    Octeontx2 => "OCTEONTX2",
    Octeontx2vec => "OCTEONTX2VEC",
    Octeontx2vf => "OCTEONTX2VF",
    OcteontxEp => "OCTEONTX_EP",
    Pcap => "PCAP",
    Pfe => "PFE",
    Qede => "QEDE",
    Qedevf => "QEDEVF",
    SfcEfx => "SFC_EFX",
    Szedata2 => "SZEDATA2",
    Tap => "TAP",
    Thunderx => "THUNDERX",
    Txgbe => "TXGBE",
    Vhost => "VHOST",
    Virtio => "VIRTIO",
    Vmxnet3 => "VMXNET3",
}

impl Serialize for NicDriver {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for NicDriver {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(NicDriver::from_name(&raw))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkParams {
    pub driver: NicDriver,
    #[serde(default)]
    pub pci_slot: String,
    #[serde(default)]
    pub numa_id: String,
    #[serde(default)]
    pub full_name: String,
    /// Reconciliation key.
    pub mac: String,
    #[serde(default)]
    pub max_link_speed_mbps: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NetworkState {
    pub health: Health,
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default)]
    pub power: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub params: NetworkParams,
    pub state: NetworkState,
}

// =============================================================================
// Resource
// =============================================================================

/// Kind-specific payload of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ResourceKind {
    Export(Export),
    Network(Network),
}

/// Replacement state for [`ResourceRepository::set_state`](super::ResourceRepository::set_state).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceState {
    Export(ExportState),
    Network(NetworkState),
}

/// Replacement params for [`ResourceRepository::set_params`](super::ResourceRepository::set_params).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceParams {
    Export(ExportParams),
    Network(NetworkParams),
}

/// A storage or network resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub environment_key: String,
    pub name: String,
    pub status: ResourceStatus,
    #[serde(flatten)]
    pub kind: ResourceKind,
    #[serde(default)]
    pub locked: bool,
    pub created: i64,
    pub updated: i64,
    #[serde(default)]
    pub errors: Vec<ResourceError>,
}

impl Resource {
    /// Builds a NEW, unlocked resource.
    pub fn new(
        id: ResourceId,
        environment_key: impl Into<String>,
        name: impl Into<String>,
        kind: ResourceKind,
        now_ms: i64,
    ) -> Self {
        Self {
            id,
            environment_key: environment_key.into(),
            name: name.into(),
            status: ResourceStatus::New,
            kind,
            locked: false,
            created: now_ms,
            updated: now_ms,
            errors: Vec::new(),
        }
    }

    pub fn resource_type(&self) -> ResourceType {
        match self.kind {
            ResourceKind::Export(_) => ResourceType::Export,
            ResourceKind::Network(_) => ResourceType::Network,
        }
    }

    pub fn health(&self) -> Health {
        match &self.kind {
            ResourceKind::Export(export) => export.state.health,
            ResourceKind::Network(network) => network.state.health,
        }
    }

    pub fn as_export(&self) -> Option<&Export> {
        match &self.kind {
            ResourceKind::Export(export) => Some(export),
            ResourceKind::Network(_) => None,
        }
    }

    pub fn as_network(&self) -> Option<&Network> {
        match &self.kind {
            ResourceKind::Network(network) => Some(network),
            ResourceKind::Export(_) => None,
        }
    }

    pub(crate) fn health_mut(&mut self) -> &mut Health {
        match &mut self.kind {
            ResourceKind::Export(export) => &mut export.state.health,
            ResourceKind::Network(network) => &mut network.state.health,
        }
    }
}
