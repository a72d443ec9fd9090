//! Membership shapes as seen by the mapper.
//!
//! Both shapes mirror what the cluster publishes for a service: topology
//! slices (`discovery.k8s.io/v1` EndpointSlice) and the legacy flat
//! `v1/Endpoints` subsets. They are flattened into [`MembershipRecord`]s
//! before mapping so both produce identical backends for identical input.

use serde::{Deserialize, Serialize};

/// One reachable endpoint of the watched service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipRecord {
    /// Raw endpoint address (usually the pod IP).
    pub address: String,
    /// Advertised port, if the source published one.
    pub port: Option<i32>,
    /// Readiness condition. `None` means unknown and is treated as ready.
    pub ready: Option<bool>,
    /// Node the endpoint is scheduled on.
    pub host: Option<String>,
}

impl MembershipRecord {
    /// Only an explicit `ready: false` excludes a record.
    pub fn is_ready(&self) -> bool {
        self.ready != Some(false)
    }
}

/// Port entry of a topology slice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlicePort {
    pub name: Option<String>,
    pub port: Option<i32>,
}

/// Endpoint entry of a topology slice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceEndpoint {
    pub addresses: Vec<String>,
    pub ready: Option<bool>,
    pub host: Option<String>,
}

/// A topology slice: every port applies to every endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologySlice {
    pub name: String,
    pub ports: Vec<SlicePort>,
    pub endpoints: Vec<SliceEndpoint>,
}

impl TopologySlice {
    /// Flatten into records, port-major. Ports without a number are skipped.
    pub fn records(&self) -> Vec<MembershipRecord> {
        let mut records = Vec::new();
        for port in &self.ports {
            let Some(number) = port.port else {
                continue;
            };
            for endpoint in &self.endpoints {
                for address in &endpoint.addresses {
                    records.push(MembershipRecord {
                        address: address.clone(),
                        port: Some(number),
                        ready: endpoint.ready,
                        host: endpoint.host.clone(),
                    });
                }
            }
        }
        records
    }
}

/// Address entry of a legacy subset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubsetAddress {
    pub ip: String,
    pub host: Option<String>,
}

/// A legacy subset: ready and not-ready addresses sharing a port list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatSubset {
    pub addresses: Vec<SubsetAddress>,
    pub not_ready_addresses: Vec<SubsetAddress>,
    pub ports: Vec<i32>,
}

/// Legacy endpoints object for one service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyEndpoints {
    pub name: String,
    pub subsets: Vec<FlatSubset>,
}

impl LegacyEndpoints {
    /// Flatten into records, subset by subset, port-major.
    pub fn records(&self) -> Vec<MembershipRecord> {
        let mut records = Vec::new();
        for subset in &self.subsets {
            for &port in &subset.ports {
                let ready = subset.addresses.iter().map(|a| (a, true));
                let not_ready = subset.not_ready_addresses.iter().map(|a| (a, false));
                for (address, is_ready) in ready.chain(not_ready) {
                    records.push(MembershipRecord {
                        address: address.ip.clone(),
                        port: Some(port),
                        ready: Some(is_ready),
                        host: address.host.clone(),
                    });
                }
            }
        }
        records
    }
}

/// Point-in-time copy of everything the mirror knows about the service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipSnapshot {
    pub slices: Vec<TopologySlice>,
    pub legacy: Vec<LegacyEndpoints>,
}

impl MembershipSnapshot {
    pub fn is_empty(&self) -> bool {
        self.slices.is_empty() && self.legacy.is_empty()
    }
}
