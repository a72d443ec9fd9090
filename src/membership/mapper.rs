//! Membership → backend server mapping.

use std::collections::HashMap;

use crate::dataplane::BackendServerSpec;
use crate::membership::resolver::{resolve_address, HostAddressTable};
use crate::membership::types::{
    LegacyEndpoints, MembershipRecord, MembershipSnapshot, TopologySlice,
};

/// Knobs applied to every emitted server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MappingOptions {
    /// Fixed port for every server when positive (e.g. a NodePort).
    pub port_override: i32,
    /// Enable PROXY protocol v2 towards the servers.
    pub send_proxy_v2: bool,
}

/// Build the desired server list. Slices take precedence; legacy subsets are
/// used only when the slices yield nothing.
pub fn map_to_backends(
    snapshot: &MembershipSnapshot,
    hosts: &HostAddressTable,
    options: &MappingOptions,
) -> Vec<BackendServerSpec> {
    let servers = backends_from_slices(&snapshot.slices, hosts, options);
    if !servers.is_empty() {
        return servers;
    }
    backends_from_subsets(&snapshot.legacy, hosts, options)
}

pub fn backends_from_slices(
    slices: &[TopologySlice],
    hosts: &HostAddressTable,
    options: &MappingOptions,
) -> Vec<BackendServerSpec> {
    let records: Vec<_> = slices.iter().flat_map(TopologySlice::records).collect();
    map_records(&records, hosts, options)
}

pub fn backends_from_subsets(
    endpoints: &[LegacyEndpoints],
    hosts: &HostAddressTable,
    options: &MappingOptions,
) -> Vec<BackendServerSpec> {
    let records: Vec<_> = endpoints.iter().flat_map(LegacyEndpoints::records).collect();
    map_records(&records, hosts, options)
}

/// Map flattened records, dropping the ones explicitly marked not ready.
///
/// Server names are unique in the result: a later record whose name was
/// already emitted is skipped.
pub fn map_records(
    records: &[MembershipRecord],
    hosts: &HostAddressTable,
    options: &MappingOptions,
) -> Vec<BackendServerSpec> {
    let mut emitted: HashMap<String, String> = HashMap::new();
    records
        .iter()
        .filter(|record| record.is_ready())
        .map(|record| {
            let port = select_port(record.port, options.port_override);
            let host = record.host.as_deref();
            BackendServerSpec {
                name: server_name(&record.address, host, port),
                address: resolve_address(&record.address, host, hosts),
                port,
                weight: 1,
                check: true,
                send_proxy_v2: options.send_proxy_v2,
            }
        })
        .filter(|spec| match emitted.get(&spec.name) {
            Some(kept) => {
                tracing::warn!(
                    server = %spec.name,
                    kept = %kept,
                    skipped = %spec.address,
                    "Duplicate server name, skipping endpoint"
                );
                false
            }
            None => {
                emitted.insert(spec.name.clone(), spec.address.clone());
                true
            }
        })
        .collect()
}

/// A positive override always wins; otherwise the advertised port, otherwise 0.
///
/// A zero port is still emitted; the control plane rejects it.
pub fn select_port(advertised: Option<i32>, port_override: i32) -> i32 {
    if port_override > 0 {
        return port_override;
    }
    advertised.unwrap_or(0)
}

/// `"{host}-{port}"` when the host is known, `"{address}-{port}"` otherwise.
pub fn server_name(address: &str, host: Option<&str>, port: i32) -> String {
    let identifier = match host {
        Some(h) if !h.is_empty() => h,
        _ => address,
    };
    format!("{}-{}", identifier, port)
}
