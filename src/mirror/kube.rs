//! Kubernetes watches feeding the mirror.
//!
//! Three watch loops, one task each:
//! - EndpointSlices labelled `kubernetes.io/service-name=<service>`
//! - Endpoints named `<service>` (field selector)
//! - Nodes, whose InternalIP fills the host address table (optional)

use ::kube::config::{KubeConfigOptions, Kubeconfig, KubeconfigError};
use ::kube::runtime::watcher::{self, watcher, Event};
use ::kube::{Api, Client, Config, Resource, ResourceExt};
use async_trait::async_trait;
use futures_util::StreamExt;
use k8s_openapi::api::core::v1::{EndpointAddress, Endpoints, Node};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt::Debug;
use std::time::Duration;
use thiserror::Error;

use crate::config::KubernetesConfig;
use crate::lifecycle::ShutdownSignal;
use crate::membership::{
    FlatSubset, HostAddressTable, LegacyEndpoints, MembershipSnapshot, SliceEndpoint, SlicePort, SubsetAddress,
    TopologySlice,
};
use crate::mirror::{ChangeHandler, ChangeKind, Mirror, MirrorStore};

/// Label every EndpointSlice carries for its owning service.
pub const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";

const WATCH_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("failed to read kubeconfig: {0}")]
    Kubeconfig(#[from] KubeconfigError),

    #[error("failed to create Kubernetes client: {0}")]
    Client(#[from] ::kube::Error),
}

/// Create a client from an explicit kubeconfig, or from the in-cluster/default
/// environment.
pub async fn build_client(kubeconfig: Option<&str>) -> Result<Client, MirrorError> {
    match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)?;
            let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?;
            Ok(Client::try_from(config)?)
        }
        None => Ok(Client::try_default().await?),
    }
}

/// Mirror backed by API server watches.
#[derive(Clone)]
pub struct KubeMirror {
    client: Client,
    namespace: String,
    service_name: String,
    watch_nodes: bool,
    store: MirrorStore,
    hosts: HostAddressTable,
}

impl KubeMirror {
    pub fn new(client: Client, config: &KubernetesConfig, hosts: HostAddressTable) -> Self {
        Self {
            client,
            namespace: config.namespace.clone(),
            service_name: config.service_name.clone(),
            watch_nodes: config.watch_nodes,
            store: MirrorStore::new(),
            hosts,
        }
    }

    pub fn store(&self) -> &MirrorStore {
        &self.store
    }

    async fn watch_slices(self, shutdown: ShutdownSignal) {
        let api: Api<EndpointSlice> = Api::namespaced(self.client.clone(), &self.namespace);
        let config = watcher::Config::default().labels(&format!("{}={}", SERVICE_NAME_LABEL, self.service_name));
        let store = self.store.clone();

        run_watch(api, config, shutdown, move |event| match event {
            Event::Applied(slice) => store.apply_slice(slice_from_resource(&slice)),
            Event::Deleted(slice) => store.delete_slice(&slice.name_any()),
            Event::Restarted(slices) => store.reset_slices(slices.iter().map(slice_from_resource).collect()),
        })
        .await;
    }

    async fn watch_endpoints(self, shutdown: ShutdownSignal) {
        let api: Api<Endpoints> = Api::namespaced(self.client.clone(), &self.namespace);
        let config = watcher::Config::default().fields(&format!("metadata.name={}", self.service_name));
        let store = self.store.clone();

        run_watch(api, config, shutdown, move |event| match event {
            Event::Applied(endpoints) => store.apply_endpoints(endpoints_from_resource(&endpoints)),
            Event::Deleted(endpoints) => store.delete_endpoints(&endpoints.name_any()),
            Event::Restarted(all) => store.reset_endpoints(all.iter().map(endpoints_from_resource).collect()),
        })
        .await;
    }

    async fn watch_nodes(self, shutdown: ShutdownSignal) {
        let api: Api<Node> = Api::all(self.client.clone());
        let (store, hosts) = (self.store.clone(), self.hosts.clone());

        run_watch(api, watcher::Config::default(), shutdown, move |event| {
            apply_node_event(event, &hosts, &store)
        })
        .await;
    }
}

#[async_trait]
impl Mirror for KubeMirror {
    fn start(&self, shutdown: ShutdownSignal) {
        tracing::info!(
            namespace = %self.namespace,
            service = %self.service_name,
            watch_nodes = self.watch_nodes,
            "Starting watches"
        );
        tokio::spawn(self.clone().watch_slices(shutdown.clone()));
        tokio::spawn(self.clone().watch_endpoints(shutdown.clone()));
        if self.watch_nodes {
            tokio::spawn(self.clone().watch_nodes(shutdown));
        }
    }

    fn list_membership(&self) -> MembershipSnapshot {
        self.store.list_membership()
    }

    fn subscribe(&self, handler: ChangeHandler) {
        self.store.subscribe(handler);
    }

    async fn wait_for_initial_sync(&self, timeout: Duration) -> bool {
        self.store.wait_for_initial_sync(timeout).await
    }
}

/// Drive one watch until shutdown, handing every event to `handle`.
async fn run_watch<K, F>(api: Api<K>, config: watcher::Config, shutdown: ShutdownSignal, mut handle: F)
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
    K::DynamicType: Default,
    F: FnMut(Event<K>),
{
    let kind = K::kind(&K::DynamicType::default()).to_string();
    let mut stream = watcher(api, config).boxed();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            next = stream.next() => match next {
                Some(Ok(event)) => handle(event),
                Some(Err(e)) => {
                    tracing::warn!(kind = %kind, error = %e, "Watch failed; retrying");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(WATCH_RETRY_DELAY) => {}
                    }
                }
                None => break,
            },
        }
    }

    tracing::debug!(kind = %kind, "Watch stopped");
}

pub fn slice_from_resource(slice: &EndpointSlice) -> TopologySlice {
    TopologySlice {
        name: slice.name_any(),
        ports: slice
            .ports
            .iter()
            .flatten()
            .map(|p| SlicePort {
                name: p.name.clone(),
                port: p.port,
            })
            .collect(),
        endpoints: slice
            .endpoints
            .iter()
            .map(|e| SliceEndpoint {
                addresses: e.addresses.clone(),
                ready: e.conditions.as_ref().and_then(|c| c.ready),
                host: e.node_name.clone(),
            })
            .collect(),
    }
}

pub fn endpoints_from_resource(endpoints: &Endpoints) -> LegacyEndpoints {
    LegacyEndpoints {
        name: endpoints.name_any(),
        subsets: endpoints
            .subsets
            .iter()
            .flatten()
            .map(|s| FlatSubset {
                addresses: subset_addresses(&s.addresses),
                not_ready_addresses: subset_addresses(&s.not_ready_addresses),
                ports: s.ports.iter().flatten().map(|p| p.port).collect(),
            })
            .collect(),
    }
}

fn subset_addresses(addresses: &Option<Vec<EndpointAddress>>) -> Vec<SubsetAddress> {
    addresses
        .iter()
        .flatten()
        .map(|a| SubsetAddress {
            ip: a.ip.clone(),
            host: a.node_name.clone(),
        })
        .collect()
}

/// First InternalIP in the node status.
/// Fold a node event into the host table. Subscribers hear about it only when
/// an address was added, changed or dropped; heartbeats and label updates are
/// silent.
fn apply_node_event(event: Event<Node>, hosts: &HostAddressTable, store: &MirrorStore) {
    match event {
        Event::Applied(node) => {
            let name = node.name_any();
            if hosts.update(&name, internal_ip(&node)) {
                store.notify_host_change(ChangeKind::Updated, &name);
            }
        }
        Event::Deleted(node) => {
            let name = node.name_any();
            if hosts.remove(&name) {
                store.notify_host_change(ChangeKind::Deleted, &name);
            }
        }
        Event::Restarted(nodes) => {
            let table: HashMap<String, String> = nodes
                .iter()
                .filter_map(|node| internal_ip(node).map(|ip| (node.name_any(), ip)))
                .collect();
            tracing::debug!(nodes = table.len(), "Node addresses relisted");
            if hosts.replace_all(table) {
                store.notify_host_change(ChangeKind::Resynced, "");
            }
        }
    }
}

pub fn internal_ip(node: &Node) -> Option<String> {
    node.status
        .as_ref()?
        .addresses
        .as_ref()?
        .iter()
        .find(|a| a.type_ == "InternalIP" && !a.address.is_empty())
        .map(|a| a.address.clone())
}
