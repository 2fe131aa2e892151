//! kpart kubehub: kube wiring for partitioned API servers (connection setup,
//! per-partition transports, discovery mapper).

#![forbid(unsafe_code)]

use std::sync::Arc;

use kpart_core::{Handle, PartitionError, PartitionResult};
use kpart_partition::{ClientPool, PartitionedClient};
use kube::{
    config::{KubeConfigOptions, Kubeconfig},
    core::DynamicObject,
    Client, Config,
};
use tracing::info;

pub mod mapper;
pub mod transport;

pub use mapper::{spawn_refresher, CachedDiscovery, DiscoveredResource, RefreshHandle, Reset, MAPPER_RESET_INTERVAL};
pub use transport::KubeTransport;

fn config_err(what: &str, e: impl std::fmt::Display) -> PartitionError {
    PartitionError::Configuration(format!("{}: {}", what, e))
}

/// Connection config for `identifier`: a kubeconfig path, or the inferred
/// environment (in-cluster or default kubeconfig) when empty.
pub async fn prepare_connection(identifier: &str) -> PartitionResult<Config> {
    if identifier.is_empty() {
        return Config::infer().await.map_err(|e| config_err("config prepare failed", e));
    }
    let kubeconfig = Kubeconfig::read_from(identifier).map_err(|e| config_err("config prepare failed", e))?;
    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| config_err("config prepare failed", e))
}

/// Like `prepare_connection`, with every cluster entry pointed at `server`.
async fn prepare_partition(identifier: &str, server: Option<&str>) -> PartitionResult<Config> {
    let Some(server) = server else { return prepare_connection(identifier).await };
    let read = if identifier.is_empty() { Kubeconfig::read() } else { Kubeconfig::read_from(identifier) };
    let mut kubeconfig = read.map_err(|e| config_err("config prepare failed", e))?;
    for named in kubeconfig.clusters.iter_mut() {
        if let Some(cluster) = named.cluster.as_mut() {
            cluster.server = Some(server.to_string());
        }
    }
    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| config_err("config prepare failed", e))
}

/// Validate a requested client / partition count before anything is created.
pub fn check_count(count: usize, servers: &[String]) -> PartitionResult<()> {
    if count < 1 {
        return Err(PartitionError::Configuration(format!("incorrect clients number: {}", count)));
    }
    if !servers.is_empty() && servers.len() != count {
        return Err(PartitionError::Configuration(format!(
            "{} partition servers given for {} partitions",
            servers.len(),
            count
        )));
    }
    Ok(())
}

fn client_for(config: Config) -> PartitionResult<Client> {
    Client::try_from(config).map_err(|e| config_err("creating client failed", e))
}

/// `count` identical clients for `identifier`, handed out round-robin.
pub async fn connect_pool(identifier: &str, count: usize) -> PartitionResult<ClientPool<Client>> {
    check_count(count, &[])?;
    let mut clients = Vec::with_capacity(count);
    for _ in 0..count {
        clients.push(client_for(prepare_connection(identifier).await?)?);
    }
    info!(count, "client pool ready");
    ClientPool::new(clients)
}

/// One transport per partition for the kind named by `gvk_key`.
///
/// With `servers`, partition `i` talks to `servers[i]`; otherwise every partition uses
/// the server of `identifier`'s current context.
pub async fn connect_partitioned(
    identifier: &str,
    count: usize,
    servers: &[String],
    gvk_key: &str,
    namespace: Option<&str>,
    mapper: &CachedDiscovery,
) -> PartitionResult<PartitionedClient<DynamicObject>> {
    check_count(count, servers)?;
    let (ar, namespaced) = mapper.resolve(gvk_key).await?;
    let ns = if namespaced { namespace } else { None };
    let mut handles: Vec<Handle<DynamicObject>> = Vec::with_capacity(count);
    for i in 0..count {
        let config = prepare_partition(identifier, servers.get(i).map(|s| s.as_str())).await?;
        let client = client_for(config)?;
        handles.push(Arc::new(KubeTransport::new(client, &ar, ns, i)));
    }
    info!(gvk = %gvk_key, ns = ?ns, partitions = count, "partitioned client ready");
    PartitionedClient::new(handles)
}

/// Split a GVK key (`v1/Kind` or `group/v1/Kind`) into group, version and kind.
pub fn parse_gvk_key(key: &str) -> PartitionResult<(String, String, String)> {
    let parts: Vec<_> = key.split('/').collect();
    match parts.as_slice() {
        [version, kind] if !version.is_empty() && !kind.is_empty() => Ok((String::new(), (*version).to_string(), (*kind).to_string())),
        [group, version, kind] if !version.is_empty() && !kind.is_empty() => {
            Ok(((*group).to_string(), (*version).to_string(), (*kind).to_string()))
        }
        _ => Err(PartitionError::Configuration(format!("invalid gvk key: {} (expect v1/Kind or group/v1/Kind)", key))),
    }
}
