//! Cached resource-type discovery with periodic invalidation.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use kpart_core::{PartitionError, PartitionResult, TransportError};
use kube::{
    core::{ApiResource, GroupVersionKind},
    discovery::{Discovery, Scope},
    Client,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::{parse_gvk_key, prepare_connection};

/// Interval at which the discovery cache is dropped.
pub const MAPPER_RESET_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscoveredResource {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
    pub namespaced: bool,
}

impl DiscoveredResource {
    pub fn gvk_key(&self) -> String {
        if self.group.is_empty() {
            format!("{}/{}", self.version, self.kind)
        } else {
            format!("{}/{}/{}", self.group, self.version, self.kind)
        }
    }
}

/// Something whose cached state can be dropped.
pub trait Reset: Send + Sync {
    fn reset(&self);
}

/// Discovery results cached until the next `reset`.
pub struct CachedDiscovery {
    client: Client,
    cache: RwLock<Option<Arc<Discovery>>>,
}

impl CachedDiscovery {
    /// Connect and run a first discovery; an unreachable endpoint fails here.
    pub async fn connect(identifier: &str) -> PartitionResult<Arc<Self>> {
        let config = prepare_connection(identifier).await?;
        let client = Client::try_from(config)
            .map_err(|e| PartitionError::Configuration(format!("creating discovery client failed: {}", e)))?;
        let me = Self { client, cache: RwLock::new(None) };
        me.load()
            .await
            .map_err(|e| PartitionError::Configuration(format!("discovery failed: {}", e)))?;
        Ok(Arc::new(me))
    }

    async fn load(&self) -> Result<Arc<Discovery>, TransportError> {
        let cached = self.cache.read().unwrap_or_else(|e| e.into_inner()).clone();
        if let Some(d) = cached {
            return Ok(d);
        }
        let fresh = Arc::new(Discovery::new(self.client.clone()).run().await?);
        *self.cache.write().unwrap_or_else(|e| e.into_inner()) = Some(fresh.clone());
        debug!(groups = fresh.groups().count(), "discovery cache filled");
        Ok(fresh)
    }

    pub fn is_cached(&self) -> bool {
        self.cache.read().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    /// Served kinds, sorted by group, version and kind.
    pub async fn resources(&self) -> PartitionResult<Vec<DiscoveredResource>> {
        let discovery = self.load().await?;
        let mut out = Vec::new();
        for group in discovery.groups() {
            for (ar, caps) in group.recommended_resources() {
                out.push(DiscoveredResource {
                    group: ar.group.clone(),
                    version: ar.version.clone(),
                    kind: ar.kind.clone(),
                    plural: ar.plural.clone(),
                    namespaced: matches!(caps.scope, Scope::Namespaced),
                });
            }
        }
        out.sort_by(|a, b| a.group.cmp(&b.group).then(a.version.cmp(&b.version)).then(a.kind.cmp(&b.kind)));
        Ok(out)
    }

    /// Map a GVK key (`v1/Kind` or `group/v1/Kind`) to its API resource and scope.
    pub async fn resolve(&self, gvk_key: &str) -> PartitionResult<(ApiResource, bool)> {
        let (group, version, kind) = parse_gvk_key(gvk_key)?;
        let gvk = GroupVersionKind { group, version, kind };
        let discovery = self.load().await?;
        for group in discovery.groups() {
            for (ar, caps) in group.recommended_resources() {
                if ar.group == gvk.group && ar.version == gvk.version && ar.kind == gvk.kind {
                    return Ok((ar, matches!(caps.scope, Scope::Namespaced)));
                }
            }
        }
        Err(TransportError::Other(format!("GVK not found: {}", gvk_key)).into())
    }
}

impl Reset for CachedDiscovery {
    fn reset(&self) {
        *self.cache.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

/// Handle to the background refresh loop.
pub struct RefreshHandle {
    task: Option<JoinHandle<()>>,
}

impl RefreshHandle {
    pub fn stop(mut self) {
        if let Some(h) = self.task.take() {
            h.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }
}

/// Reset `target` every `every`, starting one interval from now. A zero interval is rejected.
pub fn spawn_refresher<R: Reset + 'static>(target: Arc<R>, every: Duration) -> PartitionResult<RefreshHandle> {
    if every.is_zero() {
        return Err(PartitionError::Configuration("mapper reset interval must be non-zero".into()));
    }
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        info!(every_ms = %every.as_millis(), "mapper refresher started");
        loop {
            ticker.tick().await;
            target.reset();
            counter!("kpart_mapper_resets_total", 1);
            debug!("mapper cache reset");
        }
    });
    Ok(RefreshHandle { task: Some(task) })
}
