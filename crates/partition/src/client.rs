use kpart_core::{Handle, ListRequest, Listing, Object, PartitionResult};
use tracing::debug;

use crate::config::WatchConfig;
use crate::list::list_partitioned;
use crate::set::PartitionSet;
use crate::util::bounded;
use crate::watch::{watch_partitioned, AggregatedWatch};

/// Client for a resource kind whose objects are split across API server partitions.
///
/// `list` and `watch` span every partition; single-object operations go to the
/// preferred partition, which follows whichever partition last answered a list.
pub struct PartitionedClient<K: Object> {
    set: PartitionSet<K>,
    watch_cfg: WatchConfig,
}

impl<K> PartitionedClient<K>
where
    K: Object + kube::Resource,
{
    pub fn new(handles: Vec<Handle<K>>) -> PartitionResult<Self> {
        Ok(Self { set: PartitionSet::new(handles)?, watch_cfg: WatchConfig::from_env() })
    }

    pub fn with_watch_config(mut self, cfg: WatchConfig) -> Self {
        self.watch_cfg = cfg;
        self
    }

    pub fn partitions(&self) -> usize { self.set.len() }
    pub fn preferred_index(&self) -> usize { self.set.preferred_index() }
    pub fn partition_set(&self) -> &PartitionSet<K> { &self.set }

    pub async fn list(&self, req: &ListRequest) -> PartitionResult<Listing<K>> {
        list_partitioned(&self.set, req).await
    }

    /// Aggregated watch; open-phase failures are available from `AggregatedWatch::errors`.
    pub async fn watch(&self, req: &ListRequest) -> AggregatedWatch<K> {
        watch_partitioned(&self.set, req, &self.watch_cfg).await
    }

    pub async fn get(&self, name: &str) -> PartitionResult<K> {
        let (idx, h) = self.set.preferred();
        debug!(partition = idx, name = %name, "get");
        Ok(h.get(name).await?)
    }

    pub async fn create(&self, obj: &K) -> PartitionResult<K> {
        let (_, h) = self.set.preferred();
        Ok(h.create(obj).await?)
    }

    pub async fn update(&self, obj: &K) -> PartitionResult<K> {
        let (_, h) = self.set.preferred();
        Ok(h.update(obj).await?)
    }

    pub async fn delete(&self, name: &str) -> PartitionResult<()> {
        let (_, h) = self.set.preferred();
        Ok(h.delete(name).await?)
    }

    /// Delete every object matching the request's selectors, bounded by its timeout.
    pub async fn delete_collection(&self, req: &ListRequest) -> PartitionResult<()> {
        let (idx, h) = self.set.preferred();
        debug!(partition = idx, selector = ?req.label_selector, "delete collection");
        Ok(bounded(req.timeout_duration(), h.delete_collection(req)).await?)
    }

    pub async fn patch(&self, name: &str, patch: &serde_json::Value) -> PartitionResult<K> {
        let (_, h) = self.set.preferred();
        Ok(h.patch(name, patch).await?)
    }
}
