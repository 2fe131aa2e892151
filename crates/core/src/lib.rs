//! kpart core types: list/watch requests, the per-partition transport seam and errors.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ListMeta;
use kube::core::{TypeMeta, WatchEvent};
use serde::{Deserialize, Serialize};

pub mod error;
pub mod mock;
pub mod revision;

pub use error::{
    PartialWatchErrors, PartitionError, PartitionFailure, PartitionResult, TransportError,
    NON_MEMBERSHIP_MARKER,
};
pub use revision::revision_is_newer;

/// Options shared by list and watch calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListRequest {
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
    /// Empty means "read the latest state" and is served by one partition.
    pub resource_version: String,
    pub timeout_seconds: Option<u32>,
    /// Tolerate partitions rejecting a watch with a non-membership forbidden.
    pub allow_partial_watch: bool,
    pub watch: bool,
}

impl ListRequest {
    pub fn labels(mut self, selector: &str) -> Self {
        self.label_selector = Some(selector.to_string());
        self
    }

    pub fn fields(mut self, selector: &str) -> Self {
        self.field_selector = Some(selector.to_string());
        self
    }

    pub fn at(mut self, resource_version: &str) -> Self {
        self.resource_version = resource_version.to_string();
        self
    }

    pub fn timeout(mut self, secs: u32) -> Self {
        self.timeout_seconds = Some(secs);
        self
    }

    pub fn allow_partial_watch(mut self) -> Self {
        self.allow_partial_watch = true;
        self
    }

    /// Per-call timeout derived from `timeout_seconds`.
    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout_seconds.map(|s| Duration::from_secs(u64::from(s)))
    }
}

/// A list response from one partition, or the merged view over all of them.
#[derive(Debug, Clone)]
pub struct Listing<K> {
    pub types: TypeMeta,
    pub metadata: ListMeta,
    pub items: Vec<K>,
}

impl<K> Default for Listing<K> {
    fn default() -> Self {
        Self { types: TypeMeta::default(), metadata: ListMeta::default(), items: Vec::new() }
    }
}

impl<K> Listing<K> {
    pub fn resource_version(&self) -> &str {
        self.metadata.resource_version.as_deref().unwrap_or("")
    }
}

/// Events of one partition's watch; errors are forwarded as items.
pub type EventStream<K> = BoxStream<'static, Result<WatchEvent<K>, TransportError>>;

/// Bounds shared by every object type a partition serves.
pub trait Object: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Object for T {}

/// Operations against exactly one partition.
#[async_trait::async_trait]
pub trait Transport<K: Object>: Send + Sync {
    async fn get(&self, name: &str) -> Result<K, TransportError>;

    async fn list(&self, req: &ListRequest) -> Result<Listing<K>, TransportError>;

    async fn watch(&self, req: &ListRequest) -> Result<EventStream<K>, TransportError>;

    async fn create(&self, obj: &K) -> Result<K, TransportError>;

    async fn update(&self, obj: &K) -> Result<K, TransportError>;

    async fn delete(&self, name: &str) -> Result<(), TransportError>;

    /// Delete every object matching the request's selectors.
    async fn delete_collection(&self, req: &ListRequest) -> Result<(), TransportError>;

    /// JSON merge patch.
    async fn patch(&self, name: &str, patch: &serde_json::Value) -> Result<K, TransportError>;
}

/// Shared, immutable capability for one partition.
pub type Handle<K> = Arc<dyn Transport<K>>;

pub mod prelude {
    pub use super::{
        EventStream, Handle, ListRequest, Listing, Object, PartitionError, PartitionResult,
        Transport, TransportError,
    };
}
