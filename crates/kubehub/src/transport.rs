//! `Transport` over one API server partition, backed by `kube::Api<DynamicObject>`.

use futures::{StreamExt, TryStreamExt};
use kpart_core::{EventStream, ListRequest, Listing, Transport, TransportError};
use kube::{
    api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams, WatchParams},
    core::{ApiResource, DynamicObject, TypeMeta},
    Client,
};
use tracing::debug;

pub struct KubeTransport {
    api: Api<DynamicObject>,
    types: TypeMeta,
    partition: usize,
}

impl KubeTransport {
    pub fn new(client: Client, ar: &ApiResource, namespace: Option<&str>, partition: usize) -> Self {
        let api = match namespace {
            Some(ns) => Api::namespaced_with(client, ns, ar),
            None => Api::all_with(client, ar),
        };
        let types = TypeMeta { api_version: ar.api_version.clone(), kind: format!("{}List", ar.kind) };
        Self { api, types, partition }
    }

    pub fn partition(&self) -> usize { self.partition }
}

pub(crate) fn list_params(req: &ListRequest) -> ListParams {
    ListParams {
        label_selector: req.label_selector.clone(),
        field_selector: req.field_selector.clone(),
        timeout: req.timeout_seconds,
        resource_version: Some(req.resource_version.clone()).filter(|rv| !rv.is_empty()),
        ..Default::default()
    }
}

pub(crate) fn watch_params(req: &ListRequest) -> WatchParams {
    WatchParams {
        label_selector: req.label_selector.clone(),
        field_selector: req.field_selector.clone(),
        timeout: req.timeout_seconds,
        ..Default::default()
    }
}

#[async_trait::async_trait]
impl Transport<DynamicObject> for KubeTransport {
    async fn get(&self, name: &str) -> Result<DynamicObject, TransportError> {
        Ok(self.api.get(name).await?)
    }

    async fn list(&self, req: &ListRequest) -> Result<Listing<DynamicObject>, TransportError> {
        let list = self.api.list(&list_params(req)).await?;
        debug!(partition = self.partition, items = list.items.len(), "partition list");
        Ok(Listing { types: self.types.clone(), metadata: list.metadata, items: list.items })
    }

    async fn watch(&self, req: &ListRequest) -> Result<EventStream<DynamicObject>, TransportError> {
        let stream = self.api.watch(&watch_params(req), &req.resource_version).await?;
        debug!(partition = self.partition, rv = %req.resource_version, "partition watch opened");
        Ok(stream.map_err(TransportError::from).boxed())
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, TransportError> {
        Ok(self.api.create(&PostParams::default(), obj).await?)
    }

    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject, TransportError> {
        let name = obj.metadata.name.as_deref().ok_or_else(|| TransportError::Other("object missing metadata.name".into()))?;
        Ok(self.api.replace(name, &PostParams::default(), obj).await?)
    }

    async fn delete(&self, name: &str) -> Result<(), TransportError> {
        self.api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn delete_collection(&self, req: &ListRequest) -> Result<(), TransportError> {
        self.api.delete_collection(&DeleteParams::default(), &list_params(req)).await?;
        debug!(partition = self.partition, "partition delete collection");
        Ok(())
    }

    async fn patch(&self, name: &str, patch: &serde_json::Value) -> Result<DynamicObject, TransportError> {
        Ok(self.api.patch(name, &PatchParams::default(), &Patch::Merge(patch)).await?)
    }
}
