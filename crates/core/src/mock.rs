//! In-memory partition used by tests and demos.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ListMeta;

use crate::{EventStream, ListRequest, Listing, Transport, TransportError, NON_MEMBERSHIP_MARKER};

/// A scripted partition: fixed list outcome, queued watch outcomes, call counters.
pub struct MockTransport<K> {
    list: Result<Listing<K>, TransportError>,
    list_delay: Option<Duration>,
    watches: Mutex<VecDeque<Result<EventStream<K>, TransportError>>>,
    list_calls: AtomicUsize,
    watch_calls: AtomicUsize,
    get_calls: AtomicUsize,
    delete_collection_calls: AtomicUsize,
    last_request: Mutex<Option<ListRequest>>,
}

/// Forbidden error a partition returns for data it does not hold.
pub fn non_membership(partition: usize) -> TransportError {
    TransportError::Forbidden(format!("{} and partition {}", NON_MEMBERSHIP_MARKER, partition))
}

impl<K> MockTransport<K> {
    fn with_list(list: Result<Listing<K>, TransportError>) -> Self {
        Self {
            list,
            list_delay: None,
            watches: Mutex::new(VecDeque::new()),
            list_calls: AtomicUsize::new(0),
            watch_calls: AtomicUsize::new(0),
            get_calls: AtomicUsize::new(0),
            delete_collection_calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Partition serving `items` under list revision `rv`.
    pub fn listing(items: Vec<K>, rv: &str) -> Self {
        let metadata = ListMeta { resource_version: Some(rv.to_string()), ..Default::default() };
        Self::with_list(Ok(Listing { metadata, items, ..Default::default() }))
    }

    /// Partition whose list calls fail with `err`.
    pub fn failing(err: TransportError) -> Self {
        Self::with_list(Err(err))
    }

    pub fn with_list_delay(mut self, delay: Duration) -> Self {
        self.list_delay = Some(delay);
        self
    }

    /// Queue the outcome of the next watch call.
    pub fn with_watch(self, stream: EventStream<K>) -> Self {
        self.push_watch(Ok(stream));
        self
    }

    pub fn with_watch_error(self, err: TransportError) -> Self {
        self.push_watch(Err(err));
        self
    }

    fn push_watch(&self, outcome: Result<EventStream<K>, TransportError>) {
        self.watches.lock().unwrap_or_else(|e| e.into_inner()).push_back(outcome);
    }

    pub fn list_calls(&self) -> usize { self.list_calls.load(Ordering::SeqCst) }
    pub fn watch_calls(&self) -> usize { self.watch_calls.load(Ordering::SeqCst) }
    pub fn get_calls(&self) -> usize { self.get_calls.load(Ordering::SeqCst) }
    pub fn delete_collection_calls(&self) -> usize { self.delete_collection_calls.load(Ordering::SeqCst) }

    pub fn last_request(&self) -> Option<ListRequest> {
        self.last_request.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn record(&self, req: &ListRequest) {
        *self.last_request.lock().unwrap_or_else(|e| e.into_inner()) = Some(req.clone());
    }

    fn items(&self) -> &[K] {
        match &self.list {
            Ok(l) => &l.items,
            Err(_) => &[],
        }
    }
}

impl<K> MockTransport<K>
where
    K: kube::Resource + Clone + Send + Sync + 'static,
{
    fn find(&self, name: &str) -> Result<K, TransportError> {
        if let Err(e) = &self.list {
            return Err(e.clone());
        }
        self.items()
            .iter()
            .find(|k| k.meta().name.as_deref() == Some(name))
            .cloned()
            .ok_or_else(|| TransportError::Other(format!("not found: {}", name)))
    }
}

#[async_trait::async_trait]
impl<K> Transport<K> for MockTransport<K>
where
    K: kube::Resource + Clone + Send + Sync + 'static,
{
    async fn get(&self, name: &str) -> Result<K, TransportError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.find(name)
    }

    async fn list(&self, req: &ListRequest) -> Result<Listing<K>, TransportError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.record(req);
        if let Some(d) = self.list_delay {
            tokio::time::sleep(d).await;
        }
        self.list.clone()
    }

    async fn watch(&self, req: &ListRequest) -> Result<EventStream<K>, TransportError> {
        self.watch_calls.fetch_add(1, Ordering::SeqCst);
        self.record(req);
        let next = self.watches.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
        next.unwrap_or_else(|| Ok(futures::stream::empty().boxed()))
    }

    async fn create(&self, obj: &K) -> Result<K, TransportError> {
        Ok(obj.clone())
    }

    async fn update(&self, obj: &K) -> Result<K, TransportError> {
        let name = obj.meta().name.clone().unwrap_or_default();
        self.find(&name)?;
        Ok(obj.clone())
    }

    async fn delete(&self, name: &str) -> Result<(), TransportError> {
        self.find(name).map(|_| ())
    }

    async fn delete_collection(&self, req: &ListRequest) -> Result<(), TransportError> {
        self.delete_collection_calls.fetch_add(1, Ordering::SeqCst);
        self.record(req);
        if let Some(d) = self.list_delay {
            tokio::time::sleep(d).await;
        }
        self.list.as_ref().map(|_| ()).map_err(|e| e.clone())
    }

    async fn patch(&self, name: &str, _patch: &serde_json::Value) -> Result<K, TransportError> {
        self.find(name)
    }
}
