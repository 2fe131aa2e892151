#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kpart_core::mock::{non_membership, MockTransport};
use kpart_core::{Handle, ListRequest, PartitionError, TransportError};
use kpart_partition::{list_partitioned, PartitionSet, PartitionedClient};
use kube::core::DynamicObject;

fn item(name: &str, rv: &str) -> DynamicObject {
    DynamicObject {
        types: None,
        metadata: ObjectMeta { name: Some(name.to_string()), resource_version: Some(rv.to_string()), ..Default::default() },
        data: serde_json::json!({}),
    }
}

fn handles(mocks: &[Arc<MockTransport<DynamicObject>>]) -> Vec<Handle<DynamicObject>> {
    mocks.iter().map(|m| m.clone() as Handle<DynamicObject>).collect()
}

#[tokio::test]
async fn empty_rv_reads_only_the_preferred_partition() {
    let a = Arc::new(MockTransport::listing(vec![item("a", "10")], "12"));
    let b = Arc::new(MockTransport::listing(vec![item("b", "11")], "13"));
    let set = PartitionSet::new(handles(&[a.clone(), b.clone()])).expect("set");
    let got = list_partitioned(&set, &ListRequest::default()).await.expect("list");
    assert_eq!(got.resource_version(), "12");
    assert_eq!(got.items.len(), 1);
    assert_eq!((a.list_calls(), b.list_calls()), (1, 0));
}

#[tokio::test]
async fn single_partition_with_rv_does_not_fan_out() {
    let a = Arc::new(MockTransport::listing(vec![item("a", "10")], "12"));
    let set = PartitionSet::new(handles(&[a.clone()])).expect("set");
    let got = list_partitioned(&set, &ListRequest::default().at("3")).await.expect("list");
    assert_eq!(got.items.len(), 1);
    assert_eq!(a.list_calls(), 1);
}

#[tokio::test]
async fn fallback_adopts_the_partition_that_answers() {
    let a = Arc::new(MockTransport::failing(non_membership(0)));
    let b = Arc::new(MockTransport::failing(non_membership(1)));
    let c = Arc::new(MockTransport::listing(vec![item("c", "5")], "5"));
    let set = PartitionSet::new(handles(&[a.clone(), b.clone(), c.clone()])).expect("set");

    let got = list_partitioned(&set, &ListRequest::default()).await.expect("list");
    assert_eq!(got.items[0].metadata.name.as_deref(), Some("c"));
    assert_eq!(set.preferred_index(), 2);

    // Next call starts at the adopted partition.
    list_partitioned(&set, &ListRequest::default()).await.expect("list");
    assert_eq!((a.list_calls(), b.list_calls(), c.list_calls()), (1, 1, 2));
}

#[tokio::test]
async fn fallback_walk_skips_the_partition_already_tried() {
    let a = Arc::new(MockTransport::listing(vec![item("a", "1")], "1"));
    let b = Arc::new(MockTransport::failing(non_membership(1)));
    let set = PartitionSet::new(handles(&[a.clone(), b.clone()])).expect("set");
    set.set_preferred(1);
    list_partitioned(&set, &ListRequest::default()).await.expect("list");
    assert_eq!((a.list_calls(), b.list_calls()), (1, 1));
    assert_eq!(set.preferred_index(), 0);
}

#[tokio::test]
async fn other_error_on_preferred_is_fatal_without_walk() {
    let a = Arc::new(MockTransport::failing(TransportError::Other("503".into())));
    let b = Arc::new(MockTransport::listing(vec![item("b", "1")], "1"));
    let set = PartitionSet::new(handles(&[a.clone(), b.clone()])).expect("set");
    let err = list_partitioned(&set, &ListRequest::default()).await.expect_err("fatal");
    assert!(matches!(err, PartitionError::Transport(TransportError::Other(_))));
    assert_eq!(b.list_calls(), 0);
}

#[tokio::test]
async fn other_error_during_walk_stops_it() {
    let a = Arc::new(MockTransport::failing(non_membership(0)));
    let b = Arc::new(MockTransport::failing(TransportError::Other("reset".into())));
    let c = Arc::new(MockTransport::listing(vec![item("c", "1")], "1"));
    let set = PartitionSet::new(handles(&[a, b, c.clone()])).expect("set");
    let err = list_partitioned(&set, &ListRequest::default()).await.expect_err("fatal");
    assert!(matches!(err, PartitionError::Transport(TransportError::Other(_))));
    assert_eq!(c.list_calls(), 0);
    assert_eq!(set.preferred_index(), 0);
}

#[tokio::test]
async fn every_partition_rejecting_returns_last_rejection() {
    let set = PartitionSet::new(handles(&[
        Arc::new(MockTransport::failing(non_membership(0))),
        Arc::new(MockTransport::failing(non_membership(1))),
        Arc::new(MockTransport::failing(non_membership(2))),
    ]))
    .expect("set");
    match list_partitioned(&set, &ListRequest::default()).await {
        Err(PartitionError::Transport(e)) => assert_eq!(e, non_membership(2)),
        Err(e) => panic!("unexpected error {}", e),
        Ok(_) => panic!("expected failure"),
    }
}

#[tokio::test]
async fn single_object_ops_follow_the_preferred_partition() {
    let a = Arc::new(MockTransport::failing(non_membership(0)));
    let b = Arc::new(MockTransport::listing(vec![item("web", "4")], "4"));
    let client = PartitionedClient::new(handles(&[a.clone(), b.clone()])).expect("client");
    assert_eq!(client.partitions(), 2);

    client.list(&ListRequest::default()).await.expect("list");
    assert_eq!(client.preferred_index(), 1);

    let obj = client.get("web").await.expect("get");
    assert_eq!(obj.metadata.resource_version.as_deref(), Some("4"));
    assert_eq!((a.get_calls(), b.get_calls()), (0, 1));
    client.patch("web", &serde_json::json!({"metadata": {"labels": {"x": "y"}}})).await.expect("patch");
    client.delete("web").await.expect("delete");
    assert!(client.get("missing").await.is_err());
}

#[tokio::test]
async fn delete_collection_goes_to_the_preferred_partition_with_selectors() {
    let a = Arc::new(MockTransport::listing(vec![item("a", "1")], "1"));
    let b = Arc::new(MockTransport::listing(vec![item("b", "2")], "2"));
    let client = PartitionedClient::new(handles(&[a.clone(), b.clone()])).expect("client");
    client.partition_set().set_preferred(1);

    let req = ListRequest::default().labels("app=web").fields("metadata.name=b").timeout(10);
    client.delete_collection(&req).await.expect("delete collection");
    assert_eq!((a.delete_collection_calls(), b.delete_collection_calls()), (0, 1));
    let sent = b.last_request().expect("request recorded");
    assert_eq!(sent.label_selector.as_deref(), Some("app=web"));
    assert_eq!(sent.field_selector.as_deref(), Some("metadata.name=b"));
}

#[tokio::test(start_paused = true)]
async fn delete_collection_is_bounded_by_the_request_timeout() {
    let a = Arc::new(MockTransport::listing(vec![item("a", "1")], "1").with_list_delay(Duration::from_secs(30)));
    let client = PartitionedClient::new(handles(&[a.clone()])).expect("client");
    let err = client.delete_collection(&ListRequest::default().timeout(2)).await.expect_err("timeout");
    assert!(matches!(err, PartitionError::Transport(TransportError::Timeout(_))));
}

#[tokio::test]
async fn delete_collection_surfaces_partition_errors() {
    let a = Arc::new(MockTransport::failing(TransportError::Forbidden("rbac".into())));
    let client = PartitionedClient::new(handles(&[a])).expect("client");
    let err = client.delete_collection(&ListRequest::default()).await.expect_err("forbidden");
    assert!(matches!(err, PartitionError::Transport(TransportError::Forbidden(_))));
}
