//! Partition-aware list: one partition for latest-state reads, fan-out + merge for
//! reads at a resource version.

use std::time::Instant;

use futures::future::join_all;
use kpart_core::{revision_is_newer, ListRequest, Listing, Object, PartitionResult, TransportError};
use metrics::{counter, histogram};
use rustc_hash::FxHashSet;
use tracing::{debug, info};

use crate::set::PartitionSet;
use crate::util::bounded;

/// List across the partition set.
///
/// A non-empty `resource_version` is served from each API server's watch cache, which
/// only holds that server's partition, so every partition is queried and merged. An
/// empty one reads storage directly and a single partition answers, falling back to
/// the others only when it reports non-membership.
pub async fn list_partitioned<K>(set: &PartitionSet<K>, req: &ListRequest) -> PartitionResult<Listing<K>>
where
    K: Object + kube::Resource,
{
    if !req.resource_version.is_empty() && set.len() > 1 {
        fan_out(set, req).await
    } else {
        list_preferred(set, req).await
    }
}

async fn fan_out<K>(set: &PartitionSet<K>, req: &ListRequest) -> PartitionResult<Listing<K>>
where
    K: Object + kube::Resource,
{
    let t0 = Instant::now();
    let timeout = req.timeout_duration();
    // join_all keeps one slot per partition index; no unit is cancelled early.
    let outcomes = join_all(set.handles().iter().map(|h| bounded(timeout, h.list(req)))).await;
    counter!("kpart_list_fanout_total", 1);
    histogram!("kpart_list_fanout_ms", t0.elapsed().as_secs_f64() * 1000.0);
    let merged = merge_listings(&req.resource_version, outcomes)?;
    info!(
        partitions = set.len(),
        items = merged.items.len(),
        rv = %merged.resource_version(),
        took_ms = %t0.elapsed().as_millis(),
        "list fan-out merged"
    );
    Ok(merged)
}

async fn list_preferred<K>(set: &PartitionSet<K>, req: &ListRequest) -> PartitionResult<Listing<K>>
where
    K: Object + kube::Resource,
{
    let timeout = req.timeout_duration();
    let (first, handle) = set.preferred();
    let mut last_err = match bounded(timeout, handle.list(req)).await {
        Ok(listing) => return Ok(listing),
        Err(e) if e.is_non_membership() => e,
        Err(e) => return Err(e.into()),
    };
    debug!(partition = first, error = %last_err, "preferred partition does not hold the data");
    counter!("kpart_list_fallback_total", 1);

    for (idx, candidate) in set.handles().iter().enumerate() {
        if idx == first {
            continue;
        }
        match bounded(timeout, candidate.list(req)).await {
            Ok(listing) => {
                set.set_preferred(idx);
                info!(from = first, to = idx, "list: adopted partition as preferred");
                return Ok(listing);
            }
            Err(e) if e.is_non_membership() => {
                debug!(partition = idx, error = %e, "skip error in list");
                last_err = e;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(last_err.into())
}

/// Combine per-partition outcomes, given in partition index order.
///
/// Non-membership rejections are skipped; any other error aborts the merge. The first
/// contributing listing seeds the metadata. For reads at a resource version the list
/// revision then tracks the newest partition, so a watch resumed from the merged list
/// is never behind any partition. Items are de-duplicated by their own resource version,
/// first occurrence winning.
pub fn merge_listings<K>(
    requested_rv: &str,
    outcomes: Vec<Result<Listing<K>, TransportError>>,
) -> PartitionResult<Listing<K>>
where
    K: Object + kube::Resource,
{
    let mut merged: Listing<K> = Listing::default();
    let mut seen: FxHashSet<String> = FxHashSet::default();
    let mut seeded = false;
    let mut tolerated: Option<TransportError> = None;

    for (idx, outcome) in outcomes.into_iter().enumerate() {
        let current = match outcome {
            Ok(listing) => listing,
            Err(e) if e.is_non_membership() => {
                debug!(partition = idx, error = %e, "list: partition holds no data");
                counter!("kpart_list_tolerated_forbidden_total", 1);
                tolerated = Some(e);
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        if !seeded || merged.resource_version().is_empty() {
            merged.types = current.types;
            merged.metadata = current.metadata;
            seeded = true;
        } else if !requested_rv.is_empty() && revision_is_newer(current.resource_version(), merged.resource_version())? {
            merged.metadata = current.metadata;
        }

        for item in current.items {
            let key = item.meta().resource_version.clone().unwrap_or_default();
            if seen.insert(key) {
                merged.items.push(item);
            }
        }
    }

    match (seeded, tolerated) {
        (false, Some(e)) => Err(e.into()),
        _ => Ok(merged),
    }
}
