//! Ordering of resource versions returned by different partitions.

use crate::{PartitionError, PartitionResult};

fn parse(rv: &str) -> PartitionResult<u64> {
    rv.parse::<u64>().map_err(|e| PartitionError::RevisionComparison(format!("{:?}: {}", rv, e)))
}

/// True when `candidate` is strictly newer than `current`.
pub fn revision_is_newer(candidate: &str, current: &str) -> PartitionResult<bool> {
    Ok(parse(candidate)? > parse(current)?)
}
