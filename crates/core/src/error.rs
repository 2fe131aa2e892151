use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Message fragment a partition uses when the caller's data does not live there.
pub const NON_MEMBERSHIP_MARKER: &str = "no relationship found between node";

/// Failure of a single call against one partition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum TransportError {
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    pub fn is_forbidden(&self) -> bool {
        matches!(self, TransportError::Forbidden(_))
    }

    /// Forbidden because the requested data belongs to another partition.
    pub fn is_non_membership(&self) -> bool {
        matches!(self, TransportError::Forbidden(msg) if msg.contains(NON_MEMBERSHIP_MARKER))
    }
}

impl From<kube::Error> for TransportError {
    fn from(e: kube::Error) -> Self {
        match e {
            kube::Error::Api(ae) if ae.code == 403 => TransportError::Forbidden(ae.message),
            other => TransportError::Other(other.to_string()),
        }
    }
}

/// One partition that could not be opened for watching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionFailure {
    pub partition: usize,
    pub error: TransportError,
}

impl fmt::Display for PartitionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "partition {}: {}", self.partition, self.error)
    }
}

/// Open-phase failures of an aggregated watch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialWatchErrors(pub SmallVec<[PartitionFailure; 4]>);

impl PartialWatchErrors {
    pub fn push(&mut self, partition: usize, error: TransportError) {
        self.0.push(PartitionFailure { partition, error });
    }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }
    pub fn len(&self) -> usize { self.0.len() }

    pub fn iter(&self) -> impl Iterator<Item = &PartitionFailure> {
        self.0.iter()
    }
}

impl fmt::Display for PartialWatchErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", failure)?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PartitionError {
    #[error("configuration: {0}")]
    Configuration(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("internal: invalid resource version [{0}]")]
    RevisionComparison(String),
    #[error("partial watch: {0}")]
    PartialWatch(PartialWatchErrors),
}

impl PartitionError {
    pub fn is_non_membership(&self) -> bool {
        matches!(self, PartitionError::Transport(e) if e.is_non_membership())
    }
}

pub type PartitionResult<T> = Result<T, PartitionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_membership_requires_forbidden_and_marker() {
        let nm = TransportError::Forbidden(format!("{} foo and tenant bar", NON_MEMBERSHIP_MARKER));
        assert!(nm.is_non_membership());
        assert!(!TransportError::Forbidden("rbac denied".into()).is_non_membership());
        assert!(!TransportError::Other(NON_MEMBERSHIP_MARKER.into()).is_non_membership());
        assert!(PartitionError::from(nm).is_non_membership());
    }

    #[test]
    fn kube_403_maps_to_forbidden() {
        let ae = kube::core::ErrorResponse {
            status: "Failure".into(),
            message: "pods is forbidden".into(),
            reason: "Forbidden".into(),
            code: 403,
        };
        assert_eq!(TransportError::from(kube::Error::Api(ae)), TransportError::Forbidden("pods is forbidden".into()));
        let ae = kube::core::ErrorResponse { status: "Failure".into(), message: "gone".into(), reason: "Gone".into(), code: 410 };
        assert!(matches!(TransportError::from(kube::Error::Api(ae)), TransportError::Other(_)));
    }

    #[test]
    fn partial_errors_display_joins_partitions() {
        let mut errs = PartialWatchErrors::default();
        errs.push(0, TransportError::Other("boom".into()));
        errs.push(2, TransportError::Forbidden("nope".into()));
        assert_eq!(errs.to_string(), "partition 0: boom; partition 2: forbidden: nope");
    }
}
