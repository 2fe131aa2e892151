use std::sync::Mutex;

use kpart_core::{Handle, Object, PartitionError, PartitionResult};

/// One transport handle per partition plus the handle that last served a request.
pub struct PartitionSet<K: Object> {
    handles: Vec<Handle<K>>,
    preferred: Mutex<usize>,
}

impl<K: Object> PartitionSet<K> {
    pub fn new(handles: Vec<Handle<K>>) -> PartitionResult<Self> {
        if handles.is_empty() {
            return Err(PartitionError::Configuration("partition set needs at least one handle".into()));
        }
        Ok(Self { handles, preferred: Mutex::new(0) })
    }

    pub fn len(&self) -> usize { self.handles.len() }
    pub fn is_empty(&self) -> bool { self.handles.is_empty() }
    pub fn handles(&self) -> &[Handle<K>] { &self.handles }

    pub fn preferred_index(&self) -> usize {
        *self.preferred.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Default entry point for single-partition operations.
    pub fn preferred(&self) -> (usize, Handle<K>) {
        let idx = self.preferred_index();
        (idx, self.handles[idx].clone())
    }

    /// Best-effort affinity; indices outside the set are ignored.
    pub fn set_preferred(&self, idx: usize) {
        if idx < self.handles.len() {
            *self.preferred.lock().unwrap_or_else(|e| e.into_inner()) = idx;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kpart_core::mock::MockTransport;
    use kube::core::DynamicObject;
    use std::sync::Arc;

    fn handle() -> Handle<DynamicObject> {
        Arc::new(MockTransport::<DynamicObject>::listing(Vec::new(), "1"))
    }

    #[test]
    fn preferred_starts_at_first_and_follows_updates() {
        let set = PartitionSet::new(vec![handle(), handle(), handle()]).expect("set");
        assert_eq!(set.preferred_index(), 0);
        set.set_preferred(2);
        assert_eq!(set.preferred().0, 2);
        set.set_preferred(9);
        assert_eq!(set.preferred_index(), 2);
    }

    #[test]
    fn empty_set_is_rejected() {
        assert!(matches!(PartitionSet::<DynamicObject>::new(Vec::new()), Err(PartitionError::Configuration(_))));
    }
}
