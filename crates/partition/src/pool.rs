use std::sync::Mutex;

use kpart_core::{PartitionError, PartitionResult};

/// Homogeneous clients handed out in round-robin order to spread load.
pub struct ClientPool<T> {
    clients: Vec<T>,
    cursor: Mutex<usize>,
}

impl<T: Clone> ClientPool<T> {
    pub fn new(clients: Vec<T>) -> PartitionResult<Self> {
        if clients.is_empty() {
            return Err(PartitionError::Configuration("incorrect clients number: 0".into()));
        }
        Ok(Self { clients, cursor: Mutex::new(0) })
    }

    pub fn len(&self) -> usize { self.clients.len() }
    pub fn is_empty(&self) -> bool { self.clients.is_empty() }

    /// Next client in rotation; any `len()` consecutive calls cover every client once.
    pub fn acquire(&self) -> T {
        let idx = {
            let mut cur = self.cursor.lock().unwrap_or_else(|e| e.into_inner());
            let idx = *cur;
            *cur = (idx + 1) % self.clients.len();
            idx
        };
        self.clients[idx].clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[test]
    fn rotation_covers_every_client_then_wraps() {
        for n in 1..=5usize {
            let pool = ClientPool::new((0..n).collect::<Vec<_>>()).expect("pool");
            let first: Vec<usize> = (0..n).map(|_| pool.acquire()).collect();
            assert_eq!(first, (0..n).collect::<Vec<_>>());
            assert_eq!(pool.acquire(), 0, "call n+1 wraps to the first client (n={})", n);
        }
    }

    #[test]
    fn empty_pool_is_a_configuration_error() {
        let res = ClientPool::<u8>::new(Vec::new());
        assert!(matches!(res, Err(PartitionError::Configuration(_))));
    }

    #[test]
    fn concurrent_callers_never_skip_a_slot() {
        let pool = Arc::new(ClientPool::new(vec![0u8, 1, 2, 3]).expect("pool"));
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || (0..100).map(|_| pool.acquire()).collect::<Vec<_>>())
            })
            .collect();
        let mut counts: HashMap<u8, usize> = HashMap::new();
        for t in threads {
            for c in t.join().expect("thread") {
                *counts.entry(c).or_default() += 1;
            }
        }
        assert_eq!(counts.len(), 4);
        assert!(counts.values().all(|&c| c == 200), "uneven rotation: {:?}", counts);
    }
}
