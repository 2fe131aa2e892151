//! kpart partition layer: a unified list/watch view over horizontally split API servers,
//! plus round-robin pooling of homogeneous clients.

#![forbid(unsafe_code)]

pub mod client;
pub mod config;
pub mod list;
pub mod pool;
pub mod set;
pub mod watch;

mod util;

pub use client::PartitionedClient;
pub use config::WatchConfig;
pub use list::{list_partitioned, merge_listings};
pub use pool::ClientPool;
pub use set::PartitionSet;
pub use watch::{watch_partitioned, AggregatedWatch, WatchItem};
