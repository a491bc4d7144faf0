//! Cluster layer: key routing across the shard set.

pub mod router;

pub use router::Router;
