//! Replication layer: master fan-out, slave runtime, process supervision.
//!
//! - [`master`]: TCP acceptor + commit-order record fan-out to slaves
//! - [`slave`]: the slave-side connection loop and record application
//! - [`supervisor`]: slave process lifecycle and zombie cleanup

pub mod master;
pub mod slave;
pub mod supervisor;

pub use master::{ReplicationMaster, SlaveStatus, SlaveView};
pub use slave::{apply_record, ReplicationSlave};
pub use supervisor::{SlaveProcessInfo, SlaveSupervisor};
