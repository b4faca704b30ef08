//! Process lifecycle for the replication daemon.

pub mod shutdown;
