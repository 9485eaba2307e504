//! State Management Module
//!
//! Cluster membership: the local node, the registered peers, and which
//! node is master.

mod topology;

pub use topology::{Health, Registration, Topology};
