//! In-process simulation of a cluster
//!
//! Lets many agents coordinate inside one process: `SimCluster` stands in
//! for the metadata store and lock service, `SimSlicer` for the oplog
//! slicer. Both back the test suite and the `pitrd sim` demo.

pub mod backend;
pub mod slicer;

pub use backend::SimCluster;
pub use slicer::{CatchupKind, SimSlicer, SimSlicerFactory};
