//! Offload scheduling for accelfarm.
//!
//! An [`AcceleratorNode`] executes one bound task at a time against a
//! [`DeviceBackend`]. A [`Farm`] runs many tasks across a pool of nodes,
//! fed by an [`Emitter`] and drained by a [`Collector`]. A [`Pipeline`]
//! chains a one-shot preparation task in front of a farm, with both
//! stages sharing one allocation table so device-resident intermediates
//! carry across.
//!
//! [`DeviceBackend`]: accelfarm_core::DeviceBackend

pub mod config;
pub mod farm;
pub mod node;
pub mod pipeline;

pub use config::FarmConfig;
pub use farm::{Collector, Emitter, Farm, FarmControl, FarmStats};
pub use node::{AcceleratorNode, OneShot, TaskOutcome};
pub use pipeline::{Pipeline, PipelineReport};
