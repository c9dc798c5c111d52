use serde::{Deserialize, Serialize};

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Runtime shape of a farm stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FarmConfig {
    /// Number of accelerator nodes, one worker thread each.
    pub workers: usize,
    /// Capacity of each channel edge (emitter to pool, pool to collector).
    /// Bounds how far the emitter can run ahead of the slowest node; once
    /// both edges are full the emitter blocks instead of buffering more.
    pub queue_capacity: usize,
}

impl Default for FarmConfig {
    fn default() -> Self {
        FarmConfig {
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl FarmConfig {
    /// One node, depth-one queues. Tasks complete strictly in emission
    /// order, which some validation flows rely on.
    pub fn single_node() -> Self {
        FarmConfig {
            workers: 1,
            queue_capacity: 1,
        }
    }

    /// Sized for a host with many cores feeding a fast device.
    pub fn wide() -> Self {
        FarmConfig {
            workers: 8,
            queue_capacity: 256,
        }
    }
}
