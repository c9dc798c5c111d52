//! The two-stage pipeline driver: a one-shot preparation task, then a
//! farm over a task stream, both against one shared allocator.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use accelfarm_core::{DeviceBackend, OffloadTask, Result};
use accelfarm_device::DeviceAllocator;

use crate::config::FarmConfig;
use crate::farm::{Collector, Emitter, Farm, FarmStats};
use crate::node::OneShot;

/// Timing and counters for one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub oneshot_ms: f32,
    pub farm: FarmStats,
    pub total_ms: f32,
}

/// Owns the allocator both stages share.
///
/// Whatever the first stage retains on the device (uploaded lookup data,
/// device-resident intermediates) resolves for every farm task, because
/// both stages stage and release through the same [`DeviceAllocator`].
pub struct Pipeline<B> {
    backend: Arc<B>,
    allocator: Arc<DeviceAllocator>,
    config: FarmConfig,
}

impl<B: DeviceBackend> Pipeline<B> {
    pub fn new(backend: Arc<B>, config: FarmConfig) -> Self {
        Pipeline {
            backend,
            allocator: Arc::new(DeviceAllocator::new()),
            config,
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn allocator(&self) -> &Arc<DeviceAllocator> {
        &self.allocator
    }

    /// Run both stages to completion, then free whatever stayed retained.
    ///
    /// The first stage runs `first` alone and must finish before any farm
    /// task starts; an error there aborts the run before the farm spins
    /// up. The completed first-stage task is handed back alongside the
    /// report so its copied-back outputs stay reachable.
    pub fn run_and_wait_end<F, T, E, C>(
        &self,
        first: F,
        emitter: E,
        collector: &mut C,
    ) -> Result<(F, PipelineReport)>
    where
        F: OffloadTask,
        T: OffloadTask,
        E: Emitter<T>,
        C: Collector<T>,
    {
        let started = Instant::now();

        info!("pipeline: one-shot stage");
        let oneshot = OneShot::new(Arc::clone(&self.backend), Arc::clone(&self.allocator));
        let first = oneshot.run_and_wait_end(first)?;
        let oneshot_ms = started.elapsed().as_secs_f32() * 1000.0;
        debug!(oneshot_ms, retained = self.allocator.live(), "one-shot stage done");

        info!("pipeline: farm stage");
        let farm = Farm::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.allocator),
            self.config.clone(),
        );
        let stats = farm.run_and_wait_end(emitter, collector)?;

        let freed = self.drain()?;
        if freed > 0 {
            debug!(freed, "teardown freed retained allocations");
        }

        let report = PipelineReport {
            oneshot_ms,
            farm: stats,
            total_ms: started.elapsed().as_secs_f32() * 1000.0,
        };
        Ok((first, report))
    }

    /// Free every allocation still recorded in the shared allocator.
    ///
    /// Called automatically at the end of a successful run; exposed for
    /// callers that drive the stages themselves or need to clean up after
    /// a failed run.
    pub fn drain(&self) -> Result<usize> {
        let handles = self.allocator.drain();
        let count = handles.len();
        for handle in handles {
            self.backend.free(handle)?;
        }
        Ok(count)
    }
}
