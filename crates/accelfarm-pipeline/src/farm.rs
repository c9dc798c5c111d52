//! The farm: an emitter feeding a pool of accelerator nodes, with a
//! collector receiving completed tasks as they finish.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam_channel::bounded;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use accelfarm_core::{DeviceBackend, FarmError, OffloadTask, Result};
use accelfarm_device::DeviceAllocator;

use crate::config::FarmConfig;
use crate::node::{AcceleratorNode, TaskOutcome};

/// Produces the task stream for a farm run, pull style: the scheduler
/// asks for the next task whenever it is ready to queue one.
pub trait Emitter<T>: Send {
    /// The next task, or `None` once the stream is exhausted.
    fn next_task(&mut self) -> Option<T>;
}

/// Collector verdict after each completed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FarmControl {
    /// Keep pulling tasks from the emitter.
    Continue,
    /// Stop pulling new tasks. Tasks already in flight still complete and
    /// reach the collector; the run then winds down normally.
    Stop,
}

/// Receives completed tasks in completion order, which under a multi-node
/// farm is generally not emission order.
pub trait Collector<T> {
    fn collect(&mut self, outcome: TaskOutcome<T>) -> FarmControl;
}

/// Counters for one farm run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FarmStats {
    /// Tasks handed to the node pool.
    pub emitted: usize,
    /// Tasks that reached the collector.
    pub collected: usize,
    /// Collected tasks whose execution failed.
    pub failed: usize,
    pub elapsed_ms: f32,
}

/// An emitter, a pool of accelerator nodes, and a collector, wired with
/// bounded queues.
///
/// Every node shares the farm's allocator, so retained allocations staged
/// by any task (or by an earlier pipeline stage using the same allocator)
/// are visible to every other task.
pub struct Farm<B> {
    backend: Arc<B>,
    allocator: Arc<DeviceAllocator>,
    config: FarmConfig,
}

impl<B: DeviceBackend> Farm<B> {
    pub fn new(backend: Arc<B>, allocator: Arc<DeviceAllocator>, config: FarmConfig) -> Self {
        Farm {
            backend,
            allocator,
            config,
        }
    }

    pub fn allocator(&self) -> &Arc<DeviceAllocator> {
        &self.allocator
    }

    /// Run the farm until the emitter is exhausted (or stopped) and every
    /// in-flight task has been collected.
    ///
    /// The collector runs on the calling thread. Emitter and nodes run on
    /// scoped threads, so all of them have joined by the time this
    /// returns. Task failures are not fatal to the run; they travel to
    /// the collector inside [`TaskOutcome`] and are tallied in
    /// [`FarmStats::failed`]. A panic in user code (emitter, a task's
    /// bind, a kernel, the collector) ends the run with
    /// [`FarmError::Scheduling`] after the surviving threads wind down.
    pub fn run_and_wait_end<T, E, C>(&self, mut emitter: E, collector: &mut C) -> Result<FarmStats>
    where
        T: OffloadTask,
        E: Emitter<T>,
        C: Collector<T>,
    {
        if self.config.workers == 0 {
            return Err(FarmError::Scheduling(
                "a farm needs at least one worker".into(),
            ));
        }
        let started = Instant::now();
        debug!(
            workers = self.config.workers,
            queue_capacity = self.config.queue_capacity,
            "farm starting"
        );

        let (task_tx, task_rx) = bounded::<T>(self.config.queue_capacity);
        let (outcome_tx, outcome_rx) = bounded::<TaskOutcome<T>>(self.config.queue_capacity);
        let stop = AtomicBool::new(false);
        let emitted = AtomicUsize::new(0);
        let panics: Mutex<Vec<String>> = Mutex::new(Vec::new());

        let mut stats = FarmStats::default();

        thread::scope(|scope| {
            {
                let stop = &stop;
                let emitted = &emitted;
                let panics = &panics;
                scope.spawn(move || {
                    let run = catch_unwind(AssertUnwindSafe(|| {
                        while !stop.load(Ordering::Relaxed) {
                            let Some(task) = emitter.next_task() else { break };
                            if task_tx.send(task).is_err() {
                                // Every node is gone; nothing left to feed.
                                break;
                            }
                            emitted.fetch_add(1, Ordering::Relaxed);
                        }
                    }));
                    if let Err(payload) = run {
                        panics
                            .lock()
                            .push(format!("emitter panicked: {}", panic_message(&payload)));
                    }
                });
            }

            for worker in 0..self.config.workers {
                let task_rx = task_rx.clone();
                let outcome_tx = outcome_tx.clone();
                let node = AcceleratorNode::new(
                    worker,
                    Arc::clone(&self.backend),
                    Arc::clone(&self.allocator),
                );
                let panics = &panics;
                scope.spawn(move || {
                    let run = catch_unwind(AssertUnwindSafe(|| {
                        for task in task_rx.iter() {
                            let outcome = node.process(task);
                            if outcome_tx.send(outcome).is_err() {
                                break;
                            }
                        }
                    }));
                    if let Err(payload) = run {
                        panics.lock().push(format!(
                            "worker {worker} panicked: {}",
                            panic_message(&payload)
                        ));
                    }
                });
            }
            // Only the spawned clones may keep the channels open: the task
            // channel closes when the emitter finishes, the outcome channel
            // when the last node exits.
            drop(task_rx);
            drop(outcome_tx);

            let mut collector_poisoned = false;
            for outcome in outcome_rx.iter() {
                stats.collected += 1;
                if outcome.result.is_err() {
                    stats.failed += 1;
                }
                if collector_poisoned {
                    // Keep draining so no node ever blocks on a full queue.
                    continue;
                }
                match catch_unwind(AssertUnwindSafe(|| collector.collect(outcome))) {
                    Ok(FarmControl::Continue) => {}
                    Ok(FarmControl::Stop) => {
                        debug!("collector requested stop");
                        stop.store(true, Ordering::Relaxed);
                    }
                    Err(payload) => {
                        panics
                            .lock()
                            .push(format!("collector panicked: {}", panic_message(&payload)));
                        collector_poisoned = true;
                        stop.store(true, Ordering::Relaxed);
                    }
                }
            }
        });

        stats.emitted = emitted.load(Ordering::Relaxed);
        stats.elapsed_ms = started.elapsed().as_secs_f32() * 1000.0;

        let panics = panics.into_inner();
        if !panics.is_empty() {
            return Err(FarmError::Scheduling(panics.join("; ")));
        }

        info!(
            emitted = stats.emitted,
            collected = stats.collected,
            failed = stats.failed,
            elapsed_ms = stats.elapsed_ms,
            "farm run complete"
        );
        Ok(stats)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}
