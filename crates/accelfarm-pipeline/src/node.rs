//! Accelerator nodes: the per-slot executor that turns a bound task into
//! backend primitive calls.

use std::sync::Arc;

use tracing::{trace, warn};

use accelfarm_core::{
    DeviceBackend, OffloadTask, OutputStaging, Readback, Result, Retention, Staging,
};
use accelfarm_device::DeviceAllocator;

/// A completed task paired with how its execution went.
///
/// The task comes back whole either way, so callers keep ownership of its
/// payload buffers even after a failure.
#[derive(Debug)]
pub struct TaskOutcome<T> {
    pub task: T,
    pub result: Result<()>,
}

/// One execution slot against a backend.
///
/// A node runs one task at a time through the fixed cycle: bind, stage
/// inputs, stage outputs, invoke, copy back, release. The first failing
/// step poisons the task; later steps are skipped and the error travels
/// with the task to the collector. Allocations the failed task had already
/// staged stay recorded in the shared allocator until teardown drains it.
pub struct AcceleratorNode<B> {
    id: usize,
    backend: Arc<B>,
    allocator: Arc<DeviceAllocator>,
}

impl<B: DeviceBackend> AcceleratorNode<B> {
    pub fn new(id: usize, backend: Arc<B>, allocator: Arc<DeviceAllocator>) -> Self {
        AcceleratorNode {
            id,
            backend,
            allocator,
        }
    }

    /// Run one task through the full cycle.
    ///
    /// The task is held by value for the whole cycle, which is what keeps
    /// the host addresses its descriptor captured stable until the last
    /// copy-back has landed.
    pub fn process<T: OffloadTask>(&self, mut task: T) -> TaskOutcome<T> {
        let result = self.execute(&mut task);
        match &result {
            Ok(()) => trace!(node = self.id, "task complete"),
            Err(error) => warn!(node = self.id, %error, "task failed"),
        }
        TaskOutcome { task, result }
    }

    fn execute<T: OffloadTask>(&self, task: &mut T) -> Result<()> {
        let plan = task.bind()?;
        plan.validate()?;
        trace!(
            node = self.id,
            kernel = %plan.kernel(),
            inputs = plan.inputs().len(),
            outputs = plan.outputs().len(),
            "task bound"
        );

        let mut input_handles = Vec::with_capacity(plan.inputs().len());
        for directive in plan.inputs() {
            let span = directive.span();
            let handle = match directive.staging() {
                Staging::Upload => {
                    let handle = self.backend.alloc(span.len())?;
                    // Safety: the span was bound from the task's own live
                    // storage, and the task is pinned in this frame.
                    let bytes = unsafe { span.bytes() };
                    self.backend.copy_in(handle, bytes)?;
                    self.allocator.register(span.id(), handle);
                    handle
                }
                Staging::UploadInto => {
                    let handle = self.allocator.resolve(span.id())?;
                    // Safety: as above.
                    let bytes = unsafe { span.bytes() };
                    self.backend.copy_in(handle, bytes)?;
                    handle
                }
                Staging::Reuse => self.allocator.resolve(span.id())?,
            };
            input_handles.push(handle);
        }

        let mut output_handles = Vec::with_capacity(plan.outputs().len());
        for directive in plan.outputs() {
            let span = directive.span();
            let handle = match directive.staging() {
                OutputStaging::Fresh => {
                    let handle = self.backend.alloc(span.len())?;
                    self.allocator.register(span.id(), handle);
                    handle
                }
                OutputStaging::Reuse => self.allocator.resolve(span.id())?,
            };
            output_handles.push(handle);
        }

        self.backend
            .invoke(plan.kernel(), &input_handles, &output_handles)?;

        for (directive, handle) in plan.outputs().iter().zip(&output_handles) {
            if directive.readback() == Readback::CopyBack {
                // Safety: the span was bound from a mutable borrow of the
                // task's own storage, and nothing else borrows it here.
                let bytes = unsafe { directive.span().bytes_mut() };
                self.backend.copy_out(*handle, bytes)?;
            }
        }

        // Release pass, inputs then outputs. The identity may already be
        // gone when two directives of one task release the same region;
        // the allocator logs that and we skip the free.
        let releases = plan
            .inputs()
            .iter()
            .map(|d| (d.span().id(), d.retention()))
            .chain(plan.outputs().iter().map(|d| (d.span().id(), d.retention())));
        for (id, retention) in releases {
            if retention == Retention::Release {
                if let Some(handle) = self.allocator.release(id) {
                    self.backend.free(handle)?;
                }
            }
        }

        Ok(())
    }
}

/// Runs a single task to completion on a single node: the sequential
/// stage of a two-stage pipeline.
pub struct OneShot<B> {
    node: AcceleratorNode<B>,
}

impl<B: DeviceBackend> OneShot<B> {
    pub fn new(backend: Arc<B>, allocator: Arc<DeviceAllocator>) -> Self {
        OneShot {
            node: AcceleratorNode::new(0, backend, allocator),
        }
    }

    /// Execute the task, blocking until its whole cycle is done. On
    /// success the task is handed back so copied-back results can be read.
    pub fn run_and_wait_end<T: OffloadTask>(&self, task: T) -> Result<T> {
        let TaskOutcome { task, result } = self.node.process(task);
        result.map(|()| task)
    }
}
