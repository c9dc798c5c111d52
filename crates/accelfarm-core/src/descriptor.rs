//! Transfer descriptors: the per-task plan for moving buffers between
//! host and device around one kernel invocation.
//!
//! A task binds each of its buffers to a directive built from closed
//! per-axis enums (staging, readback, retention) instead of free-form flag
//! bits, so
//! contradictory combinations cannot be expressed. The descriptor never
//! owns payload memory; it captures type-erased views of buffers the task
//! itself keeps alive.

use bytemuck::Pod;

use crate::error::{FarmError, Result};

/// Identity of a host buffer: its starting address.
///
/// Two spans refer to the same device allocation exactly when they start at
/// the same host address. A retained allocation is keyed by this identity,
/// so the host buffer must not be moved or freed while a later task still
/// intends to reuse it. A reallocation that lands at the same address would
/// silently alias the old allocation; keeping identity-carrying buffers
/// alive across the retain window is the caller's contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub usize);

impl std::fmt::Display for BufferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Type-erased view of a host memory region: start address plus byte length.
///
/// Stored as plain integers so descriptors stay `Send` and never borrow the
/// task they were built from. The region must remain valid and un-moved
/// until the task that captured it has been collected; tasks that keep
/// their payloads in heap-backed storage (`Vec`, `Arc<Vec<_>>`) and bind
/// spans of their own fields satisfy this by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostSpan {
    addr: usize,
    len: usize,
}

impl HostSpan {
    /// Capture a read-only slice.
    pub fn of_slice<T: Pod>(data: &[T]) -> Self {
        HostSpan {
            addr: data.as_ptr() as usize,
            len: std::mem::size_of_val(data),
        }
    }

    /// Capture a mutable slice. Required for spans that receive copy-back.
    pub fn of_mut_slice<T: Pod>(data: &mut [T]) -> Self {
        HostSpan {
            addr: data.as_mut_ptr() as usize,
            len: std::mem::size_of_val(data),
        }
    }

    /// Capture a single value as a one-element region.
    pub fn of_value<T: Pod>(value: &T) -> Self {
        Self::of_slice(std::slice::from_ref(value))
    }

    /// Capture a single mutable value.
    pub fn of_mut_value<T: Pod>(value: &mut T) -> Self {
        Self::of_mut_slice(std::slice::from_mut(value))
    }

    /// Identity of this region for allocator lookups.
    pub fn id(&self) -> BufferId {
        BufferId(self.addr)
    }

    pub fn addr(&self) -> usize {
        self.addr
    }

    /// Region length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Reconstruct the captured region as a byte slice.
    ///
    /// # Safety
    ///
    /// The region this span was captured from must still be live, un-moved,
    /// and not mutably borrowed for the chosen lifetime `'a`.
    pub unsafe fn bytes<'a>(&self) -> &'a [u8] {
        std::slice::from_raw_parts(self.addr as *const u8, self.len)
    }

    /// Reconstruct the captured region as a mutable byte slice.
    ///
    /// # Safety
    ///
    /// The region must still be live and un-moved, it must have been
    /// captured from a mutable borrow, and no other reference to it may be
    /// live for the chosen lifetime `'a`.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn bytes_mut<'a>(&self) -> &'a mut [u8] {
        std::slice::from_raw_parts_mut(self.addr as *mut u8, self.len)
    }
}

/// How an input's device-side storage is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staging {
    /// Allocate fresh device memory and copy the host contents in.
    Upload,
    /// Copy the host contents into an allocation retained by an earlier task.
    UploadInto,
    /// Use a retained allocation as-is, with no host-to-device copy.
    Reuse,
}

/// How an output's device-side storage is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStaging {
    /// Allocate fresh device memory for the kernel to write.
    Fresh,
    /// Write into an allocation retained by an earlier task.
    Reuse,
}

/// Whether an output's device contents are copied back to its host span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readback {
    CopyBack,
    /// Leave the result device-resident; the host span supplies identity
    /// and size only and is never written.
    DeviceOnly,
}

/// Whether a device allocation outlives the task that staged it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// Free the allocation once the task, including any copy-back, is done.
    Release,
    /// Keep the allocation live so a later task can reuse it.
    Retain,
}

/// Directive for one input buffer of a kernel invocation.
#[derive(Debug, Clone, Copy)]
pub struct InputDescriptor {
    span: HostSpan,
    staging: Staging,
    retention: Retention,
}

impl InputDescriptor {
    /// Upload a slice into fresh device memory, freed when the task ends.
    pub fn slice<T: Pod>(data: &[T]) -> Self {
        InputDescriptor {
            span: HostSpan::of_slice(data),
            staging: Staging::Upload,
            retention: Retention::Release,
        }
    }

    /// Upload a single scalar, freed when the task ends.
    pub fn value<T: Pod>(value: &T) -> Self {
        InputDescriptor {
            span: HostSpan::of_value(value),
            staging: Staging::Upload,
            retention: Retention::Release,
        }
    }

    /// Read a retained device allocation in place, skipping the upload.
    ///
    /// The allocation stays retained by default; chain [`release`] to free
    /// it once this task completes.
    ///
    /// [`release`]: InputDescriptor::release
    pub fn reuse<T: Pod>(data: &[T]) -> Self {
        InputDescriptor {
            span: HostSpan::of_slice(data),
            staging: Staging::Reuse,
            retention: Retention::Retain,
        }
    }

    /// Refresh a retained allocation with the current host contents.
    pub fn upload_into<T: Pod>(data: &[T]) -> Self {
        InputDescriptor {
            span: HostSpan::of_slice(data),
            staging: Staging::UploadInto,
            retention: Retention::Retain,
        }
    }

    /// Keep the device allocation alive after this task.
    pub fn retain(mut self) -> Self {
        self.retention = Retention::Retain;
        self
    }

    /// Free the device allocation when this task ends.
    pub fn release(mut self) -> Self {
        self.retention = Retention::Release;
        self
    }

    pub fn span(&self) -> HostSpan {
        self.span
    }

    pub fn staging(&self) -> Staging {
        self.staging
    }

    pub fn retention(&self) -> Retention {
        self.retention
    }
}

/// Directive for one output buffer of a kernel invocation.
#[derive(Debug, Clone, Copy)]
pub struct OutputDescriptor {
    span: HostSpan,
    staging: OutputStaging,
    readback: Readback,
    retention: Retention,
}

impl OutputDescriptor {
    /// Fresh device output copied back into `data`, then freed.
    pub fn slice<T: Pod>(data: &mut [T]) -> Self {
        OutputDescriptor {
            span: HostSpan::of_mut_slice(data),
            staging: OutputStaging::Fresh,
            readback: Readback::CopyBack,
            retention: Retention::Release,
        }
    }

    /// Fresh single-scalar output copied back, then freed.
    pub fn value<T: Pod>(value: &mut T) -> Self {
        OutputDescriptor {
            span: HostSpan::of_mut_value(value),
            staging: OutputStaging::Fresh,
            readback: Readback::CopyBack,
            retention: Retention::Release,
        }
    }

    /// Fresh device-resident output, retained for later tasks to reuse.
    ///
    /// Nothing is copied back, so a shared (read-only) borrow is enough;
    /// the span only fixes identity and size.
    pub fn device_only<T: Pod>(data: &[T]) -> Self {
        OutputDescriptor {
            span: HostSpan::of_slice(data),
            staging: OutputStaging::Fresh,
            readback: Readback::DeviceOnly,
            retention: Retention::Retain,
        }
    }

    /// Write into a retained allocation and copy the result back.
    pub fn reuse<T: Pod>(data: &mut [T]) -> Self {
        OutputDescriptor {
            span: HostSpan::of_mut_slice(data),
            staging: OutputStaging::Reuse,
            readback: Readback::CopyBack,
            retention: Retention::Retain,
        }
    }

    /// Keep the device allocation alive after this task.
    pub fn retain(mut self) -> Self {
        self.retention = Retention::Retain;
        self
    }

    /// Free the device allocation once the task, and any copy-back, is done.
    pub fn release(mut self) -> Self {
        self.retention = Retention::Release;
        self
    }

    pub fn span(&self) -> HostSpan {
        self.span
    }

    pub fn staging(&self) -> OutputStaging {
        self.staging
    }

    pub fn readback(&self) -> Readback {
        self.readback
    }

    pub fn retention(&self) -> Retention {
        self.retention
    }
}

/// Selects which accelerator routine a task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelId(pub u32);

impl std::fmt::Display for KernelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "kernel#{}", self.0)
    }
}

/// Complete transfer plan for one kernel invocation.
///
/// Inputs and outputs are passed to the kernel in binding order, so the
/// order of `input`/`output` calls is the kernel's argument order.
#[derive(Debug, Clone)]
pub struct TaskDescriptor {
    kernel: KernelId,
    inputs: Vec<InputDescriptor>,
    outputs: Vec<OutputDescriptor>,
}

impl TaskDescriptor {
    pub fn new(kernel: KernelId) -> Self {
        TaskDescriptor {
            kernel,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Append the next input argument.
    pub fn input(mut self, descriptor: InputDescriptor) -> Self {
        self.inputs.push(descriptor);
        self
    }

    /// Append the next output argument.
    pub fn output(mut self, descriptor: OutputDescriptor) -> Self {
        self.outputs.push(descriptor);
        self
    }

    pub fn kernel(&self) -> KernelId {
        self.kernel
    }

    pub fn inputs(&self) -> &[InputDescriptor] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[OutputDescriptor] {
        &self.outputs
    }

    /// Check the plan before any device work starts.
    ///
    /// Rejects empty regions (there is nothing to stage or size an
    /// allocation from) and plans with no outputs (the kernel would have
    /// nowhere to write).
    pub fn validate(&self) -> Result<()> {
        if self.outputs.is_empty() {
            return Err(FarmError::InvalidTaskBinding(format!(
                "{} bound with no outputs",
                self.kernel
            )));
        }
        for (pos, input) in self.inputs.iter().enumerate() {
            if input.span().is_empty() {
                return Err(FarmError::InvalidTaskBinding(format!(
                    "input {pos} of {} is a zero-length region",
                    self.kernel
                )));
            }
        }
        for (pos, output) in self.outputs.iter().enumerate() {
            if output.span().is_empty() {
                return Err(FarmError::InvalidTaskBinding(format!(
                    "output {pos} of {} is a zero-length region",
                    self.kernel
                )));
            }
        }
        Ok(())
    }
}
