use crate::descriptor::{KernelId, TaskDescriptor};
use crate::error::Result;

/// Opaque token for one device-side allocation.
///
/// The id is assigned by the backend; `len` is the allocation's byte
/// length. Plain integers keep the token `Copy` and backend-agnostic, so
/// it can sit in shared tables and cross thread boundaries freely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceHandle {
    pub id: u64,
    pub len: usize,
}

/// Low-level accelerator interface the offload runtime drives.
///
/// One implementation per physical backend. Every method must be safe to
/// call from any worker thread, and each primitive reports failure through
/// [`FarmError::DeviceTransferFailed`] tagged with its own stage.
///
/// [`FarmError::DeviceTransferFailed`]: crate::error::FarmError::DeviceTransferFailed
pub trait DeviceBackend: Send + Sync + 'static {
    /// Allocate `len` bytes of device memory.
    fn alloc(&self, len: usize) -> Result<DeviceHandle>;

    /// Copy host bytes into a device allocation.
    fn copy_in(&self, dst: DeviceHandle, bytes: &[u8]) -> Result<()>;

    /// Copy a device allocation back into host memory.
    fn copy_out(&self, src: DeviceHandle, bytes: &mut [u8]) -> Result<()>;

    /// Free a device allocation.
    fn free(&self, handle: DeviceHandle) -> Result<()>;

    /// Run a kernel over already-staged device buffers, in argument order.
    fn invoke(
        &self,
        kernel: KernelId,
        inputs: &[DeviceHandle],
        outputs: &[DeviceHandle],
    ) -> Result<()>;
}

/// A unit of work that can be offloaded to an accelerator node.
///
/// `bind` turns the task's own fields into a transfer plan. The runtime
/// calls it exactly once, on the node that will execute the task,
/// immediately before staging begins; the spans it captures must point
/// into storage whose addresses stay stable while the task sits in the
/// node's slot. Fields of the task itself and heap-backed payloads
/// (`Vec`, `Arc<Vec<_>>`) qualify, because the runtime pins the task for
/// the whole bind/stage/execute/writeback cycle.
pub trait OffloadTask: Send + 'static {
    fn bind(&mut self) -> Result<TaskDescriptor>;
}
