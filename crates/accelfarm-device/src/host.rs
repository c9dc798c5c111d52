//! In-process reference backend.
//!
//! `HostDevice` emulates an accelerator with plain heap memory: every
//! allocation is a byte slab in a locked table, and kernels are registered
//! Rust closures keyed by [`KernelId`]. It exists so the full offload
//! path, staging, invocation, copy-back, release, runs and can be tested
//! on any machine, and it doubles as the model for real backends: the
//! same five primitives against actual device memory.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use bytemuck::Pod;
use parking_lot::Mutex;
use tracing::{debug, trace};

use accelfarm_core::{DeviceBackend, DeviceHandle, FarmError, KernelId, Result, TransferStage};

/// A registered kernel body.
///
/// Receives the input slabs (copies, so a kernel may alias an input and an
/// output buffer) and the output slabs to fill, both in the task's binding
/// order. A kernel reports failure as a message; the backend wraps it into
/// the kernel transfer stage.
pub type KernelFn =
    Box<dyn Fn(&[Vec<u8>], &mut [Vec<u8>]) -> std::result::Result<(), String> + Send + Sync>;

/// Reference backend backed by host heap memory.
pub struct HostDevice {
    slabs: Mutex<HashMap<u64, Vec<u8>>>,
    kernels: HashMap<KernelId, KernelFn>,
    next_id: AtomicU64,
    allocated_bytes: AtomicUsize,
}

impl HostDevice {
    pub fn new() -> Self {
        HostDevice {
            slabs: Mutex::new(HashMap::new()),
            kernels: HashMap::new(),
            next_id: AtomicU64::new(1),
            allocated_bytes: AtomicUsize::new(0),
        }
    }

    /// Register a kernel body under an id. Registration happens before the
    /// device is shared with any node, which is why it takes `&mut self`.
    pub fn register_kernel<F>(&mut self, id: KernelId, kernel: F)
    where
        F: Fn(&[Vec<u8>], &mut [Vec<u8>]) -> std::result::Result<(), String>
            + Send
            + Sync
            + 'static,
    {
        debug!(%id, "registering kernel");
        self.kernels.insert(id, Box::new(kernel));
    }

    /// Bytes currently held by live allocations.
    pub fn allocated_bytes(&self) -> usize {
        self.allocated_bytes.load(Ordering::Relaxed)
    }

    /// Number of live allocations.
    pub fn live_allocations(&self) -> usize {
        self.slabs.lock().len()
    }
}

impl Default for HostDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceBackend for HostDevice {
    fn alloc(&self, len: usize) -> Result<DeviceHandle> {
        if len == 0 {
            return Err(FarmError::device(
                TransferStage::Allocate,
                "zero-length allocation",
            ));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.slabs.lock().insert(id, vec![0u8; len]);
        self.allocated_bytes.fetch_add(len, Ordering::Relaxed);
        trace!(handle = id, len, "allocated slab");
        Ok(DeviceHandle { id, len })
    }

    fn copy_in(&self, dst: DeviceHandle, bytes: &[u8]) -> Result<()> {
        let mut slabs = self.slabs.lock();
        let slab = slabs.get_mut(&dst.id).ok_or_else(|| {
            FarmError::device(
                TransferStage::CopyIn,
                format!("unknown device handle {}", dst.id),
            )
        })?;
        if slab.len() != bytes.len() {
            return Err(FarmError::device(
                TransferStage::CopyIn,
                format!(
                    "host region is {} bytes but allocation {} holds {}",
                    bytes.len(),
                    dst.id,
                    slab.len()
                ),
            ));
        }
        slab.copy_from_slice(bytes);
        trace!(handle = dst.id, len = bytes.len(), "copied in");
        Ok(())
    }

    fn copy_out(&self, src: DeviceHandle, bytes: &mut [u8]) -> Result<()> {
        let slabs = self.slabs.lock();
        let slab = slabs.get(&src.id).ok_or_else(|| {
            FarmError::device(
                TransferStage::CopyBack,
                format!("unknown device handle {}", src.id),
            )
        })?;
        if slab.len() != bytes.len() {
            return Err(FarmError::device(
                TransferStage::CopyBack,
                format!(
                    "host region is {} bytes but allocation {} holds {}",
                    bytes.len(),
                    src.id,
                    slab.len()
                ),
            ));
        }
        bytes.copy_from_slice(slab);
        trace!(handle = src.id, len = bytes.len(), "copied out");
        Ok(())
    }

    fn free(&self, handle: DeviceHandle) -> Result<()> {
        let removed = self.slabs.lock().remove(&handle.id);
        match removed {
            Some(slab) => {
                self.allocated_bytes.fetch_sub(slab.len(), Ordering::Relaxed);
                trace!(handle = handle.id, len = slab.len(), "freed slab");
                Ok(())
            }
            None => Err(FarmError::device(
                TransferStage::Release,
                format!("unknown device handle {}", handle.id),
            )),
        }
    }

    fn invoke(
        &self,
        kernel: KernelId,
        inputs: &[DeviceHandle],
        outputs: &[DeviceHandle],
    ) -> Result<()> {
        let body = self.kernels.get(&kernel).ok_or_else(|| {
            FarmError::device(TransferStage::Kernel, format!("no such {kernel}"))
        })?;

        // Inputs are cloned and outputs temporarily taken out of the table,
        // so a kernel can read and write the same allocation without the
        // two views aliasing.
        let mut slabs = self.slabs.lock();
        let mut input_slabs = Vec::with_capacity(inputs.len());
        for handle in inputs {
            let slab = slabs.get(&handle.id).ok_or_else(|| {
                FarmError::device(
                    TransferStage::Kernel,
                    format!("input handle {} is not live", handle.id),
                )
            })?;
            input_slabs.push(slab.clone());
        }
        let mut output_slabs: Vec<Vec<u8>> = Vec::with_capacity(outputs.len());
        let mut take_err = None;
        for handle in outputs {
            match slabs.remove(&handle.id) {
                Some(slab) => output_slabs.push(slab),
                None => {
                    take_err = Some(FarmError::device(
                        TransferStage::Kernel,
                        format!("output handle {} is not live", handle.id),
                    ));
                    break;
                }
            }
        }
        if let Some(err) = take_err {
            // Put back whatever was already taken before bailing.
            for (slab, handle) in output_slabs.drain(..).zip(outputs) {
                slabs.insert(handle.id, slab);
            }
            return Err(err);
        }
        drop(slabs);

        trace!(%kernel, inputs = inputs.len(), outputs = outputs.len(), "invoking");
        let run = body(&input_slabs, &mut output_slabs);

        let mut slabs = self.slabs.lock();
        for (handle, slab) in outputs.iter().zip(output_slabs) {
            slabs.insert(handle.id, slab);
        }
        drop(slabs);

        run.map_err(|reason| FarmError::device(TransferStage::Kernel, reason))
    }
}

/// Decode one scalar from a slab.
///
/// Slabs carry no alignment guarantee, so the value is read unaligned
/// rather than cast in place.
pub fn scalar_from_slab<T: Pod>(slab: &[u8]) -> std::result::Result<T, String> {
    let want = std::mem::size_of::<T>();
    if slab.len() != want {
        return Err(format!(
            "scalar argument is {} bytes, expected {want}",
            slab.len()
        ));
    }
    Ok(bytemuck::pod_read_unaligned(slab))
}

/// Decode a whole slab as a vector of `T`, copying element by element so
/// the slab's alignment does not matter.
pub fn vec_from_slab<T: Pod>(slab: &[u8]) -> std::result::Result<Vec<T>, String> {
    let elem = std::mem::size_of::<T>();
    if elem == 0 || slab.len() % elem != 0 {
        return Err(format!(
            "slab of {} bytes is not a whole number of {}-byte elements",
            slab.len(),
            elem
        ));
    }
    Ok(slab
        .chunks_exact(elem)
        .map(bytemuck::pod_read_unaligned)
        .collect())
}

/// Encode values into an output slab. The slab length must match exactly;
/// kernels write whole buffers, never prefixes.
pub fn write_slab<T: Pod>(slab: &mut [u8], values: &[T]) -> std::result::Result<(), String> {
    let src: &[u8] = bytemuck::cast_slice(values);
    if slab.len() != src.len() {
        return Err(format!(
            "kernel produced {} bytes for a {}-byte output",
            src.len(),
            slab.len()
        ));
    }
    slab.copy_from_slice(src);
    Ok(())
}
