//! Core types for the accelfarm task-offload runtime.
//!
//! This crate defines the descriptor language tasks use to describe their
//! buffer traffic, the backend trait an accelerator must implement, and
//! the runtime's error taxonomy. It contains no execution machinery; the
//! scheduler and reference backend live in the `accelfarm-pipeline` and
//! `accelfarm-device` crates.

pub mod descriptor;
pub mod error;
pub mod traits;

pub use descriptor::{
    BufferId, HostSpan, InputDescriptor, KernelId, OutputDescriptor, OutputStaging, Readback,
    Retention, Staging, TaskDescriptor,
};
pub use error::{FarmError, Result, TransferStage};
pub use traits::{DeviceBackend, DeviceHandle, OffloadTask};
