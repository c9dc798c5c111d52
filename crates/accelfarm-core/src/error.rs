use thiserror::Error;

/// Which device-side step of a task's execution failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStage {
    CopyIn,
    Allocate,
    Kernel,
    CopyBack,
    Release,
}

impl std::fmt::Display for TransferStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            TransferStage::CopyIn => "copy-in",
            TransferStage::Allocate => "allocate",
            TransferStage::Kernel => "kernel",
            TransferStage::CopyBack => "copy-back",
            TransferStage::Release => "release",
        };
        f.write_str(label)
    }
}

/// Errors surfaced by the offload runtime.
#[derive(Debug, Error)]
pub enum FarmError {
    /// A task produced a descriptor the runtime cannot execute.
    #[error("invalid task binding: {0}")]
    InvalidTaskBinding(String),

    /// A reuse directive named a host region with no live device allocation.
    #[error("no live device allocation for host region {addr:#x}")]
    UnresolvedBuffer { addr: usize },

    /// A device primitive failed partway through a task.
    #[error("device transfer failed during {stage}: {reason}")]
    DeviceTransferFailed {
        stage: TransferStage,
        reason: String,
    },

    /// The farm topology could not be run to completion.
    #[error("scheduling failure: {0}")]
    Scheduling(String),
}

impl FarmError {
    /// Tag a backend failure with the transfer stage it happened in.
    pub fn device(stage: TransferStage, reason: impl Into<String>) -> Self {
        FarmError::DeviceTransferFailed {
            stage,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, FarmError>;
