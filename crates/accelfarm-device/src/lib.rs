//! Device-side pieces of the accelfarm runtime: the allocation table that
//! nodes share during a pipeline run, and the in-process reference backend
//! used for development and tests.

pub mod allocator;
pub mod host;

pub use allocator::DeviceAllocator;
pub use host::{scalar_from_slab, vec_from_slab, write_slab, HostDevice, KernelFn};
