//! GPU-resident reflection probe filter cache.
//!
//! [`ProbeFilterCache`] maps an unbounded set of scene reflection probes onto
//! a fixed number of slices of one cube array. Each slice holds a
//! GGX-prefiltered copy of its probe, produced by normalizing the source into
//! a scratch cube target, convolving it, and storing the result (optionally
//! block compressed) into the array.
//!
//! All work is recorded through [`specula_gpu::CommandRecorder`]; nothing in
//! this crate waits on the GPU.

pub mod bake;
pub mod budget;
pub mod cache;
pub mod config;
pub mod convert;
pub mod error;
pub mod slice_cache;
pub mod stats;

pub use bake::{BakeState, Normalization, ScratchResources};
pub use budget::{approx_cache_size_bytes, max_capacity_for_budget, scratch_size_bytes};
pub use cache::{ProbeFilterCache, BAKE_REGION};
pub use config::ProbeCacheConfig;
pub use error::{ProbeCacheError, Result};
pub use slice_cache::{CubemapSliceCache, SliceAllocator, SliceReservation};
pub use stats::CacheStats;
