//! Test harness for the Specula probe cache.
//!
//! Provides in-memory stand-ins for the GPU seam so cache behavior can be
//! checked by inspecting recorded commands.

pub mod harness;
pub mod sources;

pub use harness::{MockDevice, MockFilter, MockRecorder, MockTexture, RecordedCommand};
pub use sources::{baked_cubemap, realtime_target, ProbeFactory};
