//! ferry-core: checksum engine, wire format, and configuration.
//! All other Ferry crates depend on this one.

pub mod checksum;
pub mod config;
pub mod wire;

pub use checksum::{chunk_hash, Digest, RunningHash};
pub use wire::{Acknowledgment, Chunk};
