//! # Memory Management
//!
//! Offset bookkeeping for fixed-size staging regions.
//!
//! ## Design Philosophy
//!
//! Staging memory is allocated once per resource set at startup. During
//! streaming:
//! - No pointer arithmetic, only checked offsets
//! - Allocation failure is a value (`None`), never a panic
//! - The cursor only rewinds after the GPU is done with the region

mod arena;

pub use arena::{ArenaSlice, StagingArena};
