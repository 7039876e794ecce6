//! Storage layer
//!
//! - `engine`: byte-level key/value engine trait
//! - `memory`: in-memory engine
//! - `disk`: log-structured engine backed by a single file
//! - `keycode`: order-preserving key encoding
//! - `mvcc`: snapshot-isolated transactions on top of any engine

pub mod disk;
pub mod engine;
pub mod keycode;
pub mod memory;
pub mod mvcc;
