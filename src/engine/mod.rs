// src/engine/mod.rs

//! Long-running orchestration layer over the store: serialized access,
//! workflow notification on terminal transitions and the periodic sweep.

pub mod runtime;

pub use runtime::Runtime;
