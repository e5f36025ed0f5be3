//! Concurrent physics simulation core.
//!
//! Entities are queued for insertion or removal from any thread and applied in
//! one batch at the start of each step. Ray and shape queries may run while the
//! world is not being mutated, and narrow-phase contacts are recorded into
//! bounded per-body queues.

pub mod core;
pub mod engine;
