//! Reclaim priority engine for reclaimd.
//!
//! Tracks the process → bundle → account hierarchy, turns lifecycle events
//! into reclaim priorities, and keeps a global index of bundles ordered from
//! most important to most killable.
//!
//! [`ReclaimPriorityEngine`] is the synchronous state machine;
//! [`PriorityService`] runs it on its own task queue and is what the rest of
//! the daemon talks to.

pub mod engine;
mod grace;
pub mod index;
pub mod model;
pub mod rules;
pub mod service;

pub use engine::{Applied, Effect, EngineSettings, PriorityChange, ReclaimPriorityEngine};
pub use index::PriorityIndex;
pub use model::{Account, Bundle, Process, ProcessFlags};
pub use service::PriorityService;
