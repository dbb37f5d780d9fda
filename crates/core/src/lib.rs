//! # reclaimd Core
//!
//! Domain types, collaborator traits, and error definitions for the reclaimd
//! memory-pressure arbitration daemon. This crate has no runtime of its own:
//! it defines the model every other crate implements against.
//!
//! ## Layout
//!
//! - [`priority`]: ids and the fixed reclaim priority scale
//! - [`reclaim`]: lifecycle events consumed by the priority engine
//! - [`kernel`], [`config`], [`snapshot`]: the seams between engine, killer,
//!   and the outside world
//! - [`event`]: broadcast bus for things other components may want to observe

pub mod error;
pub mod priority;
pub mod reclaim;
pub mod kernel;
pub mod config;
pub mod snapshot;
pub mod event;

// Re-export key types at crate root for ergonomics
pub use error::{EngineError, Error, KernelError, Result, ServiceError};
pub use priority::{AccountId, Pid, Uid, derive_account_id};
pub use reclaim::{ReclaimEvent, ReclaimReason};
pub use kernel::{KernelInterface, MemoryPressure};
pub use config::{ConfigProvider, KillTier};
pub use snapshot::{BundlePriorityInfo, BundleState, PrioritySource};
pub use event::{DomainEvent, EventBus};
