//! Kernel collaborator implementations for reclaimd.

pub mod procfs;
pub mod psi;
pub mod in_memory;

pub use procfs::ProcfsKernel;
pub use psi::parse_memory_pressure;
pub use in_memory::InMemoryKernel;
