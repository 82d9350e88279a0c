//! Shared value types for kiln.
//!
//! Everything here is plain data with ordering and validation rules and no
//! I/O beyond hashing a file: formula names, upstream and package versions,
//! bottle platforms and download checksums.

pub mod arch;
pub mod hash;
pub mod types;
pub mod version;

// Re-exports
pub use arch::*;
pub use hash::*;
pub use types::*;
pub use version::{HEAD_VERSION, PkgVersion, Version};
