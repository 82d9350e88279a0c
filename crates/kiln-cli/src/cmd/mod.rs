//! Command implementations

pub mod build;
pub mod deps;
pub mod info;
