//! I/O adapters for opskit commands.

pub mod config;
pub mod process;
pub mod store;
pub mod virt;
