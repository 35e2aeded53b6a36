//! Operational tooling for virtualized Linux instances.
//!
//! The crate backs three workflows: scheduled instance backups with a
//! retention policy, repeated execution of a flaky command, and (through the
//! `bootstrap` crate) a two-stage compiler build. The architecture keeps a
//! strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (retention selection, naming,
//!   instance list parsing). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config files, artifact store,
//!   child processes, the virtualization CLI). Traits at the seams let tests
//!   substitute scripted adapters.
//!
//! Orchestration modules ([`backup`], [`prune`], [`repeat`]) coordinate core
//! logic with I/O to implement CLI commands.

pub mod backup;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod prune;
pub mod repeat;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
