//! Deterministic, pure logic shared by the backup tooling.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod instances;
pub mod naming;
pub mod retention;
pub mod types;
