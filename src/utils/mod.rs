//! Process-level helpers shared by the binary and the worker.

pub mod bootstrap;
pub mod retry;
