//! In-process code execution engine.
//!
//! [`CodeExecutor`] takes a language identifier, source code, optional stdin
//! and a timeout, runs the program with the matching strategy and returns an
//! [`ExecutionResult`]. Script languages run in a fresh embedded engine per
//! call, Python runs through a host interpreter bootstrapped once per
//! process, and everything else gets a clearly-marked simulated result.

pub mod config;
pub mod core;
pub mod managed;
pub mod sandbox;
pub mod simulated;
pub mod stubs;


pub use crate::config::ExecutorConfig;
pub use crate::core::dispatcher::CodeExecutor;
pub use crate::core::domain::{
    ExecutionResult, ExecutionSummary, Language, TestCase, TestResult,
};
