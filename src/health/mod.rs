//! Endpoint health monitoring
//!
//! This module provides:
//! - One monitor task per endpoint that creates its pool and probes its role
//! - Rolling probe latency statistics

pub(crate) mod monitor;
mod stopwatch;

pub use stopwatch::Stopwatch;
