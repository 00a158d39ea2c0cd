//! Common test utilities and helpers
//!
//! This module provides shared utilities for all tests including:
//! - A scriptable in-process remote backend
//! - Service and configuration fixtures
//! - Custom assertion macros

pub mod fixtures;
pub mod mock_remote;

// Re-export commonly used utilities
pub use fixtures::*;
pub use mock_remote::*;
