//! Integration tests for the sync engine

pub mod drain_test;
pub mod optimistic_test;
