//! Shared test utilities for invoice-intake integration tests.
//!
//! This module provides:
//! - `TestHarness` wiring an `IntakeService` to temp storage and mocks
//! - Mock collaborators that count how often they are called

pub mod harness;
pub mod mocks;

pub use harness::{HarnessOptions, TestHarness};
pub use mocks::*;
