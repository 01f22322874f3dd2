//! # Taskflow Testing Utils
//!
//! Shared testing utilities for the taskflow workspace.
//!
//! ## Features
//!
//! - **Mock Store**: in-memory `TaskStore` / `ResultStore` that records every
//!   persisted state and can inject persistence failures
//! - **Scripted Executors**: executors whose outcome per attempt is scripted
//!   (succeed, fail, panic, sleep)
//! - **Manual Clock**: a `Clock` that only moves when a test advances it
//! - **Test Data Builders**: `TaskBuilder` and `NewTaskBuilder`
//!
//! ## Usage
//!
//! ```toml
//! [dev-dependencies]
//! taskflow-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

// Re-export commonly used items
pub use builders::*;
pub use helpers::*;
pub use mocks::*;
