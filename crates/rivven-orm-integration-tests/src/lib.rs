//! rivven-orm Integration Tests
//!
//! Runs the command engines against real MySQL, PostgreSQL and SQL Server
//! servers started with testcontainers. It is NOT published to crates.io.
//!
//! # Running Tests
//!
//! ```bash
//! # All engines (Docker required)
//! cargo test -p rivven-orm-integration-tests -- --ignored
//!
//! # One engine
//! cargo test -p rivven-orm-integration-tests --test postgres_engine -- --ignored
//!
//! # With logging
//! RUST_LOG=debug cargo test -p rivven-orm-integration-tests -- --ignored --nocapture
//! ```

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;
