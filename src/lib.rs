// ABOUTME: Library root for switchyard - exposes public types for testing.
// ABOUTME: The main binary is in main.rs.

pub mod builder;
pub mod config;
pub mod deploy;
pub mod diagnostics;
pub mod error;
pub mod notify;
pub mod output;
pub mod probe;
pub mod proxy;
pub mod runtime;
pub mod types;
