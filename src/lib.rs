//! SMARTFLOW — Signal intelligence shim over a blockchain-analytics API
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod cache;
pub mod config;
pub mod engine;
pub mod limiter;
pub mod risk;
pub mod source;
pub mod storage;
pub mod types;
