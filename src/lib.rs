//! SCREENER: multi-factor instrument screener.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod data;
pub mod scoring;
pub mod engine;
