// crates/api/src/lib.rs
//! HTTP client for the platform's conversation and session REST API.

pub mod client;

pub use client::ApiClient;
