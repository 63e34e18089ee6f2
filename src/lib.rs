//! Treasury Proxy Library
//!
//! Caching proxy in front of the Thai Treasury Department's condominium
//! appraisal dataset. The modules are exposed for the binary and for
//! integration tests.

pub mod cache;
pub mod cli;
pub mod config;
pub mod data;
pub mod query;
pub mod refresh;
pub mod server;

#[cfg(test)]
mod test_support;
