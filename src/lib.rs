//! Alternating two-asset swap engine.
//!
//! Quotes come from several independent sources (off-chain aggregator APIs
//! and an on-chain pool quoter), the best one is executed through a failover
//! pool of RPC endpoints, and the traded direction flips after every
//! confirmed swap.

pub mod aggregator;
pub mod api;
pub mod approvals;
pub mod chain;
pub mod config;
pub mod dex;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod models;
pub mod oracle;
pub mod retry;
pub mod utils;

#[cfg(test)]
mod testing;
