//! Lifecycle engine for paid challenges.
//!
//! A challenge is created with a hashed answer commitment, classified
//! in the background, anchored to its on-chain escrow, joined and
//! staked by participants, and settled the moment a submission matches
//! the commitment. Every consequential step lands in an append-only
//! per-challenge ledger.
pub mod chain;
pub mod challenge;
pub mod classifier;
pub mod commitment;
pub mod config;
pub mod error;
pub mod events;
pub mod participant;
pub mod query;
pub mod service;
pub mod store;
pub mod utils;
pub mod worker;

pub use error::{Error, Result};
