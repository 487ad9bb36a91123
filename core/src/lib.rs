//! Daily lottery ticket consolidation and player scoring.
//!
//! One trading day (a cycle) of morning and evening ticket feeds goes in;
//! an updated player registry and an immutable, versioned snapshot of
//! every player's E-Score, segment and gear come out.

pub mod aggregator;
pub mod config;
pub mod cycle;
pub mod engine;
pub mod error;
pub mod event;
pub mod export;
pub mod mockgen;
pub mod name_generator;
pub mod parser;
pub mod registry;
pub mod rng;
pub mod scoring;
pub mod snapshot;
pub mod store;
pub mod types;
pub mod validator;
pub mod window;
