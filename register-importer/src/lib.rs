//! # Register Importer
//!
//! Command-line application importing open register feeds (charity
//! registers, the company register, postcode geography) into Postgres.
//! It wires the pipeline, repository and fetcher crates together and
//! carries the per-feed definitions.

pub mod config;
pub mod errors;
pub mod feeds;

pub use config::Dependencies;
pub use errors::ImportError;
