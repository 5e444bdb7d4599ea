//! # Register Importer Pipeline
//! This crate defines the core modules for turning raw register feeds into
//! relational rows.
//! It includes modules for consuming source files, normalizing fields,
//! resolving record identity, staging batches, and orchestrating a whole
//! import run, along with error handling.
pub mod consumer;
pub mod normalize;
pub mod orchestrator;
pub mod resolve;
pub mod stage;

pub mod errors;
