//! # Register Importer Shared
//! This crate defines shared data structures and types used across the register
//! importer ecosystem. It includes common definitions for source records, typed
//! field values, natural keys, declarative feed specifications, and import runs.
pub mod types;
