//! Error types for the consumer module of the Register Importer Pipeline.
use thiserror::Error;

/// Represents errors that can occur while reading a source file.
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("CSV error in {file}: {source}")]
    Csv {
        file: String,
        source: csv::Error,
    },
    #[error("{file} is not valid {encoding} at byte {offset}")]
    Encoding {
        file: String,
        encoding: &'static str,
        offset: usize,
    },
    #[error("{file} line {line}: expected {expected} columns, found {found}")]
    ColumnCountMismatch {
        file: String,
        line: u64,
        expected: usize,
        found: usize,
    },
    #[error("{file} header does not match the declared columns")]
    HeaderMismatch {
        file: String,
        missing: Vec<String>,
        unexpected: Vec<String>,
    },
}
