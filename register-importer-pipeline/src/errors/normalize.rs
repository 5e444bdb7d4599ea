//! Error types for the normalize module of the Register Importer Pipeline.
use thiserror::Error;

/// Represents errors that can occur while normalizing a source row.
///
/// Per-field parse failures are not errors; they are logged and the field
/// nulled. A source value outside a declared vocabulary means the feed's
/// contract has drifted and the whole run must stop.
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("Unknown {vocabulary} value \"{value}\" in column \"{column}\"")]
    UnknownVocabulary {
        vocabulary: &'static str,
        column: &'static str,
        value: String,
    },
}
