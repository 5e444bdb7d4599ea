mod field_value;
mod import_run;
mod natural_key;
mod record;
mod source_record;
mod spec;

pub use field_value::FieldValue;
pub use import_run::{ImportRun, RunStatus};
pub use natural_key::NaturalKey;
pub use record::NormalizedRecord;
pub use source_record::SourceRecord;
pub use spec::{
    ColumnSpec, CsvDialect, FeedSpec, FieldKind, LoadStrategy, SourceEncoding, TableSpec,
    Vocabulary,
};
