use crate::types::{FieldValue, NaturalKey, TableSpec};

/// A typed projection of a [`SourceRecord`](crate::types::SourceRecord) onto
/// a target table, immutable once produced.
///
/// Values are positional and aligned with the owning table spec's column
/// list; the spec is needed to interpret them by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormalizedRecord {
    values: Vec<FieldValue>,
}

impl NormalizedRecord {
    pub fn new(values: Vec<FieldValue>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[FieldValue] {
        &self.values
    }

    /// Replace the named column's value, for columns filled by the feed
    /// handler rather than the source file.
    pub fn with_value(mut self, spec: &TableSpec, column: &str, value: FieldValue) -> Self {
        if let Some(index) = spec.column_index(column) {
            self.values[index] = value;
        }
        self
    }

    /// Value of the named column, per the table spec's column order.
    pub fn value(&self, spec: &TableSpec, column: &str) -> Option<&FieldValue> {
        spec.column_index(column).and_then(|i| self.values.get(i))
    }

    /// The record's natural key, per the table spec's declared key columns.
    pub fn natural_key(&self, spec: &TableSpec) -> NaturalKey {
        let parts = spec
            .key
            .iter()
            .map(|k| {
                self.value(spec, k)
                    .cloned()
                    .unwrap_or(FieldValue::Null)
            })
            .collect();
        NaturalKey::new(parts)
    }
}
