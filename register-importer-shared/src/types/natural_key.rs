use std::fmt;

use crate::types::FieldValue;

/// A tuple of field values that identifies a target entity across feed
/// refreshes, e.g. `(registration_number, sub_entity_number)`.
///
/// Two normalized records with equal natural keys in the same batch are the
/// same logical entity; the identity resolver picks exactly one survivor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NaturalKey(Vec<FieldValue>);

impl NaturalKey {
    pub fn new(parts: Vec<FieldValue>) -> Self {
        Self(parts)
    }

    pub fn parts(&self) -> &[FieldValue] {
        &self.0
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match part {
                FieldValue::Null => write!(f, "null")?,
                FieldValue::Text(s) => write!(f, "{}", s)?,
                FieldValue::Integer(n) => write!(f, "{}", n)?,
                FieldValue::Float(x) => write!(f, "{}", x)?,
                FieldValue::Boolean(b) => write!(f, "{}", b)?,
                FieldValue::Date(d) => write!(f, "{}", d)?,
            }
        }
        write!(f, ")")
    }
}

impl From<Vec<FieldValue>> for NaturalKey {
    fn from(parts: Vec<FieldValue>) -> Self {
        Self(parts)
    }
}
