//! Storage-ready record type and pre-write validation.

use std::fmt;

use indexmap::IndexMap;

/// A scalar value storable in a time-series field.
///
/// The storage backend accepts strings, integers, and floats; anything else
/// is unrepresentable by construction.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    String(String),
    Integer(i64),
    Float(f64),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::String(s) => write!(f, "{}", s),
            FieldValue::Integer(i) => write!(f, "{}", i),
            FieldValue::Float(v) => write!(f, "{}", v),
        }
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

/// Error raised when a record holds a value the storage backend cannot save.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueTypeError {
    /// A float field is NaN or infinite.
    NonFiniteFloat { name: String, value: f64 },
    /// The record timestamp is not an ISO-8601 datetime.
    InvalidTimestamp { value: String },
}

impl fmt::Display for ValueTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueTypeError::NonFiniteFloat { name, value } => {
                write!(f, "field '{}' has non-finite value {}", name, value)
            }
            ValueTypeError::InvalidTimestamp { value } => {
                write!(f, "timestamp '{}' is not an ISO-8601 datetime", value)
            }
        }
    }
}

impl std::error::Error for ValueTypeError {}

/// One flattened, post-processed flight message, ready for batching.
///
/// `measurement` routes storage (a table, in SQL terms). Tags are indexed
/// and low-cardinality; fields carry the payload and are not indexed.
/// Immutable once hooks have run.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub measurement: String,
    pub time: String,
    pub tags: IndexMap<String, String>,
    pub fields: IndexMap<String, FieldValue>,
}

impl Record {
    pub fn new(measurement: impl Into<String>, time: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            time: time.into(),
            tags: IndexMap::new(),
            fields: IndexMap::new(),
        }
    }

    /// Check that every value is storable before handing the record to the
    /// batch accumulator.
    ///
    /// The `FieldValue` enum already restricts values to scalars; what
    /// remains to check at runtime is float finiteness and that the
    /// timestamp parses as ISO-8601.
    pub fn validate(&self) -> Result<(), ValueTypeError> {
        for (name, value) in &self.fields {
            if let FieldValue::Float(v) = value {
                if !v.is_finite() {
                    return Err(ValueTypeError::NonFiniteFloat {
                        name: name.clone(),
                        value: *v,
                    });
                }
            }
        }

        if chrono::DateTime::parse_from_rfc3339(&self.time).is_err() {
            return Err(ValueTypeError::InvalidTimestamp {
                value: self.time.clone(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_record() -> Record {
        let mut record = Record::new("TH", "2019-07-02T17:52:35.323Z");
        record.tags.insert("centre".to_string(), "ZLA".to_string());
        record
            .fields
            .insert("gufi".to_string(), FieldValue::String("abc".to_string()));
        record
            .fields
            .insert("latitude".to_string(), FieldValue::Float(33.626675));
        record
    }

    #[test]
    fn test_validate_accepts_scalars() {
        assert!(valid_record().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_non_finite_float() {
        let mut record = valid_record();
        record
            .fields
            .insert("altitude".to_string(), FieldValue::Float(f64::NAN));

        match record.validate() {
            Err(ValueTypeError::NonFiniteFloat { name, .. }) => assert_eq!(name, "altitude"),
            other => panic!("expected NonFiniteFloat, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_bad_timestamp() {
        let mut record = valid_record();
        record.time = "yesterday".to_string();

        assert_eq!(
            record.validate(),
            Err(ValueTypeError::InvalidTimestamp {
                value: "yesterday".to_string()
            })
        );
    }
}
