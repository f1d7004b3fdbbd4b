//! Record builder: flatten a message, extract the mandatory routing fields,
//! run post-processing hooks, and validate the result.

use std::fmt;

use crate::element::Element;
use crate::flatten::{flatten, FlattenError};
use crate::hooks::{HookError, HookRegistry};
use crate::record::{FieldValue, Record, ValueTypeError};

/// Mandatory flattened field naming the message source; becomes the
/// record's measurement.
pub const SOURCE_FIELD: &str = "flight.source";

/// Mandatory flattened field carrying the event time (ISO-8601).
pub const TIMESTAMP_FIELD: &str = "flight.timestamp";

/// Failure modes of building one record. All are fatal to that single
/// message only; the pipeline logs and drops it.
#[derive(Debug)]
pub enum TransformError {
    Flatten(FlattenError),
    MissingRequiredField { field: &'static str },
    Hook(HookError),
    InvalidValue(ValueTypeError),
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformError::Flatten(err) => write!(f, "flattening failed: {}", err),
            TransformError::MissingRequiredField { field } => {
                write!(f, "mandatory field '{}' is missing", field)
            }
            TransformError::Hook(err) => write!(f, "hook failed: {}", err),
            TransformError::InvalidValue(err) => write!(f, "invalid value: {}", err),
        }
    }
}

impl std::error::Error for TransformError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransformError::Flatten(err) => Some(err),
            TransformError::Hook(err) => Some(err),
            TransformError::InvalidValue(err) => Some(err),
            TransformError::MissingRequiredField { .. } => None,
        }
    }
}

impl From<FlattenError> for TransformError {
    fn from(err: FlattenError) -> Self {
        TransformError::Flatten(err)
    }
}

impl From<HookError> for TransformError {
    fn from(err: HookError) -> Self {
        TransformError::Hook(err)
    }
}

impl From<ValueTypeError> for TransformError {
    fn from(err: ValueTypeError) -> Self {
        TransformError::InvalidValue(err)
    }
}

/// Build a storage-ready record from one message element tree.
///
/// The record starts with an empty tag set and the full flattened mapping
/// as its field set; hooks may then move entries to tags or derive new
/// ones. Every value is validated before the record is returned.
pub fn build_record(message: &Element, hooks: &HookRegistry) -> Result<Record, TransformError> {
    let flat = flatten(message)?;

    let measurement = flat
        .get(SOURCE_FIELD)
        .cloned()
        .ok_or(TransformError::MissingRequiredField { field: SOURCE_FIELD })?;
    let time = flat
        .get(TIMESTAMP_FIELD)
        .cloned()
        .ok_or(TransformError::MissingRequiredField {
            field: TIMESTAMP_FIELD,
        })?;

    let mut record = Record::new(measurement, time);
    for (key, value) in flat {
        record.fields.insert(key, FieldValue::String(value));
    }

    hooks.run(&mut record)?;
    record.validate()?;

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::parse_collection;

    fn message(xml: &str) -> Element {
        parse_collection(xml.as_bytes()).unwrap().remove(0)
    }

    #[test]
    fn test_build_record_routes_on_source_and_timestamp() {
        let msg = message(
            r#"<c><message>
                <flight source="HP" timestamp="2019-07-02T17:52:35.323Z" centre="ZLA">
                    <gufi>abc-123</gufi>
                </flight>
            </message></c>"#,
        );

        let record = build_record(&msg, &HookRegistry::new()).unwrap();
        assert_eq!(record.measurement, "HP");
        assert_eq!(record.time, "2019-07-02T17:52:35.323Z");
        assert!(record.tags.is_empty());
        assert_eq!(
            record.fields.get("flight.gufi"),
            Some(&FieldValue::String("abc-123".to_string()))
        );
        // The routing fields stay in the field set.
        assert_eq!(
            record.fields.get(SOURCE_FIELD),
            Some(&FieldValue::String("HP".to_string()))
        );
        assert_eq!(
            record.fields.get(TIMESTAMP_FIELD),
            Some(&FieldValue::String("2019-07-02T17:52:35.323Z".to_string()))
        );
    }

    #[test]
    fn test_build_record_missing_source() {
        let msg = message(
            r#"<c><message><flight timestamp="2019-07-02T17:52:35.323Z"/></message></c>"#,
        );

        match build_record(&msg, &HookRegistry::new()) {
            Err(TransformError::MissingRequiredField { field }) => {
                assert_eq!(field, SOURCE_FIELD)
            }
            other => panic!("expected MissingRequiredField, got {:?}", other),
        }
    }

    #[test]
    fn test_build_record_missing_timestamp() {
        let msg = message(r#"<c><message><flight source="TH"/></message></c>"#);

        match build_record(&msg, &HookRegistry::new()) {
            Err(TransformError::MissingRequiredField { field }) => {
                assert_eq!(field, TIMESTAMP_FIELD)
            }
            other => panic!("expected MissingRequiredField, got {:?}", other),
        }
    }

    #[test]
    fn test_build_record_rejects_unparseable_timestamp() {
        let msg = message(
            r#"<c><message><flight source="HP" timestamp="last tuesday"/></message></c>"#,
        );

        assert!(matches!(
            build_record(&msg, &HookRegistry::new()),
            Err(TransformError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_build_record_runs_hooks() {
        let msg = message(
            r#"<c><message>
                <flight source="TH" timestamp="2019-07-02T17:52:35.323Z">
                    <enRoute><position>
                        <position><location><pos>33.626675 -112.1024746</pos></location></position>
                        <altitude>310</altitude>
                    </position></enRoute>
                    <flightIdentification aircraftIdentification="N1220W"/>
                </flight>
            </message></c>"#,
        );

        let record = build_record(&msg, &HookRegistry::standard()).unwrap();
        assert_eq!(record.tags.get("geohash").map(String::as_str), Some("9tbr"));
        assert_eq!(
            record.tags.get("aircraftIdentification").map(String::as_str),
            Some("N1220W")
        );
        assert_eq!(
            record.fields.get("flight.enRoute.position.altitude"),
            Some(&FieldValue::Float(310.0))
        );
    }

    #[test]
    fn test_build_record_duplicate_key_fails() {
        let msg = message(
            r#"<c><message>
                <flight source="HP" timestamp="2019-07-02T17:52:35.323Z" gufi="attr">
                    <gufi>element</gufi>
                </flight>
            </message></c>"#,
        );

        assert!(matches!(
            build_record(&msg, &HookRegistry::new()),
            Err(TransformError::Flatten(_))
        ));
    }
}
