//! Post-processing hook registry.
//!
//! Hooks are transformation callbacks keyed by measurement name. They run in
//! registration order against the mutable record produced by the flattener
//! and may move entries from fields to tags or derive new ones. The table is
//! built once at process start and passed by reference into the record
//! builder — registration is explicit, not a decorator side effect.

use std::collections::HashMap;
use std::fmt;

use geohash::Coord;

use crate::record::{FieldValue, Record};

/// Flattened field holding the aircraft position as two space-separated
/// coordinates, latitude first.
pub const POSITION_FIELD: &str = "flight.enRoute.position.position.location.pos";

/// Flattened field holding the reported altitude as text.
pub const ALTITUDE_FIELD: &str = "flight.enRoute.position.altitude";

/// Flattened field holding the aircraft identification.
pub const AIRCRAFT_ID_FIELD: &str = "flight.flightIdentification.aircraftIdentification";

/// Geohash precision of 4 gives ≈20 km grid cells — the coarsest precision
/// at or below the ~9 km minimum aircraft separation.
pub const GEOHASH_PRECISION: usize = 4;

/// Error raised by a hook on malformed input. Fails the enclosing record
/// build; the registry never treats an unregistered measurement as an error.
#[derive(Debug, Clone, PartialEq)]
pub enum HookError {
    /// A field the hook requires is absent.
    MissingField { field: &'static str },
    /// A field value could not be interpreted by the hook.
    InvalidValue { field: &'static str, value: String },
}

impl fmt::Display for HookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookError::MissingField { field } => {
                write!(f, "hook input field '{}' is missing", field)
            }
            HookError::InvalidValue { field, value } => {
                write!(f, "hook input field '{}' has invalid value '{}'", field, value)
            }
        }
    }
}

impl std::error::Error for HookError {}

type Hook = Box<dyn Fn(&mut Record) -> Result<(), HookError> + Send + Sync>;

/// Ordered hook lists keyed by measurement name.
///
/// Write-once before the pipeline starts; read-only (and lock-free) during
/// message processing.
#[derive(Default)]
pub struct HookRegistry {
    hooks: HashMap<String, Vec<Hook>>,
}

impl HookRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a hook to the ordered list for `measurement`.
    pub fn register<F>(&mut self, measurement: &str, hook: F)
    where
        F: Fn(&mut Record) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.hooks
            .entry(measurement.to_string())
            .or_default()
            .push(Box::new(hook));
    }

    /// Run the hooks registered for the record's measurement, in
    /// registration order. No hooks registered is a no-op, not an error.
    pub fn run(&self, record: &mut Record) -> Result<(), HookError> {
        if let Some(hooks) = self.hooks.get(&record.measurement) {
            for hook in hooks {
                hook(record)?;
            }
        }
        Ok(())
    }

    /// The production table: the TH hooks, in the order users depend on.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register("TH", derive_geohash);
        registry.register("TH", altitude_to_float);
        registry.register("TH", tag_aircraft_identification);
        registry
    }
}

/// Derive numeric `latitude`/`longitude` fields and a `geohash` tag + field
/// from the position field. Pure function of the position text, so re-runs
/// recompute identical values.
fn derive_geohash(record: &mut Record) -> Result<(), HookError> {
    let position = string_field(record, POSITION_FIELD)?;

    let invalid = |value: &str| HookError::InvalidValue {
        field: POSITION_FIELD,
        value: value.to_string(),
    };

    let mut parts = position.split_whitespace();
    let latitude: f64 = parts
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or_else(|| invalid(&position))?;
    let longitude: f64 = parts
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or_else(|| invalid(&position))?;
    if parts.next().is_some() {
        return Err(invalid(&position));
    }

    let hash = geohash::encode(
        Coord {
            x: longitude,
            y: latitude,
        },
        GEOHASH_PRECISION,
    )
    .map_err(|_| invalid(&position))?;

    record
        .fields
        .insert("latitude".to_string(), FieldValue::Float(latitude));
    record
        .fields
        .insert("longitude".to_string(), FieldValue::Float(longitude));
    record
        .fields
        .insert("geohash".to_string(), FieldValue::String(hash.clone()));
    record.tags.insert("geohash".to_string(), hash);

    Ok(())
}

/// Coerce the altitude field from text to a float when present.
fn altitude_to_float(record: &mut Record) -> Result<(), HookError> {
    let parsed = match record.fields.get(ALTITUDE_FIELD) {
        Some(FieldValue::String(text)) => {
            text.parse::<f64>().map_err(|_| HookError::InvalidValue {
                field: ALTITUDE_FIELD,
                value: text.clone(),
            })?
        }
        Some(FieldValue::Integer(i)) => *i as f64,
        // Absent, or already coerced on a previous run.
        Some(FieldValue::Float(_)) | None => return Ok(()),
    };

    record
        .fields
        .insert(ALTITUDE_FIELD.to_string(), FieldValue::Float(parsed));
    Ok(())
}

/// Promote the aircraft identification to an indexed tag. The field entry
/// is kept — tags index, fields carry the payload.
fn tag_aircraft_identification(record: &mut Record) -> Result<(), HookError> {
    let id = string_field(record, AIRCRAFT_ID_FIELD)?;
    record.tags.insert("aircraftIdentification".to_string(), id);
    Ok(())
}

fn string_field(record: &Record, field: &'static str) -> Result<String, HookError> {
    match record.fields.get(field) {
        Some(FieldValue::String(value)) => Ok(value.clone()),
        Some(other) => Err(HookError::InvalidValue {
            field,
            value: other.to_string(),
        }),
        None => Err(HookError::MissingField { field }),
    }
}
