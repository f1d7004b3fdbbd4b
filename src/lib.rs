//! # FIXM Journaler: Flight-Data Ingestion Pipeline
//!
//! Reads FIXM message collections from a message queue, flattens each
//! message's XML tree into a uniquely-keyed set of tags and fields, applies
//! per-measurement post-processing hooks, and journals the resulting
//! records to InfluxDB in bounded batches.
//!
//! ## Architecture
//!
//! - **Flattener**: recursive XML-tree → flat key/value mapping, with
//!   namespace stripping and duplicate-sibling disambiguation
//! - **Hook registry**: ordered transformation callbacks keyed by
//!   measurement, built once at startup and shared read-only
//! - **Ingestion pipeline**: shared intake queue, worker pool with private
//!   batches, threshold flushes, and queue-depth backpressure warnings
//! - **Collaborators**: NATS JetStream inbound, InfluxDB 1.x outbound
//!
//! ## Example: one message, by hand
//!
//! ```ignore
//! use fixm_journaler::{build_record, parse_collection, HookRegistry};
//!
//! let hooks = HookRegistry::standard();
//! for message in parse_collection(payload)? {
//!     let record = build_record(&message, &hooks)?;
//!     println!("{} @ {}", record.measurement, record.time);
//! }
//! ```

// Core transformation engine
pub mod element;
pub mod flatten;
pub mod hooks;
pub mod record;
pub mod transform;

// Ingestion pipeline
pub mod intake;
pub mod pipeline;

// External collaborators
pub mod broker;
pub mod influx;

// Process configuration
pub mod config;

// Re-export key types
pub use element::{parse_collection, Element, ParseError};
pub use flatten::{flatten, FlattenError};
pub use hooks::{HookError, HookRegistry};
pub use record::{FieldValue, Record, ValueTypeError};
pub use transform::{build_record, TransformError};

// Re-export pipeline types
pub use intake::Intake;
pub use pipeline::{Pipeline, PipelineConfig, PipelineStats};

// Re-export collaborator types
pub use broker::{Broker, BrokerSettings};
pub use config::{Config, ConfigError};
pub use influx::{InfluxSettings, InfluxWriter, RecordWriter, StorageWriteError};
