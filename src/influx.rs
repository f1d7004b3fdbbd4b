//! InfluxDB 1.x storage collaborator.
//!
//! The pipeline writes through the [`RecordWriter`] trait; the concrete
//! implementation here encodes record batches as Line Protocol
//! (`measurement,tag=v field=v timestamp_ns`) and POSTs them to the
//! InfluxDB HTTP API. Database and retention-policy provisioning happen
//! once at connect, before the pipeline's first write.

use std::fmt;

use async_trait::async_trait;
use serde::Deserialize;

use crate::record::{FieldValue, Record};

/// Name of the retention policy provisioned at connect.
pub const RETENTION_POLICY_NAME: &str = "hard_cutoff";

/// Batch-write seam between the pipeline and the storage backend.
#[async_trait]
pub trait RecordWriter: Send + Sync {
    async fn write_batch(&self, records: &[Record]) -> Result<(), StorageWriteError>;
}

/// Error raised by the storage collaborator. The pipeline retries a bounded
/// number of times and then drops the batch with an error log.
#[derive(Debug)]
pub enum StorageWriteError {
    /// The HTTP request itself failed (connection refused, timeout, ...).
    Request(reqwest::Error),
    /// The backend answered with a non-success status.
    Rejected { status: u16, body: String },
}

impl fmt::Display for StorageWriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageWriteError::Request(err) => write!(f, "storage request failed: {}", err),
            StorageWriteError::Rejected { status, body } => {
                write!(f, "storage rejected write (HTTP {}): {}", status, body)
            }
        }
    }
}

impl std::error::Error for StorageWriteError {}

impl From<reqwest::Error> for StorageWriteError {
    fn from(err: reqwest::Error) -> Self {
        StorageWriteError::Request(err)
    }
}

/// Connection settings for the InfluxDB collaborator.
#[derive(Debug, Clone)]
pub struct InfluxSettings {
    /// Base URL, e.g. `http://localhost:8086`.
    pub url: String,
    pub database: String,
    pub username: String,
    pub password: String,
}

/// InfluxDB 1.x HTTP client implementing [`RecordWriter`].
pub struct InfluxWriter {
    client: reqwest::Client,
    settings: InfluxSettings,
}

/// Shape of an InfluxDB `/query` JSON response.
#[derive(Debug, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub results: Vec<QueryResult>,
}

#[derive(Debug, Deserialize)]
pub struct QueryResult {
    #[serde(default)]
    pub series: Vec<Series>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Series {
    pub columns: Vec<String>,
    pub values: Vec<Vec<serde_json::Value>>,
}

impl InfluxWriter {
    /// Create a client without touching the backend.
    pub fn new(settings: InfluxSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            settings,
        }
    }

    /// Connect and provision: create the database if absent, and install
    /// the default retention policy if no policy with our name exists.
    pub async fn connect(
        settings: InfluxSettings,
        retention_duration: &str,
    ) -> Result<Self, StorageWriteError> {
        let writer = Self::new(settings);

        writer
            .query(&format!("CREATE DATABASE \"{}\"", writer.settings.database))
            .await?;

        let policies = writer
            .query(&format!(
                "SHOW RETENTION POLICIES ON \"{}\"",
                writer.settings.database
            ))
            .await?;
        if !has_policy(&policies, RETENTION_POLICY_NAME) {
            writer
                .query(&format!(
                    "CREATE RETENTION POLICY \"{}\" ON \"{}\" DURATION {} REPLICATION 1 DEFAULT",
                    RETENTION_POLICY_NAME, writer.settings.database, retention_duration
                ))
                .await?;
            tracing::info!(
                policy = RETENTION_POLICY_NAME,
                duration = retention_duration,
                "created retention policy"
            );
        }

        Ok(writer)
    }

    /// Run a single InfluxQL statement against `/query`.
    pub async fn query(&self, statement: &str) -> Result<QueryResponse, StorageWriteError> {
        let response = self
            .client
            .post(format!("{}/query", self.settings.url))
            .basic_auth(&self.settings.username, Some(&self.settings.password))
            .form(&[("db", self.settings.database.as_str()), ("q", statement)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageWriteError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: QueryResponse = response.json().await?;
        if let Some(error) = parsed
            .results
            .iter()
            .find_map(|r| r.error.as_deref())
            .map(str::to_string)
        {
            return Err(StorageWriteError::Rejected {
                status: status.as_u16(),
                body: error,
            });
        }
        Ok(parsed)
    }
}

#[async_trait]
impl RecordWriter for InfluxWriter {
    async fn write_batch(&self, records: &[Record]) -> Result<(), StorageWriteError> {
        let mut lines = Vec::with_capacity(records.len());
        for record in records {
            match encode_line(record) {
                Ok(line) => lines.push(line),
                // Records are validated before batching; an unencodable one
                // here is skipped rather than failing the whole batch.
                Err(err) => {
                    tracing::error!(measurement = %record.measurement, error = %err,
                        "skipping unencodable record");
                }
            }
        }
        if lines.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .post(format!("{}/write", self.settings.url))
            .basic_auth(&self.settings.username, Some(&self.settings.password))
            .query(&[
                ("db", self.settings.database.as_str()),
                ("precision", "ns"),
            ])
            .body(lines.join("\n"))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageWriteError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

fn has_policy(response: &QueryResponse, name: &str) -> bool {
    response
        .results
        .iter()
        .flat_map(|r| r.series.iter())
        .flat_map(|s| s.values.iter())
        .any(|row| row.first().and_then(|v| v.as_str()) == Some(name))
}

/// Encode one record as a Line Protocol line.
///
/// Tags are sorted by key for a canonical form; the timestamp is the
/// record's ISO-8601 time converted to epoch nanoseconds.
pub fn encode_line(record: &Record) -> Result<String, EncodeError> {
    if record.fields.is_empty() {
        return Err(EncodeError::NoFields);
    }

    let timestamp = chrono::DateTime::parse_from_rfc3339(&record.time)
        .map_err(|_| EncodeError::BadTimestamp(record.time.clone()))?
        .timestamp_nanos_opt()
        .ok_or_else(|| EncodeError::BadTimestamp(record.time.clone()))?;

    let mut line = escape_name(&record.measurement);

    let mut tags: Vec<_> = record.tags.iter().collect();
    tags.sort_by(|a, b| a.0.cmp(b.0));
    for (key, value) in tags {
        line.push(',');
        line.push_str(&escape_name(key));
        line.push('=');
        line.push_str(&escape_name(value));
    }

    line.push(' ');
    for (i, (key, value)) in record.fields.iter().enumerate() {
        if i > 0 {
            line.push(',');
        }
        line.push_str(&escape_name(key));
        line.push('=');
        line.push_str(&encode_field_value(value));
    }

    line.push(' ');
    line.push_str(&timestamp.to_string());
    Ok(line)
}

/// Error raised while encoding a single record into Line Protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum EncodeError {
    NoFields,
    BadTimestamp(String),
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeError::NoFields => write!(f, "record has no fields"),
            EncodeError::BadTimestamp(t) => write!(f, "timestamp '{}' is not ISO-8601", t),
        }
    }
}

impl std::error::Error for EncodeError {}

/// Escape a measurement name, tag key/value, or field key.
/// Commas, equals signs, and spaces must be backslash-escaped.
fn escape_name(s: &str) -> String {
    s.replace(',', "\\,").replace('=', "\\=").replace(' ', "\\ ")
}

fn encode_field_value(value: &FieldValue) -> String {
    match value {
        FieldValue::Float(v) => format!("{}", v),
        FieldValue::Integer(v) => format!("{}i", v),
        FieldValue::String(v) => {
            let escaped = v.replace('\\', "\\\\").replace('"', "\\\"");
            format!("\"{}\"", escaped)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;

    fn record() -> Record {
        let mut record = Record::new("TH", "2019-07-02T17:52:35.323Z");
        record.tags.insert("geohash".to_string(), "9tbr".to_string());
        record.tags.insert("centre".to_string(), "ZLA".to_string());
        record
            .fields
            .insert("latitude".to_string(), FieldValue::Float(33.5));
        record
            .fields
            .insert("count".to_string(), FieldValue::Integer(2));
        record
            .fields
            .insert("gufi".to_string(), FieldValue::String("a-b".to_string()));
        record
    }

    #[test]
    fn test_encode_line_sorts_tags_and_types_fields() {
        let line = encode_line(&record()).unwrap();
        assert_eq!(
            line,
            "TH,centre=ZLA,geohash=9tbr latitude=33.5,count=2i,gufi=\"a-b\" 1562089955323000000"
        );
    }

    #[test]
    fn test_encode_line_escapes_special_characters() {
        let mut r = Record::new("my measurement", "2019-07-02T17:52:35.323Z");
        r.tags.insert("tag key".to_string(), "tag,value".to_string());
        r.fields.insert(
            "note".to_string(),
            FieldValue::String("say \"hi\"".to_string()),
        );

        let line = encode_line(&r).unwrap();
        assert_eq!(
            line,
            "my\\ measurement,tag\\ key=tag\\,value note=\"say \\\"hi\\\"\" 1562089955323000000"
        );
    }

    #[test]
    fn test_encode_line_rejects_empty_fields() {
        let r = Record::new("TH", "2019-07-02T17:52:35.323Z");
        assert_eq!(encode_line(&r), Err(EncodeError::NoFields));
    }

    #[test]
    fn test_encode_line_rejects_bad_timestamp() {
        let mut r = record();
        r.time = "not-a-time".to_string();
        assert_eq!(
            encode_line(&r),
            Err(EncodeError::BadTimestamp("not-a-time".to_string()))
        );
    }

    #[test]
    fn test_has_policy_reads_first_column() {
        let response: QueryResponse = serde_json::from_str(
            r#"{"results":[{"series":[{"columns":["name","duration"],
                "values":[["autogen","0s"],["hard_cutoff","4368h0m0s"]]}]}]}"#,
        )
        .unwrap();

        assert!(has_policy(&response, "hard_cutoff"));
        assert!(!has_policy(&response, "missing"));
    }
}
