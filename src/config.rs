//! Environment-driven process configuration.

use std::env;
use std::fmt;
use std::time::Duration;

use crate::broker::BrokerSettings;
use crate::influx::InfluxSettings;
use crate::pipeline::PipelineConfig;

#[derive(Debug)]
pub enum ConfigError {
    Missing { name: &'static str },
    Invalid { name: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing { name } => {
                write!(f, "environment variable {} unset", name)
            }
            ConfigError::Invalid { name, value } => {
                write!(f, "environment variable {} has invalid value '{}'", name, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Everything the daemon reads from the environment, loaded once at start.
#[derive(Debug, Clone)]
pub struct Config {
    /// NATS server URL.
    pub nats_url: String,
    /// JetStream stream holding FIXM deliveries.
    pub nats_stream: String,
    /// Subject the deliveries arrive on.
    pub nats_subject: String,
    /// InfluxDB base URL.
    pub influxdb_url: String,
    /// Database FIXM records are written to.
    pub influxdb_database: String,
    pub influxdb_username: String,
    pub influxdb_password: String,
    /// Retention duration for the default policy, e.g. `26w`.
    pub influxdb_retention_duration: String,
    /// Number of pipeline worker tasks.
    pub worker_threads: usize,
    /// Batch size that triggers a storage flush.
    pub batch_size: usize,
    /// Queue depth past which backpressure warnings are emitted.
    pub queue_high_water: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            nats_url: required("NATS_URL")?,
            nats_stream: optional("NATS_STREAM", "FIXM"),
            nats_subject: optional("NATS_SUBJECT", "fixm.messages"),
            influxdb_url: required("INFLUXDB_URL")?,
            influxdb_database: required("INFLUXDB_DB")?,
            influxdb_username: required("INFLUXDB_USER")?,
            influxdb_password: required("INFLUXDB_USER_PASSWORD")?,
            influxdb_retention_duration: required("INFLUXDB_RETENTION_DURATION")?,
            worker_threads: parsed("MESSAGE_HANDLER_THREADS", 1)?,
            batch_size: parsed("BATCH_SIZE", 50)?,
            queue_high_water: parsed("QUEUE_HIGH_WATER", 100)?,
        })
    }

    pub fn broker(&self) -> BrokerSettings {
        BrokerSettings {
            url: self.nats_url.clone(),
            stream: self.nats_stream.clone(),
            subject: self.nats_subject.clone(),
        }
    }

    pub fn influx(&self) -> InfluxSettings {
        InfluxSettings {
            url: self.influxdb_url.clone(),
            database: self.influxdb_database.clone(),
            username: self.influxdb_username.clone(),
            password: self.influxdb_password.clone(),
        }
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            workers: self.worker_threads,
            batch_size: self.batch_size,
            queue_high_water: self.queue_high_water,
            poll_interval: Duration::from_millis(250),
        }
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing { name })
}

fn optional(name: &'static str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parsed(name: &'static str, default: usize) -> Result<usize, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        Err(_) => Ok(default),
    }
}
