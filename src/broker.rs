//! NATS JetStream broker collaborator.
//!
//! Owns connection establishment (retry-with-delay until success), stream
//! declaration, and the delivery loop. Deliveries are acknowledged eagerly —
//! a delivery is considered complete once it reaches the intake, regardless
//! of downstream success.

use std::time::Duration;

use async_nats::jetstream::{self, consumer::pull};
use futures::StreamExt;

use crate::intake::Intake;

/// Delay between connection attempts.
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Durable consumer name on the FIXM stream.
const CONSUMER_NAME: &str = "fixm-journaler";

#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub url: String,
    pub stream: String,
    pub subject: String,
}

/// Connected JetStream consumer feeding the intake.
pub struct Broker {
    jetstream: jetstream::Context,
    settings: BrokerSettings,
}

impl Broker {
    /// Connect to NATS, retrying until the server is reachable, and declare
    /// the FIXM stream if it does not already exist.
    pub async fn connect(settings: BrokerSettings) -> Result<Self, async_nats::Error> {
        let client = loop {
            match async_nats::connect(&settings.url).await {
                Ok(client) => break client,
                Err(err) => {
                    tracing::error!(error = %err, "connection error while connecting to NATS, retrying");
                    tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                }
            }
        };
        tracing::info!(url = %settings.url, "connected to NATS");

        let jetstream = jetstream::new(client);
        jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: settings.stream.clone(),
                subjects: vec![settings.subject.clone()],
                ..Default::default()
            })
            .await?;
        tracing::info!(stream = %settings.stream, "JetStream stream ready");

        Ok(Self {
            jetstream,
            settings,
        })
    }

    /// Consume deliveries until the stream ends, handing each payload to
    /// the intake. One delivery carries one message collection.
    pub async fn consume(&self, intake: Intake) -> Result<(), async_nats::Error> {
        let stream = self.jetstream.get_stream(self.settings.stream.as_str()).await?;
        let consumer = stream
            .get_or_create_consumer(
                CONSUMER_NAME,
                pull::Config {
                    durable_name: Some(CONSUMER_NAME.to_string()),
                    ..Default::default()
                },
            )
            .await?;

        let mut deliveries = consumer.messages().await?;
        while let Some(delivery) = deliveries.next().await {
            let delivery = match delivery {
                Ok(delivery) => delivery,
                Err(err) => {
                    tracing::error!(error = %err, "failed to receive delivery");
                    continue;
                }
            };

            // Eager ack: auto-ack semantics, the broker will not redeliver.
            if let Err(err) = delivery.ack().await {
                tracing::warn!(error = %err, "failed to acknowledge delivery");
            }

            match intake.on_delivery(&delivery.payload) {
                Ok(enqueued) => {
                    tracing::debug!(messages = enqueued, "enqueued delivery");
                }
                Err(err) => {
                    tracing::error!(error = %err, "dropping malformed delivery");
                }
            }
        }

        Ok(())
    }
}
