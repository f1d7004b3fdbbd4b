//! Message intake: splits one broker delivery into individual messages and
//! enqueues them onto the pipeline's shared queue.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::element::{parse_collection, Element, ParseError};

/// Enqueue handle for the delivery path. Obtained from
/// [`Pipeline::intake`](crate::pipeline::Pipeline::intake); cheap to clone.
#[derive(Clone)]
pub struct Intake {
    sender: mpsc::UnboundedSender<Element>,
    depth: Arc<AtomicUsize>,
}

impl Intake {
    pub(crate) fn new(sender: mpsc::UnboundedSender<Element>, depth: Arc<AtomicUsize>) -> Self {
        Self { sender, depth }
    }

    /// Parse a delivery payload as a message collection and enqueue each
    /// child message. Returns the number of messages enqueued.
    ///
    /// Parsing happens before any enqueue, so a malformed payload drops the
    /// whole delivery — there is no partial enqueue. The enqueue itself
    /// never blocks the delivery path.
    pub fn on_delivery(&self, payload: &[u8]) -> Result<usize, ParseError> {
        let messages = parse_collection(payload)?;

        let mut enqueued = 0;
        for message in messages {
            // Send only fails once the pipeline has shut down; anything
            // still in flight is dropped with it.
            if self.sender.send(message).is_ok() {
                self.depth.fetch_add(1, Ordering::Relaxed);
                enqueued += 1;
            }
        }
        Ok(enqueued)
    }

    /// Current queue depth, as observed by the delivery path.
    pub fn queue_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intake() -> (Intake, mpsc::UnboundedReceiver<Element>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Intake::new(sender, Arc::new(AtomicUsize::new(0))), receiver)
    }

    #[test]
    fn test_on_delivery_enqueues_each_message() {
        let (intake, mut receiver) = intake();

        let enqueued = intake
            .on_delivery(b"<c><m1><a/></m1><m2/><m3/></c>")
            .unwrap();
        assert_eq!(enqueued, 3);
        assert_eq!(intake.queue_depth(), 3);

        assert_eq!(receiver.try_recv().unwrap().tag, "m1");
        assert_eq!(receiver.try_recv().unwrap().tag, "m2");
        assert_eq!(receiver.try_recv().unwrap().tag, "m3");
    }

    #[test]
    fn test_on_delivery_malformed_enqueues_nothing() {
        let (intake, mut receiver) = intake();

        assert!(intake.on_delivery(b"<c><m1></c>").is_err());
        assert_eq!(intake.queue_depth(), 0);
        assert!(receiver.try_recv().is_err());
    }
}
