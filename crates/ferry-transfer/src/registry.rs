//! Transfer registry: the receiving side's long-lived state.
//!
//! Each inbound stream is serviced independently against the shared sink.
//! The only state shared between streams is the completed-transfer count,
//! which lives in a watch channel so observers always see the latest value.

use std::sync::Arc;

use tokio::sync::watch;

use ferry_core::Acknowledgment;

use crate::receiver;
use crate::sink::DurableSink;
use crate::stream::InboundStream;

pub struct TransferRegistry {
    my_id: String,
    sink: Arc<dyn DurableSink>,
    completed: watch::Sender<u64>,
}

impl TransferRegistry {
    pub fn new(my_id: impl Into<String>, sink: Arc<dyn DurableSink>) -> Self {
        let (completed, _) = watch::channel(0);
        Self { my_id: my_id.into(), sink, completed }
    }

    pub fn my_id(&self) -> &str {
        &self.my_id
    }

    /// Number of transfers that have completed successfully.
    pub fn completed(&self) -> u64 {
        *self.completed.borrow()
    }

    /// Watch the completed-transfer count. Intermediate values may be
    /// skipped by a slow observer; the latest one never is.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.completed.subscribe()
    }

    /// Bump the completed count and wake observers. Returns the new count.
    pub fn increment_completed(&self) -> u64 {
        let mut count = 0;
        self.completed.send_modify(|c| {
            *c += 1;
            count = *c;
        });
        count
    }

    /// Service one inbound stream to completion.
    pub async fn serve<S: InboundStream>(&self, mut stream: S) -> Acknowledgment {
        let ack = receiver::receive(&mut stream, self.sink.as_ref(), &self.my_id).await;
        if ack.is_success() {
            let count = self.increment_completed();
            tracing::debug!(my_id = %self.my_id, name = %ack.filepath, count, "completed transfers");
        }
        ack
    }
}
