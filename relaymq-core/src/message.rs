//! The inbound message model.
//!
//! Wire-level encoding and decoding belongs to the broker client; by the time
//! a message reaches the delivery engine it is an [`InboundMessage`]: an id,
//! a destination name, an immutable body with a read cursor, and the
//! redelivery bookkeeping the engine maintains across delivery attempts.

use bytes::Bytes;

/// A message handed to the delivery engine by the consumer/session layer.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    id: u64,
    destination: String,
    body: Bytes,
    cursor: usize,
    delivery_count: u32,
    redelivered: bool,
    client_retries: u32,
}

impl InboundMessage {
    /// Creates a message as received from the broker.
    ///
    /// The broker stamps the delivery count starting at 1 for the first
    /// delivery of a message.
    pub fn new(id: u64, destination: impl Into<String>, body: Bytes) -> Self {
        Self {
            id,
            destination: destination.into(),
            body,
            cursor: 0,
            delivery_count: 1,
            redelivered: false,
            client_retries: 0,
        }
    }

    /// Creates a message carrying a broker-stamped delivery count.
    pub fn with_delivery_count(
        id: u64,
        destination: impl Into<String>,
        body: Bytes,
        delivery_count: u32,
    ) -> Self {
        let mut message = Self::new(id, destination, body);
        message.delivery_count = delivery_count;
        message.redelivered = delivery_count > 1;
        message
    }

    /// Returns the broker-assigned message id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the destination this message was consumed from.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Returns the full message body, ignoring the read cursor.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns the number of unread body bytes.
    pub fn remaining(&self) -> usize {
        self.body.len() - self.cursor
    }

    /// Reads up to `len` bytes from the body, advancing the cursor.
    pub fn read(&mut self, len: usize) -> Bytes {
        let end = (self.cursor + len).min(self.body.len());
        let chunk = self.body.slice(self.cursor..end);
        self.cursor = end;
        chunk
    }

    /// Rewinds the body cursor to the beginning.
    ///
    /// A failed endpoint may have consumed part of a stream or bytes body;
    /// the redelivery loop rewinds before every retry so the endpoint sees
    /// the message exactly as first delivered.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    /// Returns the number of times delivery of this message has been
    /// attempted, including the current attempt.
    pub fn delivery_count(&self) -> u32 {
        self.delivery_count
    }

    /// Stamps the delivery count observed by downstream consumers.
    pub fn update_delivery_count(&mut self, count: u32) {
        self.delivery_count = count;
    }

    /// Returns true if this message is being redelivered.
    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    /// Marks the message as redelivered.
    pub fn set_redelivered(&mut self, redelivered: bool) {
        self.redelivered = redelivered;
    }

    /// Returns the number of in-process retries of the current delivery.
    pub fn client_retries(&self) -> u32 {
        self.client_retries
    }

    /// Records the number of in-process retries of the current delivery.
    pub fn set_client_retries(&mut self, retries: u32) {
        self.client_retries = retries;
    }
}
