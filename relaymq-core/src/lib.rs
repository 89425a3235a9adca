//! Core types for the Relay MQ inbound delivery engine.
//!
//! This crate holds the leaf types shared by the engine and by broker-facing
//! collaborators: the error taxonomy, the XA transaction identifier and flag
//! constants, and the inbound message model.

#![warn(missing_docs)]

pub mod error;
pub mod message;
pub mod xid;

pub use error::{BrokerError, BrokerErrorKind, RelayError, Result};
pub use message::InboundMessage;
pub use xid::Xid;
