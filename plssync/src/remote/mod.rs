//! Talking to one automation server over its HTTP `action=` API.

pub mod client;
pub mod transport;
pub mod wire;

pub use client::{RemoteSourceClient, SourceSettings};
pub use transport::{HttpReply, HttpTransport, Timeouts, UreqTransport};
