//thiserror-based error types: how each link failure is classified
use link_protocol::{FrameError, StoreError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LinkError {
    /// Missing or corrupt shared document. Fatal only before the first bind.
    #[error("config unavailable: {0}")] ConfigUnavailable(#[from] StoreError),
    /// Fatal at startup, retried on the next tick during reconfiguration.
    #[error("bind to UDP port {port} failed: {source}")] Bind {
        port: u16,
        #[source] source: std::io::Error,
    },
    /// Wrong-length datagram; dropped without a reading.
    #[error("malformed frame: {0}")] MalformedFrame(#[from] FrameError),
    /// Log or document write failure; logged and swallowed.
    #[error("transient I/O failure ({context}): {source}")] TransientIo {
        context: &'static str,
        #[source] source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl LinkError {
    pub fn transient(context: &'static str, source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        LinkError::TransientIo { context, source: source.into() }
    }
}
