//! The transport seam.
//!
//! Networking, wire encoding, pooling and authentication live behind
//! [`CommandTransport`]. The client only renders [`Request`]s and decodes
//! [`Reply`]s.

use crate::command::Request;
use crate::error::TransportError;
use crate::reply::Reply;
use async_trait::async_trait;
use std::time::Duration;

/// Outcome of a blocking send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockingReply {
    Reply(Reply),
    /// The deadline passed before the server replied.
    TimedOut,
}

/// Request/response capability over one logical connection.
///
/// Requests on one handle are processed in submission order. A handle that is
/// blocked in [`send_blocking`](Self::send_blocking) must not be shared with
/// other callers for the duration; use a dedicated handle for blocking reads.
#[async_trait]
pub trait CommandTransport: Send + Sync {
    /// Send a request and wait for its reply.
    async fn send(&self, request: &Request) -> Result<Reply, TransportError>;

    /// Send a request that may block server-side for up to `timeout`.
    ///
    /// A zero `timeout` waits indefinitely. Closing the handle while blocked
    /// must resolve with [`TransportError::Closed`].
    async fn send_blocking(
        &self,
        request: &Request,
        timeout: Duration,
    ) -> Result<BlockingReply, TransportError>;
}
