//! xstream
//!
//! A typed client command layer for Redis-style append-only streams and
//! consumer groups: id and range modeling, request rendering, and reply
//! decoding over a pluggable transport.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use xstream::{
//!     CommandTransport, ConsumerRef, Fields, Offset, RangeSpec, StreamClient,
//! };
//!
//! async fn run(transport: impl CommandTransport + 'static) -> Result<(), xstream::StreamError> {
//!     let client = StreamClient::new(transport);
//!
//!     // Append an entry
//!     let body = Fields::try_from_pairs([("sensor", "t1"), ("celsius", "21.5")])?;
//!     let id = client.add("readings", &body).await?;
//!     println!("appended {}", id);
//!
//!     // Scan the whole stream
//!     for entry in client.range("readings", &RangeSpec::unbounded()).await? {
//!         println!("{} has {} fields", entry.id, entry.fields.len());
//!     }
//!
//!     // Consume through a group
//!     client.group_create("readings", "alerts", Offset::Beginning).await?;
//!     let consumer = ConsumerRef::new("alerts", "worker-1")?;
//!     for message in client.read_group(&consumer, &["readings"]).await? {
//!         client.ack("readings", "alerts", &[message.id()]).await?;
//!     }
//!
//!     Ok(())
//! }
//! ```

mod args;
mod client;
pub mod command;
mod entry;
mod error;
mod iterator;
pub mod reply;
mod transport;
mod types;

pub use args::{AddArgs, ClaimArgs, GroupCreateArgs, GroupStream, ReadArgs, StreamOffset};
pub use client::{ClientBuilder, ReadOutcome, StreamClient};
pub use command::{CommandName, Request};
pub use entry::{
    ConsumerPending, ConsumerRef, Entry, Fields, PendingEntry, PendingSummary, StreamMessage,
};
pub use error::{StreamError, TransportError};
pub use iterator::{EntryIterator, Page, ScanBuilder};
pub use reply::Reply;
pub use transport::{BlockingReply, CommandTransport};
pub use types::{GroupOffset, Limit, Offset, RangeSpec, StreamId};
