//! Per-operation option builders.

use crate::types::{GroupOffset, Offset, StreamId};
use std::time::Duration;

/// Options for appending to a stream.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct AddArgs {
    /// Explicit id. `None` lets the server assign one (`*`).
    pub id: Option<StreamId>,
    /// Trim the stream to at most this many entries.
    pub max_len: Option<u64>,
    /// Allow the server to trim lazily (`MAXLEN ~`).
    pub approximate_trimming: bool,
}

impl AddArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append with an explicit id, which must exceed the stream's current top id.
    pub fn id(mut self, id: StreamId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn max_len(mut self, max_len: u64) -> Self {
        self.max_len = Some(max_len);
        self
    }

    pub fn approximate_trimming(mut self, approximate: bool) -> Self {
        self.approximate_trimming = approximate;
        self
    }
}

/// Options for `XREAD` / `XREADGROUP`.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct ReadArgs {
    /// Maximum entries per stream.
    pub count: Option<u64>,
    /// Block up to this long when nothing is available. Zero waits indefinitely.
    pub block: Option<Duration>,
    /// Group reads only: do not add delivered entries to the pending list.
    pub no_ack: bool,
}

impl ReadArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }

    pub fn block(mut self, timeout: Duration) -> Self {
        self.block = Some(timeout);
        self
    }

    pub fn no_ack(mut self, no_ack: bool) -> Self {
        self.no_ack = no_ack;
        self
    }

    pub fn is_blocking(&self) -> bool {
        self.block.is_some()
    }
}

/// Options for `XCLAIM`.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct ClaimArgs {
    /// Only claim entries idle for at least this long.
    pub min_idle: Duration,
    /// Set the idle time of claimed entries (`IDLE`).
    pub idle: Option<Duration>,
    /// Set the last delivery time as unix millis (`TIME`).
    pub time: Option<u64>,
    /// Set the delivery counter (`RETRYCOUNT`).
    pub retry_count: Option<u64>,
    /// Create pending entries for ids not yet pending (`FORCE`).
    pub force: bool,
}

impl ClaimArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn min_idle(mut self, min_idle: Duration) -> Self {
        self.min_idle = min_idle;
        self
    }

    pub fn idle(mut self, idle: Duration) -> Self {
        self.idle = Some(idle);
        self
    }

    pub fn time(mut self, unix_millis: u64) -> Self {
        self.time = Some(unix_millis);
        self
    }

    pub fn retry_count(mut self, count: u64) -> Self {
        self.retry_count = Some(count);
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// Options for `XGROUP CREATE`.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct GroupCreateArgs {
    /// Create an empty stream if the key does not exist.
    pub mkstream: bool,
}

impl GroupCreateArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mkstream(mut self, mkstream: bool) -> Self {
        self.mkstream = mkstream;
        self
    }
}

/// A stream key and where to start reading it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamOffset {
    pub key: String,
    pub offset: Offset,
}

impl StreamOffset {
    pub fn new(key: impl Into<String>, offset: impl Into<Offset>) -> Self {
        Self {
            key: key.into(),
            offset: offset.into(),
        }
    }

    pub fn from_beginning(key: impl Into<String>) -> Self {
        Self::new(key, Offset::Beginning)
    }

    pub fn latest(key: impl Into<String>) -> Self {
        Self::new(key, Offset::Latest)
    }
}

/// A stream key and where a group read starts in it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupStream {
    pub key: String,
    pub offset: GroupOffset,
}

impl GroupStream {
    pub fn new(key: impl Into<String>, offset: GroupOffset) -> Self {
        Self {
            key: key.into(),
            offset,
        }
    }

    /// Entries never delivered to the group.
    pub fn undelivered(key: impl Into<String>) -> Self {
        Self::new(key, GroupOffset::Undelivered)
    }

    /// The consumer's own pending entries after `after`.
    pub fn pending(key: impl Into<String>, after: StreamId) -> Self {
        Self::new(key, GroupOffset::Pending(after))
    }
}
