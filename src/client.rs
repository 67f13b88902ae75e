//! Stream client and configuration.

use crate::args::{AddArgs, ClaimArgs, GroupCreateArgs, GroupStream, ReadArgs, StreamOffset};
use crate::command::{self, duration_millis, CommandName, Request};
use crate::entry::{ConsumerRef, Entry, Fields, PendingEntry, PendingSummary, StreamMessage};
use crate::error::StreamError;
use crate::iterator::ScanBuilder;
use crate::reply::{self, Reply};
use crate::transport::{BlockingReply, CommandTransport};
use crate::types::{Limit, Offset, RangeSpec, StreamId};
use std::sync::Arc;
use std::time::Duration;

/// Default slack on top of a blocking read's own timeout before the client gives up locally.
const DEFAULT_BLOCK_GRACE: Duration = Duration::from_secs(1);

/// Default number of entries fetched per page by [`StreamClient::scan`].
const DEFAULT_PAGE_SIZE: u64 = 100;

/// Result of a read that may block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Entries grouped by requested stream order, ascending ids within each.
    /// Empty when a non-blocking read found nothing.
    Messages(Vec<StreamMessage>),
    /// A blocking read waited out its timeout with nothing to return.
    TimedOut,
}

impl ReadOutcome {
    pub fn is_timed_out(&self) -> bool {
        matches!(self, ReadOutcome::TimedOut)
    }

    /// The messages read; empty on timeout.
    pub fn into_messages(self) -> Vec<StreamMessage> {
        match self {
            ReadOutcome::Messages(messages) => messages,
            ReadOutcome::TimedOut => Vec::new(),
        }
    }
}

/// A stream command client.
///
/// The client is cloneable and holds no server state: every call is one
/// request/response over the transport, so independent clients (or clones
/// over independent transports) can be used concurrently.
#[derive(Clone)]
pub struct StreamClient {
    pub(crate) transport: Arc<dyn CommandTransport>,
    pub(crate) block_grace: Duration,
    pub(crate) page_size: u64,
}

impl std::fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClient")
            .field("block_grace", &self.block_grace)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

impl StreamClient {
    /// Create a client over a transport with default settings.
    pub fn new(transport: impl CommandTransport + 'static) -> Self {
        ClientBuilder::new(Arc::new(transport)).build()
    }

    /// Create a client builder for customization.
    pub fn builder(transport: Arc<dyn CommandTransport>) -> ClientBuilder {
        ClientBuilder::new(transport)
    }

    /// Create a paginated scan over one stream.
    ///
    /// No request is made until the first page is fetched.
    pub fn scan(&self, key: impl Into<String>) -> ScanBuilder {
        ScanBuilder::new(self.clone(), key.into())
    }

    async fn execute(&self, request: Request) -> Result<Reply, StreamError> {
        tracing::debug!(
            command = request.name().as_str(),
            key = request.key().unwrap_or_default(),
            "sending stream command"
        );
        Ok(self.transport.send(&request).await?)
    }

    /// Send a read, blocking when `block` is set. `None` means timed out.
    async fn execute_read(
        &self,
        request: Request,
        block: Option<Duration>,
    ) -> Result<Option<Reply>, StreamError> {
        let Some(block) = block else {
            return self.execute(request).await.map(Some);
        };

        tracing::debug!(
            command = request.name().as_str(),
            block_ms = duration_millis(block),
            "sending blocking stream read"
        );

        let pending = self.transport.send_blocking(&request, block);
        // no local deadline for an infinite block or one too large to represent
        let deadline = (!block.is_zero())
            .then(|| block.checked_add(self.block_grace))
            .flatten();
        let outcome = match deadline {
            None => pending.await?,
            Some(deadline) => match tokio::time::timeout(deadline, pending).await {
                Ok(result) => result?,
                Err(_) => {
                    tracing::warn!(
                        command = request.name().as_str(),
                        block_ms = duration_millis(block),
                        "transport overran blocking read deadline"
                    );
                    BlockingReply::TimedOut
                }
            },
        };

        match outcome {
            // the server answers nil when the block timeout elapses
            BlockingReply::Reply(Reply::Nil) | BlockingReply::TimedOut => {
                tracing::debug!(command = request.name().as_str(), "blocking read timed out");
                Ok(None)
            }
            BlockingReply::Reply(reply) => Ok(Some(reply)),
        }
    }

    /// Acknowledge entries, removing them from the group's pending list.
    ///
    /// Returns how many were actually removed. Unknown or already acknowledged
    /// ids count as zero.
    pub async fn ack(&self, key: &str, group: &str, ids: &[StreamId]) -> Result<u64, StreamError> {
        let request = command::xack(key, group, ids)?;
        reply::decode_count(CommandName::Xack, self.execute(request).await?)
    }

    /// Append an entry with a server-assigned id.
    pub async fn add(&self, key: &str, body: &Fields) -> Result<StreamId, StreamError> {
        self.add_with(key, &AddArgs::default(), body).await
    }

    /// Append an entry with options.
    ///
    /// An explicit id that does not exceed the stream's top id fails with
    /// [`StreamError::IdOrdering`]. Nothing is retried.
    pub async fn add_with(
        &self,
        key: &str,
        args: &AddArgs,
        body: &Fields,
    ) -> Result<StreamId, StreamError> {
        let request = command::xadd(key, args, body)?;
        reply::decode_id(CommandName::Xadd, self.execute(request).await?)
    }

    /// Transfer ownership of pending entries to `consumer`.
    ///
    /// Entries below `args.min_idle` or not pending are left out of the result.
    pub async fn claim(
        &self,
        key: &str,
        consumer: &ConsumerRef,
        args: &ClaimArgs,
        ids: &[StreamId],
    ) -> Result<Vec<Entry>, StreamError> {
        let request = command::xclaim(key, consumer, args, ids)?;
        reply::decode_entries(CommandName::Xclaim, self.execute(request).await?)
    }

    /// Like [`claim`](Self::claim) but returns only the claimed ids.
    pub async fn claim_ids(
        &self,
        key: &str,
        consumer: &ConsumerRef,
        args: &ClaimArgs,
        ids: &[StreamId],
    ) -> Result<Vec<StreamId>, StreamError> {
        let request = command::xclaim_just_id(key, consumer, args, ids)?;
        reply::decode_ids(CommandName::Xclaim, self.execute(request).await?)
    }

    /// Create a consumer group.
    ///
    /// Fails with [`StreamError::GroupAlreadyExists`] if the group exists.
    pub async fn group_create(
        &self,
        key: &str,
        group: &str,
        offset: Offset,
    ) -> Result<(), StreamError> {
        self.group_create_with(key, group, offset, &GroupCreateArgs::default())
            .await
    }

    /// Create a consumer group with options.
    pub async fn group_create_with(
        &self,
        key: &str,
        group: &str,
        offset: Offset,
        args: &GroupCreateArgs,
    ) -> Result<(), StreamError> {
        let request = command::xgroup_create(key, group, offset, args)?;
        reply::decode_ok(CommandName::XgroupCreate, self.execute(request).await?)
    }

    /// Reposition a group's delivery cursor. Pending entries are untouched.
    pub async fn group_set_id(
        &self,
        key: &str,
        group: &str,
        offset: Offset,
    ) -> Result<(), StreamError> {
        let request = command::xgroup_setid(key, group, offset)?;
        reply::decode_ok(CommandName::XgroupSetid, self.execute(request).await?)
    }

    /// Remove a consumer from its group.
    ///
    /// Returns the number of pending entries it owned at the time.
    pub async fn group_delete_consumer(
        &self,
        key: &str,
        consumer: &ConsumerRef,
    ) -> Result<u64, StreamError> {
        let request = command::xgroup_delconsumer(key, consumer);
        reply::decode_count(
            CommandName::XgroupDelconsumer,
            self.execute(request).await?,
        )
    }

    /// Number of entries in the stream; zero when it does not exist.
    pub async fn len(&self, key: &str) -> Result<u64, StreamError> {
        reply::decode_count(CommandName::Xlen, self.execute(command::xlen(key)).await?)
    }

    /// All pending entries of a group.
    pub async fn pending(&self, key: &str, group: &str) -> Result<Vec<PendingEntry>, StreamError> {
        self.pending_range(key, group, &RangeSpec::unbounded(), Limit::unlimited())
            .await
    }

    /// All pending entries owned by one consumer.
    pub async fn pending_for(
        &self,
        key: &str,
        consumer: &ConsumerRef,
    ) -> Result<Vec<PendingEntry>, StreamError> {
        self.pending_range_for(key, consumer, &RangeSpec::unbounded(), Limit::unlimited())
            .await
    }

    /// Pending entries of a group within `range`, capped by `limit`.
    pub async fn pending_range(
        &self,
        key: &str,
        group: &str,
        range: &RangeSpec<StreamId>,
        limit: Limit,
    ) -> Result<Vec<PendingEntry>, StreamError> {
        let request = command::xpending(key, group, None, range, limit)?;
        reply::decode_pending(CommandName::Xpending, self.execute(request).await?)
    }

    /// Pending entries owned by one consumer within `range`, capped by `limit`.
    pub async fn pending_range_for(
        &self,
        key: &str,
        consumer: &ConsumerRef,
        range: &RangeSpec<StreamId>,
        limit: Limit,
    ) -> Result<Vec<PendingEntry>, StreamError> {
        let request = command::xpending(
            key,
            consumer.group(),
            Some(consumer.consumer()),
            range,
            limit,
        )?;
        reply::decode_pending(CommandName::Xpending, self.execute(request).await?)
    }

    /// Summary of a group's pending entries: count, id span, per-consumer counts.
    pub async fn pending_summary(
        &self,
        key: &str,
        group: &str,
    ) -> Result<PendingSummary, StreamError> {
        let request = command::xpending_summary(key, group)?;
        reply::decode_pending_summary(CommandName::Xpending, self.execute(request).await?)
    }

    /// Entries within `range`, ascending.
    pub async fn range(
        &self,
        key: &str,
        range: &RangeSpec<StreamId>,
    ) -> Result<Vec<Entry>, StreamError> {
        self.range_with_limit(key, range, Limit::unlimited()).await
    }

    /// Entries within `range`, ascending, at most `limit` of them.
    pub async fn range_with_limit(
        &self,
        key: &str,
        range: &RangeSpec<StreamId>,
        limit: Limit,
    ) -> Result<Vec<Entry>, StreamError> {
        let request = command::xrange(key, range, limit);
        reply::decode_entries(CommandName::Xrange, self.execute(request).await?)
    }

    /// Entries within `range`, descending.
    pub async fn rev_range(
        &self,
        key: &str,
        range: &RangeSpec<StreamId>,
    ) -> Result<Vec<Entry>, StreamError> {
        self.rev_range_with_limit(key, range, Limit::unlimited()).await
    }

    /// Entries within `range`, descending, at most `limit` of them.
    pub async fn rev_range_with_limit(
        &self,
        key: &str,
        range: &RangeSpec<StreamId>,
        limit: Limit,
    ) -> Result<Vec<Entry>, StreamError> {
        let request = command::xrevrange(key, range, limit);
        reply::decode_entries(CommandName::Xrevrange, self.execute(request).await?)
    }

    /// Read from one or more streams without blocking.
    pub async fn read(&self, streams: &[StreamOffset]) -> Result<Vec<StreamMessage>, StreamError> {
        let request = command::xread(&ReadArgs::default(), streams)?;
        reply::decode_messages(CommandName::Xread, self.execute(request).await?)
    }

    /// Read from one or more streams with options, possibly blocking.
    pub async fn read_with(
        &self,
        args: &ReadArgs,
        streams: &[StreamOffset],
    ) -> Result<ReadOutcome, StreamError> {
        let request = command::xread(args, streams)?;
        self.read_outcome(CommandName::Xread, request, args.block)
            .await
    }

    /// Read entries never delivered to the consumer's group from each stream.
    pub async fn read_group(
        &self,
        consumer: &ConsumerRef,
        keys: &[&str],
    ) -> Result<Vec<StreamMessage>, StreamError> {
        let streams: Vec<GroupStream> = keys.iter().map(|k| GroupStream::undelivered(*k)).collect();
        let request = command::xreadgroup(consumer, &ReadArgs::default(), &streams)?;
        reply::decode_messages(CommandName::Xreadgroup, self.execute(request).await?)
    }

    /// Group read with explicit per-stream offsets and options, possibly blocking.
    pub async fn read_group_with(
        &self,
        consumer: &ConsumerRef,
        args: &ReadArgs,
        streams: &[GroupStream],
    ) -> Result<ReadOutcome, StreamError> {
        let request = command::xreadgroup(consumer, args, streams)?;
        self.read_outcome(CommandName::Xreadgroup, request, args.block)
            .await
    }

    async fn read_outcome(
        &self,
        name: CommandName,
        request: Request,
        block: Option<Duration>,
    ) -> Result<ReadOutcome, StreamError> {
        match self.execute_read(request, block).await? {
            Some(reply) => Ok(ReadOutcome::Messages(reply::decode_messages(name, reply)?)),
            None => Ok(ReadOutcome::TimedOut),
        }
    }
}

/// Builder for configuring a [`StreamClient`].
#[must_use = "builders do nothing unless you call .build()"]
pub struct ClientBuilder {
    transport: Arc<dyn CommandTransport>,
    block_grace: Duration,
    page_size: u64,
}

impl ClientBuilder {
    /// Create a new client builder.
    pub fn new(transport: Arc<dyn CommandTransport>) -> Self {
        Self {
            transport,
            block_grace: DEFAULT_BLOCK_GRACE,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Extra time granted to the transport beyond a read's block timeout.
    ///
    /// When it also elapses the read resolves as timed out.
    pub fn block_grace(mut self, grace: Duration) -> Self {
        self.block_grace = grace;
        self
    }

    /// Default page size for scans.
    pub fn page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Build the client.
    pub fn build(self) -> StreamClient {
        StreamClient {
            transport: self.transport,
            block_grace: self.block_grace,
            page_size: self.page_size,
        }
    }
}
