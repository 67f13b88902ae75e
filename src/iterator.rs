//! Paginated scans and live tailing with EntryIterator.

use crate::args::{ReadArgs, StreamOffset};
use crate::client::{ReadOutcome, StreamClient};
use crate::entry::Entry;
use crate::error::StreamError;
use crate::types::{Limit, Offset, RangeSpec, StreamId};
use futures::stream::{self, Stream};
use std::collections::VecDeque;
use std::ops::Bound;
use std::time::Duration;

/// One page of entries from a scan.
///
/// ## `up_to_date` Semantics
///
/// | Phase | `up_to_date == true` means |
/// |-------|----------------------------|
/// | **Catch-up** | The page was shorter than the page size: the range is drained |
/// | **Live** | A blocking read waited out its timeout with no new entries |
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Page {
    /// Entries in traversal order.
    pub entries: Vec<Entry>,
    /// Last id seen so far, the resume point for the next page.
    pub last_id: Option<StreamId>,
    /// Whether this page reached the current end of the range.
    pub up_to_date: bool,
}

/// Builder for configuring a scan.
#[derive(Debug)]
#[must_use = "builders do nothing unless you call .build()"]
pub struct ScanBuilder {
    client: StreamClient,
    key: String,
    range: RangeSpec<StreamId>,
    reverse: bool,
    page_size: u64,
    live: Option<Duration>,
}

impl ScanBuilder {
    pub(crate) fn new(client: StreamClient, key: String) -> Self {
        let page_size = client.page_size;
        Self {
            client,
            key,
            range: RangeSpec::unbounded(),
            reverse: false,
            page_size,
            live: None,
        }
    }

    /// Restrict the scan to a range. Defaults to the whole stream.
    pub fn range(mut self, range: RangeSpec<StreamId>) -> Self {
        self.range = range;
        self
    }

    /// Traverse from the upper bound down.
    pub fn reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    /// Entries fetched per request.
    pub fn page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Keep tailing after the catch-up pass, blocking up to `block` per read.
    ///
    /// Requires a forward scan with an unbounded upper end.
    pub fn live(mut self, block: Duration) -> Self {
        self.live = Some(block);
        self
    }

    /// Build the EntryIterator.
    ///
    /// No request is made until `next_page()` is called.
    pub fn build(self) -> EntryIterator {
        EntryIterator {
            client: self.client,
            key: self.key,
            range: self.range,
            reverse: self.reverse,
            page_size: self.page_size,
            live: self.live,
            last_id: None,
            caught_up: false,
            closed: false,
            done: false,
        }
    }
}

/// Iterator over a stream's entries, one page per request.
///
/// Each page re-issues the range with an exclusive bound at the last returned
/// id, so no server-side cursor is held between pages.
#[derive(Debug)]
pub struct EntryIterator {
    client: StreamClient,
    key: String,
    range: RangeSpec<StreamId>,
    reverse: bool,
    page_size: u64,
    live: Option<Duration>,
    last_id: Option<StreamId>,
    caught_up: bool,
    closed: bool,
    done: bool,
}

impl EntryIterator {
    /// Get the last id returned.
    pub fn last_id(&self) -> Option<StreamId> {
        self.last_id
    }

    /// Check if the catch-up pass has finished.
    pub fn is_up_to_date(&self) -> bool {
        self.caught_up
    }

    /// Close the iterator. Further calls to `next_page()` return `None`.
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Fetch the next page.
    pub async fn next_page(&mut self) -> Result<Option<Page>, StreamError> {
        if self.closed || self.done {
            return Ok(None);
        }

        if self.live.is_some() && (self.reverse || !matches!(self.range.upper, Bound::Unbounded)) {
            return Err(StreamError::Usage(
                "live scans must be forward with an unbounded upper end",
            ));
        }

        match (self.caught_up, self.live) {
            (true, Some(block)) => self.next_live(block).await.map(Some),
            _ => self.next_range().await,
        }
    }

    /// The remaining range, narrowed past the last id seen.
    fn remaining(&self) -> RangeSpec<StreamId> {
        match (self.last_id, self.reverse) {
            (None, _) => self.range.clone(),
            (Some(last), false) => self.range.clone().with_lower(Bound::Excluded(last)),
            (Some(last), true) => self.range.clone().with_upper(Bound::Excluded(last)),
        }
    }

    async fn next_range(&mut self) -> Result<Option<Page>, StreamError> {
        let range = self.remaining();
        let limit = Limit::count(self.page_size);

        let entries = if self.reverse {
            self.client
                .rev_range_with_limit(&self.key, &range, limit)
                .await?
        } else {
            self.client.range_with_limit(&self.key, &range, limit).await?
        };

        if let Some(last) = entries.last() {
            self.last_id = Some(last.id);
        }

        let up_to_date = (entries.len() as u64) < self.page_size;
        if up_to_date {
            self.caught_up = true;
            if self.live.is_none() {
                self.done = true;
                if entries.is_empty() {
                    return Ok(None);
                }
            }
        }

        Ok(Some(Page {
            entries,
            last_id: self.last_id,
            up_to_date,
        }))
    }

    /// Where live reads resume: strictly after the last id, or just below the lower bound.
    fn live_offset(&self) -> Offset {
        if let Some(last) = self.last_id {
            return Offset::At(last);
        }
        match self.range.lower {
            Bound::Unbounded => Offset::Beginning,
            Bound::Excluded(id) => Offset::At(id),
            Bound::Included(id) => id.predecessor().map(Offset::At).unwrap_or(Offset::Beginning),
        }
    }

    async fn next_live(&mut self, block: Duration) -> Result<Page, StreamError> {
        let args = ReadArgs::new().count(self.page_size).block(block);
        let streams = [StreamOffset::new(self.key.clone(), self.live_offset())];

        match self.client.read_with(&args, &streams).await? {
            ReadOutcome::TimedOut => Ok(Page {
                entries: Vec::new(),
                last_id: self.last_id,
                up_to_date: true,
            }),
            ReadOutcome::Messages(messages) => {
                let entries: Vec<Entry> = messages.into_iter().map(|m| m.entry).collect();
                if let Some(last) = entries.last() {
                    self.last_id = Some(last.id);
                }
                Ok(Page {
                    up_to_date: entries.is_empty(),
                    entries,
                    last_id: self.last_id,
                })
            }
        }
    }

    /// Flatten pages into a stream of entries.
    ///
    /// In live mode the stream does not end on its own; drop it to stop.
    pub fn into_stream(self) -> impl Stream<Item = Result<Entry, StreamError>> {
        stream::unfold(
            (self, VecDeque::new()),
            |(mut iter, mut buffered): (EntryIterator, VecDeque<Entry>)| async move {
                loop {
                    if let Some(entry) = buffered.pop_front() {
                        return Some((Ok(entry), (iter, buffered)));
                    }
                    match iter.next_page().await {
                        Ok(Some(page)) => buffered.extend(page.entries),
                        Ok(None) => return None,
                        Err(e) => {
                            iter.close();
                            return Some((Err(e), (iter, buffered)));
                        }
                    }
                }
            },
        )
    }
}
