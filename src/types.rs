//! Core id, offset, and range types.

use crate::error::StreamError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::{Bound, RangeBounds};
use std::str::FromStr;

/// A concrete stream entry id.
///
/// Ids are:
/// - Two-component: a millisecond timestamp and a sequence within it
/// - Totally ordered: timestamp first, then sequence, both numerically
/// - Always rendered with both components (`"<timestamp>-<sequence>"`)
///
/// Symbolic ids (`-`, `+`, `$`, `>`, `*`) are never `StreamId` values. They are
/// expressed through [`Bound::Unbounded`], [`Offset::Latest`],
/// [`GroupOffset::Undelivered`] and auto-id appends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId {
    timestamp: u64,
    sequence: u64,
}

impl StreamId {
    /// The smallest possible id, `0-0`.
    pub const MIN: StreamId = StreamId::new(0, 0);
    /// The largest possible id.
    pub const MAX: StreamId = StreamId::new(u64::MAX, u64::MAX);

    pub const fn new(timestamp: u64, sequence: u64) -> Self {
        Self {
            timestamp,
            sequence,
        }
    }

    /// Parse from protocol text.
    ///
    /// Accepts `"<ts>"` (sequence 0) and `"<ts>-<seq>"`.
    ///
    /// # Example
    /// ```
    /// use xstream::StreamId;
    /// let id = StreamId::parse("1526919030474-55").unwrap();
    /// assert_eq!(id.timestamp(), 1526919030474);
    /// assert_eq!(StreamId::parse("42").unwrap(), StreamId::new(42, 0));
    /// ```
    pub fn parse(s: &str) -> Result<Self, StreamError> {
        if s.is_empty() {
            return Err(StreamError::parse(s, "empty id"));
        }

        let (ts, seq) = match s.split_once('-') {
            Some((ts, seq)) => (ts, Some(seq)),
            None => (s, None),
        };

        let timestamp = parse_component(s, ts)?;
        let sequence = match seq {
            Some(seq) => parse_component(s, seq)?,
            None => 0,
        };

        Ok(Self::new(timestamp, sequence))
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// The next id in stream order, or `None` at [`StreamId::MAX`].
    pub fn successor(&self) -> Option<StreamId> {
        match self.sequence.checked_add(1) {
            Some(seq) => Some(Self::new(self.timestamp, seq)),
            None => self
                .timestamp
                .checked_add(1)
                .map(|ts| Self::new(ts, 0)),
        }
    }

    /// The previous id in stream order, or `None` at [`StreamId::MIN`].
    pub fn predecessor(&self) -> Option<StreamId> {
        match self.sequence.checked_sub(1) {
            Some(seq) => Some(Self::new(self.timestamp, seq)),
            None => self
                .timestamp
                .checked_sub(1)
                .map(|ts| Self::new(ts, u64::MAX)),
        }
    }
}

fn parse_component(input: &str, part: &str) -> Result<u64, StreamError> {
    if part.is_empty() {
        return Err(StreamError::parse(input, "missing id component"));
    }
    // u64::from_str tolerates a leading '+', the protocol does not
    if !part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(StreamError::parse(input, "non-numeric id component"));
    }
    part.parse::<u64>()
        .map_err(|_| StreamError::parse(input, "id component out of range"))
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.timestamp, self.sequence)
    }
}

impl FromStr for StreamId {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StreamId::parse(s)
    }
}

impl TryFrom<&str> for StreamId {
    type Error = StreamError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        StreamId::parse(s)
    }
}

impl Serialize for StreamId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for StreamId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        StreamId::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Start position for non-group reads and consumer group cursors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Offset {
    /// Everything in the stream (renders `0-0`)
    #[default]
    Beginning,
    /// Only entries appended after the request is served (sentinel `$`)
    Latest,
    /// Entries strictly after a specific id
    At(StreamId),
}

impl Offset {
    /// Render as a request token.
    pub fn to_token(&self) -> String {
        match self {
            Offset::Beginning => StreamId::MIN.to_string(),
            Offset::Latest => "$".to_string(),
            Offset::At(id) => id.to_string(),
        }
    }

    /// Check if this is the latest sentinel
    pub fn is_latest(&self) -> bool {
        matches!(self, Offset::Latest)
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_token())
    }
}

impl From<StreamId> for Offset {
    fn from(id: StreamId) -> Self {
        Offset::At(id)
    }
}

/// Start position for consumer group reads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum GroupOffset {
    /// Entries never delivered to any consumer of the group (sentinel `>`)
    #[default]
    Undelivered,
    /// This consumer's own pending history, strictly after the given id
    Pending(StreamId),
}

impl GroupOffset {
    /// Render as a request token.
    pub fn to_token(&self) -> String {
        match self {
            GroupOffset::Undelivered => ">".to_string(),
            GroupOffset::Pending(id) => id.to_string(),
        }
    }
}

impl fmt::Display for GroupOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_token())
    }
}

/// A lower and upper bound over ids.
///
/// Exclusivity is preserved exactly as supplied. Whether `lower <= upper` is
/// left to the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RangeSpec<T = StreamId> {
    pub lower: Bound<T>,
    pub upper: Bound<T>,
}

impl<T> RangeSpec<T> {
    pub fn new(lower: Bound<T>, upper: Bound<T>) -> Self {
        Self { lower, upper }
    }

    /// The whole stream.
    pub fn unbounded() -> Self {
        Self::new(Bound::Unbounded, Bound::Unbounded)
    }

    /// Both ends inclusive.
    pub fn closed(lower: T, upper: T) -> Self {
        Self::new(Bound::Included(lower), Bound::Included(upper))
    }

    /// Both ends exclusive.
    pub fn open(lower: T, upper: T) -> Self {
        Self::new(Bound::Excluded(lower), Bound::Excluded(upper))
    }

    pub fn with_lower(mut self, lower: Bound<T>) -> Self {
        self.lower = lower;
        self
    }

    pub fn with_upper(mut self, upper: Bound<T>) -> Self {
        self.upper = upper;
        self
    }
}

impl<T: Clone> RangeSpec<T> {
    /// Build from any std range expression, e.g. `a..=b` or `a..`.
    pub fn from_bounds(range: impl RangeBounds<T>) -> Self {
        Self::new(range.start_bound().cloned(), range.end_bound().cloned())
    }
}

impl<T> Default for RangeSpec<T> {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl RangeSpec<StreamId> {
    /// Token for the lower bound: `-`, `<id>` or `(<id>`.
    pub fn lower_token(&self) -> String {
        bound_token(&self.lower, "-")
    }

    /// Token for the upper bound: `+`, `<id>` or `(<id>`.
    pub fn upper_token(&self) -> String {
        bound_token(&self.upper, "+")
    }

    /// Parse a rendered token pair back into a range.
    pub fn from_tokens(lower: &str, upper: &str) -> Result<Self, StreamError> {
        Ok(Self::new(
            parse_bound(lower, "-")?,
            parse_bound(upper, "+")?,
        ))
    }

    pub fn contains(&self, id: &StreamId) -> bool {
        let above = match &self.lower {
            Bound::Unbounded => true,
            Bound::Included(lo) => id >= lo,
            Bound::Excluded(lo) => id > lo,
        };
        let below = match &self.upper {
            Bound::Unbounded => true,
            Bound::Included(hi) => id <= hi,
            Bound::Excluded(hi) => id < hi,
        };
        above && below
    }
}

fn bound_token(bound: &Bound<StreamId>, unbounded: &str) -> String {
    match bound {
        Bound::Unbounded => unbounded.to_string(),
        Bound::Included(id) => id.to_string(),
        Bound::Excluded(id) => format!("({}", id),
    }
}

fn parse_bound(token: &str, unbounded: &str) -> Result<Bound<StreamId>, StreamError> {
    if token == unbounded {
        return Ok(Bound::Unbounded);
    }
    match token.strip_prefix('(') {
        Some(rest) => Ok(Bound::Excluded(StreamId::parse(rest)?)),
        None => Ok(Bound::Included(StreamId::parse(token)?)),
    }
}

/// Cap on the number of returned items.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Limit {
    count: Option<u64>,
}

impl Limit {
    /// No cap. The `COUNT` modifier is omitted from the request.
    pub const fn unlimited() -> Self {
        Self { count: None }
    }

    pub const fn count(count: u64) -> Self {
        Self { count: Some(count) }
    }

    pub fn get(&self) -> Option<u64> {
        self.count
    }

    pub fn is_unlimited(&self) -> bool {
        self.count.is_none()
    }
}

impl From<u64> for Limit {
    fn from(count: u64) -> Self {
        Limit::count(count)
    }
}

impl From<Option<u64>> for Limit {
    fn from(count: Option<u64>) -> Self {
        Self { count }
    }
}
