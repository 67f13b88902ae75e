//! Entry and consumer group value types.

use crate::error::StreamError;
use crate::types::StreamId;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Field/value body of an entry.
///
/// Insertion order is preserved and field names are unique.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Fields {
    pairs: Vec<(String, Bytes)>,
}

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field, rejecting a name that is already present.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<Bytes>,
    ) -> Result<(), StreamError> {
        let name = name.into();
        if self.contains(&name) {
            return Err(StreamError::Usage("duplicate field name"));
        }
        self.pairs.push((name, value.into()));
        Ok(())
    }

    /// Chained form of [`insert`](Self::insert).
    pub fn with(
        mut self,
        name: impl Into<String>,
        value: impl Into<Bytes>,
    ) -> Result<Self, StreamError> {
        self.insert(name, value)?;
        Ok(self)
    }

    /// Build from pairs, rejecting duplicate names.
    ///
    /// # Example
    /// ```
    /// use xstream::Fields;
    /// let body = Fields::try_from_pairs([("sensor", "t1"), ("celsius", "21.5")]).unwrap();
    /// assert_eq!(body.get("celsius").unwrap().as_ref(), b"21.5");
    /// assert!(Fields::try_from_pairs([("a", "1"), ("a", "2")]).is_err());
    /// ```
    pub fn try_from_pairs<N, V>(pairs: impl IntoIterator<Item = (N, V)>) -> Result<Self, StreamError>
    where
        N: Into<String>,
        V: Into<Bytes>,
    {
        let mut fields = Fields::new();
        for (name, value) in pairs {
            fields.insert(name, value)?;
        }
        Ok(fields)
    }

    pub fn get(&self, name: &str) -> Option<&Bytes> {
        self.pairs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pairs.iter().any(|(n, _)| n == name)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Bytes)> {
        self.pairs.iter().map(|(n, v)| (n.as_str(), v))
    }
}

impl<'a> IntoIterator for &'a Fields {
    type Item = &'a (String, Bytes);
    type IntoIter = std::slice::Iter<'a, (String, Bytes)>;

    fn into_iter(self) -> Self::IntoIter {
        self.pairs.iter()
    }
}

/// One immutable record of a stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub id: StreamId,
    pub fields: Fields,
}

impl Entry {
    pub fn new(id: StreamId, fields: Fields) -> Self {
        Self { id, fields }
    }
}

/// An entry tagged with the stream it was read from.
///
/// Only multi-stream reads produce these.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamMessage {
    pub stream: String,
    pub entry: Entry,
}

impl StreamMessage {
    pub fn id(&self) -> StreamId {
        self.entry.id
    }
}

/// A named consumer within a consumer group.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConsumerRef {
    group: String,
    consumer: String,
}

impl ConsumerRef {
    /// Both names must be non-empty.
    pub fn new(group: impl Into<String>, consumer: impl Into<String>) -> Result<Self, StreamError> {
        let group = group.into();
        let consumer = consumer.into();
        if group.is_empty() {
            return Err(StreamError::Usage("group name must not be empty"));
        }
        if consumer.is_empty() {
            return Err(StreamError::Usage("consumer name must not be empty"));
        }
        Ok(Self { group, consumer })
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn consumer(&self) -> &str {
        &self.consumer
    }
}

/// Point-in-time view of one delivered but unacknowledged entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingEntry {
    pub id: StreamId,
    /// Consumer currently owning the entry.
    pub consumer: String,
    /// Time since the entry was last delivered.
    #[serde(with = "millis")]
    pub idle: Duration,
    /// Number of times the entry has been delivered.
    pub delivery_count: u64,
}

/// Summary form of a group's pending entries list.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSummary {
    pub count: u64,
    /// Lowest and highest pending ids, absent when nothing is pending.
    pub lowest: Option<StreamId>,
    pub highest: Option<StreamId>,
    pub consumers: Vec<ConsumerPending>,
}

/// Pending count for one consumer within a [`PendingSummary`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerPending {
    pub consumer: String,
    pub pending: u64,
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(crate::command::duration_millis(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
