//! Raw replies and their decoding into typed results.

use crate::command::CommandName;
use crate::entry::{ConsumerPending, Entry, Fields, PendingEntry, PendingSummary, StreamMessage};
use crate::error::StreamError;
use crate::types::StreamId;
use bytes::Bytes;
use std::time::Duration;

/// A reply as handed back by the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    Nil,
    Integer(i64),
    /// Simple status line such as `OK`
    Status(String),
    Bulk(Bytes),
    Array(Vec<Reply>),
    /// Error marker carrying the server's message
    Error(String),
}

impl Reply {
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Reply::Bulk(data.into())
    }

    pub fn ok() -> Self {
        Reply::Status("OK".to_string())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Reply::Error(message.into())
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Reply::Nil)
    }

    fn kind(&self) -> &'static str {
        match self {
            Reply::Nil => "nil",
            Reply::Integer(_) => "integer",
            Reply::Status(_) => "status",
            Reply::Bulk(_) => "bulk string",
            Reply::Array(_) => "array",
            Reply::Error(_) => "error",
        }
    }
}

impl From<i64> for Reply {
    fn from(n: i64) -> Self {
        Reply::Integer(n)
    }
}

impl From<&str> for Reply {
    fn from(s: &str) -> Self {
        Reply::Bulk(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<StreamId> for Reply {
    fn from(id: StreamId) -> Self {
        Reply::Bulk(Bytes::from(id.to_string()))
    }
}

impl From<Vec<Reply>> for Reply {
    fn from(items: Vec<Reply>) -> Self {
        Reply::Array(items)
    }
}

/// Surface an error marker as a classified [`StreamError`].
fn checked(command: CommandName, reply: Reply) -> Result<Reply, StreamError> {
    match reply {
        Reply::Error(message) => Err(StreamError::from_server(command.as_str(), message)),
        other => Ok(other),
    }
}

fn unexpected(command: CommandName, expected: &str, got: &Reply) -> StreamError {
    StreamError::unexpected(
        command.as_str(),
        format!("expected {}, got {}", expected, got.kind()),
    )
}

fn text(command: CommandName, reply: Reply) -> Result<String, StreamError> {
    match reply {
        Reply::Status(s) => Ok(s),
        Reply::Bulk(b) => String::from_utf8(b.to_vec())
            .map_err(|_| StreamError::unexpected(command.as_str(), "non-utf8 text")),
        other => Err(unexpected(command, "text", &other)),
    }
}

fn id(command: CommandName, reply: Reply) -> Result<StreamId, StreamError> {
    let s = text(command, reply)?;
    StreamId::parse(&s).map_err(|_| StreamError::unexpected(command.as_str(), format!("malformed id {:?}", s)))
}

fn unsigned(command: CommandName, reply: Reply) -> Result<u64, StreamError> {
    match reply {
        Reply::Integer(n) => {
            u64::try_from(n).map_err(|_| StreamError::unexpected(command.as_str(), "negative integer"))
        }
        // some servers send numeric fields as bulk strings
        Reply::Bulk(_) | Reply::Status(_) => {
            let s = text(command, reply)?;
            s.parse::<u64>()
                .map_err(|_| StreamError::unexpected(command.as_str(), format!("non-numeric {:?}", s)))
        }
        other => Err(unexpected(command, "integer", &other)),
    }
}

fn array(command: CommandName, reply: Reply) -> Result<Vec<Reply>, StreamError> {
    match reply {
        Reply::Array(items) => Ok(items),
        Reply::Nil => Ok(Vec::new()),
        other => Err(unexpected(command, "array", &other)),
    }
}

fn tuple<const N: usize>(command: CommandName, reply: Reply) -> Result<[Reply; N], StreamError> {
    let items = match reply {
        Reply::Array(items) => items,
        other => return Err(unexpected(command, "array", &other)),
    };
    let len = items.len();
    items.try_into().map_err(|_| {
        StreamError::unexpected(
            command.as_str(),
            format!("expected {} elements, got {}", N, len),
        )
    })
}

/// Decode the id assigned by `XADD`.
pub fn decode_id(command: CommandName, reply: Reply) -> Result<StreamId, StreamError> {
    match checked(command, reply)? {
        Reply::Nil => Err(StreamError::unexpected(command.as_str(), "nil id")),
        other => id(command, other),
    }
}

/// Decode a non-negative integer reply (`XACK`, `XLEN`, `XGROUP DELCONSUMER`).
pub fn decode_count(command: CommandName, reply: Reply) -> Result<u64, StreamError> {
    match checked(command, reply)? {
        Reply::Integer(n) => u64::try_from(n)
            .map_err(|_| StreamError::unexpected(command.as_str(), "negative count")),
        other => Err(unexpected(command, "integer", &other)),
    }
}

/// Decode an `OK` status reply.
pub fn decode_ok(command: CommandName, reply: Reply) -> Result<(), StreamError> {
    match checked(command, reply)? {
        Reply::Status(s) if s.eq_ignore_ascii_case("OK") => Ok(()),
        other => Err(unexpected(command, "OK", &other)),
    }
}

/// Decode a list of `[id, [field, value, ...]]` entries.
///
/// A nil reply is an empty list. Deleted entries (nil element or nil body) are
/// skipped.
pub fn decode_entries(command: CommandName, reply: Reply) -> Result<Vec<Entry>, StreamError> {
    let items = array(command, checked(command, reply)?)?;
    let mut entries = Vec::with_capacity(items.len());
    for item in items {
        if let Some(entry) = decode_entry(command, item)? {
            entries.push(entry);
        }
    }
    Ok(entries)
}

fn decode_entry(command: CommandName, reply: Reply) -> Result<Option<Entry>, StreamError> {
    if reply.is_nil() {
        tracing::trace!(command = command.as_str(), "skipping nil entry");
        return Ok(None);
    }

    let [raw_id, raw_fields] = tuple::<2>(command, reply)?;
    let entry_id = id(command, raw_id)?;

    let flat = match raw_fields {
        Reply::Nil => {
            tracing::trace!(command = command.as_str(), id = %entry_id, "skipping deleted entry");
            return Ok(None);
        }
        Reply::Array(flat) => flat,
        other => return Err(unexpected(command, "field array", &other)),
    };

    if flat.len() % 2 != 0 {
        return Err(StreamError::unexpected(command.as_str(), "odd field/value count"));
    }

    let mut fields = Fields::new();
    let mut it = flat.into_iter();
    while let (Some(name), Some(value)) = (it.next(), it.next()) {
        let name = text(command, name)?;
        let value = match value {
            Reply::Bulk(b) => b,
            Reply::Status(s) => Bytes::from(s),
            other => return Err(unexpected(command, "field value", &other)),
        };
        fields
            .insert(name, value)
            .map_err(|_| StreamError::unexpected(command.as_str(), "duplicate field name"))?;
    }

    Ok(Some(Entry::new(entry_id, fields)))
}

/// Decode a multi-stream read reply: `[[key, entries], ...]`.
///
/// Streams keep the server's order, which follows the request order.
pub fn decode_messages(
    command: CommandName,
    reply: Reply,
) -> Result<Vec<StreamMessage>, StreamError> {
    let streams = array(command, checked(command, reply)?)?;
    let mut messages = Vec::new();
    for stream in streams {
        let [key, entries] = tuple::<2>(command, stream)?;
        let key = text(command, key)?;
        for entry in decode_entries(command, entries)? {
            messages.push(StreamMessage {
                stream: key.clone(),
                entry,
            });
        }
    }
    Ok(messages)
}

/// Decode the detail form of `XPENDING`: `[[id, consumer, idle-ms, deliveries], ...]`.
pub fn decode_pending(
    command: CommandName,
    reply: Reply,
) -> Result<Vec<PendingEntry>, StreamError> {
    let items = array(command, checked(command, reply)?)?;
    items
        .into_iter()
        .map(|item| {
            let [raw_id, consumer, idle, count] = tuple::<4>(command, item)?;
            Ok(PendingEntry {
                id: id(command, raw_id)?,
                consumer: text(command, consumer)?,
                idle: Duration::from_millis(unsigned(command, idle)?),
                delivery_count: unsigned(command, count)?,
            })
        })
        .collect()
}

/// Decode the summary form of `XPENDING`: `[count, lowest, highest, [[consumer, count], ...]]`.
pub fn decode_pending_summary(
    command: CommandName,
    reply: Reply,
) -> Result<PendingSummary, StreamError> {
    let [count, lowest, highest, consumers] = tuple::<4>(command, checked(command, reply)?)?;

    let optional_id = |reply: Reply| -> Result<Option<StreamId>, StreamError> {
        match reply {
            Reply::Nil => Ok(None),
            other => id(command, other).map(Some),
        }
    };

    let consumers = array(command, consumers)?
        .into_iter()
        .map(|item| {
            let [name, pending] = tuple::<2>(command, item)?;
            Ok(ConsumerPending {
                consumer: text(command, name)?,
                pending: unsigned(command, pending)?,
            })
        })
        .collect::<Result<Vec<_>, StreamError>>()?;

    Ok(PendingSummary {
        count: unsigned(command, count)?,
        lowest: optional_id(lowest)?,
        highest: optional_id(highest)?,
        consumers,
    })
}

/// Decode a flat list of ids (`XCLAIM ... JUSTID`).
pub fn decode_ids(command: CommandName, reply: Reply) -> Result<Vec<StreamId>, StreamError> {
    array(command, checked(command, reply)?)?
        .into_iter()
        .filter(|r| !r.is_nil())
        .map(|r| id(command, r))
        .collect()
}
