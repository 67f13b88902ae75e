//! Request rendering for every stream command.
//!
//! All id literal, range marker, and modifier rules live here. Each function is
//! pure: arguments in, [`Request`] out, with local validation failing before
//! anything is built.

use crate::args::{AddArgs, ClaimArgs, GroupCreateArgs, GroupStream, ReadArgs, StreamOffset};
use crate::entry::{ConsumerRef, Fields};
use crate::error::StreamError;
use crate::types::{Limit, Offset, RangeSpec, StreamId};
use bytes::Bytes;
use std::fmt;
use std::time::Duration;

/// `XPENDING` detail form requires a count; this stands in for "no limit".
pub const UNBOUNDED_PENDING_COUNT: u64 = i64::MAX as u64;

/// Command names, token 0 of each request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandName {
    Xack,
    Xadd,
    Xclaim,
    XgroupCreate,
    XgroupDelconsumer,
    XgroupSetid,
    Xlen,
    Xpending,
    Xrange,
    Xrevrange,
    Xread,
    Xreadgroup,
}

impl CommandName {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandName::Xack => "XACK",
            CommandName::Xadd => "XADD",
            CommandName::Xclaim => "XCLAIM",
            CommandName::XgroupCreate => "XGROUP CREATE",
            CommandName::XgroupDelconsumer => "XGROUP DELCONSUMER",
            CommandName::XgroupSetid => "XGROUP SETID",
            CommandName::Xlen => "XLEN",
            CommandName::Xpending => "XPENDING",
            CommandName::Xrange => "XRANGE",
            CommandName::Xrevrange => "XREVRANGE",
            CommandName::Xread => "XREAD",
            CommandName::Xreadgroup => "XREADGROUP",
        }
    }

    /// Wire tokens; container commands are sent as command + subcommand.
    pub fn tokens(&self) -> &'static [&'static str] {
        match self {
            CommandName::Xack => &["XACK"],
            CommandName::Xadd => &["XADD"],
            CommandName::Xclaim => &["XCLAIM"],
            CommandName::XgroupCreate => &["XGROUP", "CREATE"],
            CommandName::XgroupDelconsumer => &["XGROUP", "DELCONSUMER"],
            CommandName::XgroupSetid => &["XGROUP", "SETID"],
            CommandName::Xlen => &["XLEN"],
            CommandName::Xpending => &["XPENDING"],
            CommandName::Xrange => &["XRANGE"],
            CommandName::Xrevrange => &["XREVRANGE"],
            CommandName::Xread => &["XREAD"],
            CommandName::Xreadgroup => &["XREADGROUP"],
        }
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rendered command: name plus argument tokens.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    name: CommandName,
    args: Vec<Bytes>,
}

impl Request {
    pub fn new(name: CommandName) -> Self {
        Self {
            name,
            args: Vec::new(),
        }
    }

    pub fn name(&self) -> CommandName {
        self.name
    }

    /// Argument tokens, excluding the command name.
    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    /// The full token sequence as sent on the wire.
    pub fn tokens(&self) -> Vec<Bytes> {
        self.name
            .tokens()
            .iter()
            .copied()
            .map(|t| Bytes::from_static(t.as_bytes()))
            .chain(self.args.iter().cloned())
            .collect()
    }

    /// The stream key this request targets, when it has exactly one.
    pub fn key(&self) -> Option<&str> {
        match self.name {
            CommandName::Xread | CommandName::Xreadgroup => None,
            _ => self
                .args
                .first()
                .and_then(|k| std::str::from_utf8(k).ok()),
        }
    }

    fn arg(mut self, token: impl AsRef<[u8]>) -> Self {
        self.args.push(Bytes::copy_from_slice(token.as_ref()));
        self
    }

    fn arg_bytes(mut self, token: Bytes) -> Self {
        self.args.push(token);
        self
    }

    fn arg_id(self, id: &StreamId) -> Self {
        self.arg(id.to_string())
    }

    fn arg_millis(self, d: Duration) -> Self {
        self.arg(duration_millis(d).to_string())
    }

    fn arg_opt(self, modifier: &str, value: Option<impl ToString>) -> Self {
        match value {
            Some(v) => self.arg(modifier).arg(v.to_string()),
            None => self,
        }
    }

    fn arg_flag(self, flag: &str, set: bool) -> Self {
        if set {
            self.arg(flag)
        } else {
            self
        }
    }
}

/// Whole milliseconds, saturating at `u64::MAX`.
pub(crate) fn duration_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// `BLOCK` argument. Zero means wait forever, so any non-zero timeout renders as at least 1.
pub(crate) fn block_millis(d: Duration) -> u64 {
    if d.is_zero() {
        0
    } else {
        duration_millis(d).max(1)
    }
}

fn require_ids(ids: &[StreamId]) -> Result<(), StreamError> {
    if ids.is_empty() {
        return Err(StreamError::Usage("at least one message id is required"));
    }
    Ok(())
}

fn require_name(name: &str, what: &'static str) -> Result<(), StreamError> {
    if name.is_empty() {
        return Err(StreamError::Usage(what));
    }
    Ok(())
}

/// `XACK key group id [id ...]`
pub fn xack(key: &str, group: &str, ids: &[StreamId]) -> Result<Request, StreamError> {
    require_name(group, "group name must not be empty")?;
    require_ids(ids)?;
    Ok(ids
        .iter()
        .fold(Request::new(CommandName::Xack).arg(key).arg(group), |req, id| {
            req.arg_id(id)
        }))
}

/// `XADD key [MAXLEN [~] n] <id | *> field value [field value ...]`
pub fn xadd(key: &str, args: &AddArgs, body: &Fields) -> Result<Request, StreamError> {
    if body.is_empty() {
        return Err(StreamError::Usage("append body must not be empty"));
    }

    let mut req = Request::new(CommandName::Xadd).arg(key);

    if let Some(max_len) = args.max_len {
        req = req.arg("MAXLEN");
        if args.approximate_trimming {
            req = req.arg("~");
        }
        req = req.arg(max_len.to_string());
    }

    req = match &args.id {
        Some(id) => req.arg_id(id),
        None => req.arg("*"),
    };

    for (name, value) in body {
        req = req.arg(name).arg_bytes(value.clone());
    }

    Ok(req)
}

/// `XCLAIM key group consumer min-idle id [id ...] [IDLE ms] [TIME ms] [RETRYCOUNT n] [FORCE]`
pub fn xclaim(
    key: &str,
    consumer: &ConsumerRef,
    args: &ClaimArgs,
    ids: &[StreamId],
) -> Result<Request, StreamError> {
    claim_request(key, consumer, args, ids, false)
}

/// Same as [`xclaim`] with `JUSTID`: the reply carries ids only.
pub fn xclaim_just_id(
    key: &str,
    consumer: &ConsumerRef,
    args: &ClaimArgs,
    ids: &[StreamId],
) -> Result<Request, StreamError> {
    claim_request(key, consumer, args, ids, true)
}

fn claim_request(
    key: &str,
    consumer: &ConsumerRef,
    args: &ClaimArgs,
    ids: &[StreamId],
    just_id: bool,
) -> Result<Request, StreamError> {
    require_ids(ids)?;

    let req = Request::new(CommandName::Xclaim)
        .arg(key)
        .arg(consumer.group())
        .arg(consumer.consumer())
        .arg_millis(args.min_idle);

    Ok(ids
        .iter()
        .fold(req, |req, id| req.arg_id(id))
        .arg_opt("IDLE", args.idle.map(|d| d.as_millis()))
        .arg_opt("TIME", args.time)
        .arg_opt("RETRYCOUNT", args.retry_count)
        .arg_flag("FORCE", args.force)
        .arg_flag("JUSTID", just_id))
}

/// `XGROUP CREATE key group <id | $> [MKSTREAM]`
pub fn xgroup_create(
    key: &str,
    group: &str,
    offset: Offset,
    args: &GroupCreateArgs,
) -> Result<Request, StreamError> {
    require_name(group, "group name must not be empty")?;
    Ok(Request::new(CommandName::XgroupCreate)
        .arg(key)
        .arg(group)
        .arg(offset.to_token())
        .arg_flag("MKSTREAM", args.mkstream))
}

/// `XGROUP SETID key group <id | $>`
pub fn xgroup_setid(key: &str, group: &str, offset: Offset) -> Result<Request, StreamError> {
    require_name(group, "group name must not be empty")?;
    Ok(Request::new(CommandName::XgroupSetid)
        .arg(key)
        .arg(group)
        .arg(offset.to_token()))
}

/// `XGROUP DELCONSUMER key group consumer`
pub fn xgroup_delconsumer(key: &str, consumer: &ConsumerRef) -> Request {
    Request::new(CommandName::XgroupDelconsumer)
        .arg(key)
        .arg(consumer.group())
        .arg(consumer.consumer())
}

/// `XLEN key`
pub fn xlen(key: &str) -> Request {
    Request::new(CommandName::Xlen).arg(key)
}

/// `XPENDING key group` (summary form)
pub fn xpending_summary(key: &str, group: &str) -> Result<Request, StreamError> {
    require_name(group, "group name must not be empty")?;
    Ok(Request::new(CommandName::Xpending).arg(key).arg(group))
}

/// `XPENDING key group start end count [consumer]` (detail form)
///
/// An unlimited `limit` renders [`UNBOUNDED_PENDING_COUNT`], since the server
/// requires a count in this form.
pub fn xpending(
    key: &str,
    group: &str,
    consumer: Option<&str>,
    range: &RangeSpec<StreamId>,
    limit: Limit,
) -> Result<Request, StreamError> {
    require_name(group, "group name must not be empty")?;
    let count = limit.get().unwrap_or(UNBOUNDED_PENDING_COUNT);
    let req = Request::new(CommandName::Xpending)
        .arg(key)
        .arg(group)
        .arg(range.lower_token())
        .arg(range.upper_token())
        .arg(count.to_string());
    Ok(match consumer {
        Some(consumer) => req.arg(consumer),
        None => req,
    })
}

/// `XRANGE key start end [COUNT n]`
pub fn xrange(key: &str, range: &RangeSpec<StreamId>, limit: Limit) -> Request {
    Request::new(CommandName::Xrange)
        .arg(key)
        .arg(range.lower_token())
        .arg(range.upper_token())
        .arg_opt("COUNT", limit.get())
}

/// `XREVRANGE key end start [COUNT n]`
///
/// Tokens go upper first; each bound keeps its own meaning.
pub fn xrevrange(key: &str, range: &RangeSpec<StreamId>, limit: Limit) -> Request {
    Request::new(CommandName::Xrevrange)
        .arg(key)
        .arg(range.upper_token())
        .arg(range.lower_token())
        .arg_opt("COUNT", limit.get())
}

/// `XREAD [COUNT n] [BLOCK ms] STREAMS key [key ...] id [id ...]`
pub fn xread(args: &ReadArgs, streams: &[StreamOffset]) -> Result<Request, StreamError> {
    if streams.is_empty() {
        return Err(StreamError::Usage("at least one stream is required"));
    }
    if args.no_ack {
        return Err(StreamError::Usage("NOACK applies to group reads only"));
    }

    let req = Request::new(CommandName::Xread)
        .arg_opt("COUNT", args.count)
        .arg_opt("BLOCK", args.block.map(block_millis))
        .arg("STREAMS");
    let req = streams.iter().fold(req, |req, s| req.arg(&s.key));
    Ok(streams
        .iter()
        .fold(req, |req, s| req.arg(s.offset.to_token())))
}

/// `XREADGROUP GROUP group consumer [COUNT n] [BLOCK ms] [NOACK] STREAMS key [key ...] id [id ...]`
pub fn xreadgroup(
    consumer: &ConsumerRef,
    args: &ReadArgs,
    streams: &[GroupStream],
) -> Result<Request, StreamError> {
    if streams.is_empty() {
        return Err(StreamError::Usage("at least one stream is required"));
    }

    let req = Request::new(CommandName::Xreadgroup)
        .arg("GROUP")
        .arg(consumer.group())
        .arg(consumer.consumer())
        .arg_opt("COUNT", args.count)
        .arg_opt("BLOCK", args.block.map(block_millis))
        .arg_flag("NOACK", args.no_ack)
        .arg("STREAMS");
    let req = streams.iter().fold(req, |req, s| req.arg(&s.key));
    Ok(streams
        .iter()
        .fold(req, |req, s| req.arg(s.offset.to_token())))
}
