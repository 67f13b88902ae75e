//! In-memory stream server for integration tests.
//!
//! Implements the command surface the client renders, closely enough to
//! exercise group delivery, pending bookkeeping, claiming and blocking reads.
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use xstream::{
    BlockingReply, CommandTransport, RangeSpec, Reply, Request, StreamId, TransportError,
};

const ERR_ID_ORDERING: &str =
    "ERR The ID specified in XADD is equal or smaller than the target stream top item";
const ERR_NO_KEY: &str = "ERR The XGROUP subcommand requires the key to exist";
const ERR_BUSYGROUP: &str = "BUSYGROUP Consumer Group name already exists";
const ERR_SYNTAX: &str = "ERR syntax error";

fn nogroup(key: &str, group: &str) -> Reply {
    Reply::error(format!(
        "NOGROUP No such key '{}' or consumer group '{}'",
        key, group
    ))
}

struct PendingMeta {
    consumer: String,
    delivered_ms: u64,
    count: u64,
}

#[derive(Default)]
struct Group {
    last_delivered: StreamId,
    pending: BTreeMap<StreamId, PendingMeta>,
    consumers: BTreeSet<String>,
}

#[derive(Default)]
struct StreamState {
    entries: BTreeMap<StreamId, Vec<(Bytes, Bytes)>>,
    last_id: StreamId,
    groups: HashMap<String, Group>,
}

#[derive(Default)]
struct State {
    streams: HashMap<String, StreamState>,
}

struct Inner {
    state: Mutex<State>,
    clock_ms: AtomicU64,
    appended: Notify,
}

/// Shared server state; hand out one [`MockConnection`] per logical connection.
#[derive(Clone)]
pub struct MockServer {
    inner: Arc<Inner>,
}

impl MockServer {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                clock_ms: AtomicU64::new(1_000),
                appended: Notify::new(),
            }),
        }
    }

    /// Move the server clock forward; idle times grow accordingly.
    pub fn advance(&self, by: Duration) {
        self.inner
            .clock_ms
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn connect(&self) -> MockConnection {
        MockConnection {
            inner: self.inner.clone(),
            closed: AtomicBool::new(false),
            close_signal: Notify::new(),
            sent: Mutex::new(Vec::new()),
        }
    }
}

/// One logical connection. Closing it interrupts a blocked read.
pub struct MockConnection {
    inner: Arc<Inner>,
    closed: AtomicBool,
    close_signal: Notify,
    sent: Mutex<Vec<Vec<String>>>,
}

impl MockConnection {
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.close_signal.notify_waiters();
    }

    pub fn sent(&self) -> Vec<Vec<String>> {
        self.sent.lock().clone()
    }

    fn record(&self, tokens: &[Bytes]) {
        self.sent.lock().push(
            tokens
                .iter()
                .map(|t| String::from_utf8_lossy(t).into_owned())
                .collect(),
        );
    }
}

#[async_trait]
impl CommandTransport for MockConnection {
    async fn send(&self, request: &Request) -> Result<Reply, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let tokens = request.tokens();
        self.record(&tokens);
        Ok(self.inner.execute(&tokens))
    }

    async fn send_blocking(
        &self,
        request: &Request,
        timeout: Duration,
    ) -> Result<BlockingReply, TransportError> {
        let tokens = self.inner.resolve_latest(request.tokens());
        self.record(&tokens);

        let deadline = (!timeout.is_zero()).then(|| tokio::time::Instant::now() + timeout);

        loop {
            // register before checking state so no append is missed
            let appended = self.inner.appended.notified();
            let closed = self.close_signal.notified();

            if self.closed.load(Ordering::SeqCst) {
                return Err(TransportError::Closed);
            }

            let reply = self.inner.execute(&tokens);
            if !reply.is_nil() {
                return Ok(BlockingReply::Reply(reply));
            }

            let expired = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => futures::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = appended => {}
                _ = closed => return Err(TransportError::Closed),
                _ = expired => return Ok(BlockingReply::Reply(Reply::Nil)),
            }
        }
    }
}

fn text(token: &Bytes) -> String {
    String::from_utf8_lossy(token).into_owned()
}

fn entry_reply(id: &StreamId, fields: &[(Bytes, Bytes)]) -> Reply {
    Reply::Array(vec![
        Reply::from(*id),
        Reply::Array(
            fields
                .iter()
                .flat_map(|(n, v)| [Reply::Bulk(n.clone()), Reply::Bulk(v.clone())])
                .collect(),
        ),
    ])
}

/// Read options shared by XREAD and XREADGROUP.
struct ReadOpts {
    count: Option<usize>,
    no_ack: bool,
    keys: Vec<String>,
    ids: Vec<String>,
}

fn parse_read_opts(tokens: &[Bytes]) -> Option<ReadOpts> {
    let mut opts = ReadOpts {
        count: None,
        no_ack: false,
        keys: Vec::new(),
        ids: Vec::new(),
    };
    let mut i = 0;
    while i < tokens.len() {
        match text(&tokens[i]).to_ascii_uppercase().as_str() {
            "COUNT" => {
                opts.count = Some(text(tokens.get(i + 1)?).parse().ok()?);
                i += 2;
            }
            "BLOCK" => i += 2,
            "NOACK" => {
                opts.no_ack = true;
                i += 1;
            }
            "STREAMS" => {
                let rest = &tokens[i + 1..];
                if rest.is_empty() || rest.len() % 2 != 0 {
                    return None;
                }
                let half = rest.len() / 2;
                opts.keys = rest[..half].iter().map(text).collect();
                opts.ids = rest[half..].iter().map(text).collect();
                return Some(opts);
            }
            _ => return None,
        }
    }
    None
}

impl Inner {
    fn now(&self) -> u64 {
        self.clock_ms.load(Ordering::SeqCst)
    }

    /// Pin `$` in a read to the current top id so re-polling does not move it.
    fn resolve_latest(&self, mut tokens: Vec<Bytes>) -> Vec<Bytes> {
        let Some(streams_at) = tokens
            .iter()
            .position(|t| t.eq_ignore_ascii_case(b"STREAMS"))
        else {
            return tokens;
        };
        let rest = tokens.len() - streams_at - 1;
        let half = rest / 2;
        let state = self.state.lock();
        for i in 0..half {
            let id_at = streams_at + 1 + half + i;
            if &tokens[id_at][..] == b"$" {
                let key = text(&tokens[streams_at + 1 + i]);
                let last = state
                    .streams
                    .get(&key)
                    .map(|s| s.last_id)
                    .unwrap_or_default();
                tokens[id_at] = Bytes::from(last.to_string());
            }
        }
        tokens
    }

    fn execute(&self, tokens: &[Bytes]) -> Reply {
        let name = tokens.first().map(text).unwrap_or_default().to_ascii_uppercase();
        let args = &tokens[1.min(tokens.len())..];
        let now = self.now();
        let mut state = self.state.lock();

        let reply = match name.as_str() {
            "XADD" => xadd(&mut state, args, now),
            "XLEN" => Reply::Integer(
                args.first()
                    .and_then(|k| state.streams.get(&text(k)))
                    .map(|s| s.entries.len() as i64)
                    .unwrap_or(0),
            ),
            "XRANGE" => xrange(&state, args, false),
            "XREVRANGE" => xrange(&state, args, true),
            "XGROUP" => xgroup(&mut state, args),
            "XREAD" => xread(&state, args),
            "XREADGROUP" => xreadgroup(&mut state, args, now),
            "XPENDING" => xpending(&state, args, now),
            "XCLAIM" => xclaim(&mut state, args, now),
            "XACK" => xack(&mut state, args),
            _ => Reply::error(format!("ERR unknown command '{}'", name)),
        };

        drop(state);
        if name == "XADD" && !matches!(reply, Reply::Error(_)) {
            self.appended.notify_waiters();
        }
        reply
    }
}

fn xadd(state: &mut State, args: &[Bytes], now: u64) -> Reply {
    if args.len() < 4 {
        return Reply::error(ERR_SYNTAX);
    }
    let key = text(&args[0]);
    let mut i = 1;
    let mut max_len = None;
    if text(&args[i]).eq_ignore_ascii_case("MAXLEN") {
        i += 1;
        if &args[i][..] == b"~" {
            i += 1;
        }
        max_len = text(&args[i]).parse::<usize>().ok();
        i += 1;
    }

    let stream = state.streams.entry(key).or_default();
    let id = match text(&args[i]).as_str() {
        "*" => {
            let last = stream.last_id;
            if now > last.timestamp() {
                StreamId::new(now, 0)
            } else {
                StreamId::new(last.timestamp(), last.sequence() + 1)
            }
        }
        explicit => match StreamId::parse(explicit) {
            Ok(id) if id > stream.last_id => id,
            Ok(_) => return Reply::error(ERR_ID_ORDERING),
            Err(_) => return Reply::error("ERR Invalid stream ID specified as stream command argument"),
        },
    };

    let body = &args[i + 1..];
    if body.is_empty() || body.len() % 2 != 0 {
        return Reply::error("ERR wrong number of arguments for 'xadd' command");
    }
    let fields = body
        .chunks(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect();

    stream.entries.insert(id, fields);
    stream.last_id = id;
    if let Some(max_len) = max_len {
        while stream.entries.len() > max_len {
            stream.entries.pop_first();
        }
    }
    Reply::from(id)
}

fn xrange(state: &State, args: &[Bytes], reverse: bool) -> Reply {
    if args.len() < 3 {
        return Reply::error(ERR_SYNTAX);
    }
    let key = text(&args[0]);
    let (lower, upper) = if reverse {
        (text(&args[2]), text(&args[1]))
    } else {
        (text(&args[1]), text(&args[2]))
    };
    let range = match RangeSpec::from_tokens(&lower, &upper) {
        Ok(range) => range,
        Err(_) => return Reply::error("ERR Invalid stream ID specified as stream command argument"),
    };
    let count = match args.get(3).map(text) {
        Some(m) if m.eq_ignore_ascii_case("COUNT") => {
            args.get(4).and_then(|c| text(c).parse::<usize>().ok())
        }
        _ => None,
    }
    .unwrap_or(usize::MAX);

    let Some(stream) = state.streams.get(&key) else {
        return Reply::Array(vec![]);
    };
    let matching = stream.entries.iter().filter(|(id, _)| range.contains(id));
    let items: Vec<Reply> = if reverse {
        matching
            .rev()
            .take(count)
            .map(|(id, f)| entry_reply(id, f))
            .collect()
    } else {
        matching.take(count).map(|(id, f)| entry_reply(id, f)).collect()
    };
    Reply::Array(items)
}

fn xgroup(state: &mut State, args: &[Bytes]) -> Reply {
    let sub = args.first().map(text).unwrap_or_default().to_ascii_uppercase();
    let args = &args[1.min(args.len())..];
    match sub.as_str() {
        "CREATE" => {
            if args.len() < 3 {
                return Reply::error(ERR_SYNTAX);
            }
            let key = text(&args[0]);
            let group = text(&args[1]);
            let mkstream = args
                .get(3)
                .map(|t| t.eq_ignore_ascii_case(b"MKSTREAM"))
                .unwrap_or(false);
            if !state.streams.contains_key(&key) {
                if !mkstream {
                    return Reply::error(ERR_NO_KEY);
                }
                state.streams.insert(key.clone(), StreamState::default());
            }
            let stream = state.streams.get_mut(&key).unwrap();
            if stream.groups.contains_key(&group) {
                return Reply::error(ERR_BUSYGROUP);
            }
            let start = match text(&args[2]).as_str() {
                "$" => stream.last_id,
                other => match StreamId::parse(other) {
                    Ok(id) => id,
                    Err(_) => return Reply::error(ERR_SYNTAX),
                },
            };
            stream.groups.insert(
                group,
                Group {
                    last_delivered: start,
                    ..Group::default()
                },
            );
            Reply::ok()
        }
        "SETID" => {
            if args.len() < 3 {
                return Reply::error(ERR_SYNTAX);
            }
            let key = text(&args[0]);
            let group_name = text(&args[1]);
            let Some(stream) = state.streams.get_mut(&key) else {
                return nogroup(&key, &group_name);
            };
            let last = stream.last_id;
            let Some(group) = stream.groups.get_mut(&group_name) else {
                return nogroup(&key, &group_name);
            };
            group.last_delivered = match text(&args[2]).as_str() {
                "$" => last,
                other => match StreamId::parse(other) {
                    Ok(id) => id,
                    Err(_) => return Reply::error(ERR_SYNTAX),
                },
            };
            Reply::ok()
        }
        "DELCONSUMER" => {
            if args.len() < 3 {
                return Reply::error(ERR_SYNTAX);
            }
            let key = text(&args[0]);
            let group_name = text(&args[1]);
            let consumer = text(&args[2]);
            let Some(group) = state
                .streams
                .get_mut(&key)
                .and_then(|s| s.groups.get_mut(&group_name))
            else {
                return nogroup(&key, &group_name);
            };
            let before = group.pending.len();
            group.pending.retain(|_, meta| meta.consumer != consumer);
            group.consumers.remove(&consumer);
            Reply::Integer((before - group.pending.len()) as i64)
        }
        _ => Reply::error(ERR_SYNTAX),
    }
}

fn xread(state: &State, args: &[Bytes]) -> Reply {
    let Some(opts) = parse_read_opts(args) else {
        return Reply::error(ERR_SYNTAX);
    };
    let count = opts.count.unwrap_or(usize::MAX);

    let mut out = Vec::new();
    for (key, id) in opts.keys.iter().zip(&opts.ids) {
        let Some(stream) = state.streams.get(key) else {
            continue;
        };
        let after = match id.as_str() {
            "$" => stream.last_id,
            other => match StreamId::parse(other) {
                Ok(id) => id,
                Err(_) => return Reply::error(ERR_SYNTAX),
            },
        };
        let entries: Vec<Reply> = stream
            .entries
            .iter()
            .filter(|(id, _)| **id > after)
            .take(count)
            .map(|(id, f)| entry_reply(id, f))
            .collect();
        if !entries.is_empty() {
            out.push(Reply::Array(vec![key.as_str().into(), Reply::Array(entries)]));
        }
    }

    if out.is_empty() {
        Reply::Nil
    } else {
        Reply::Array(out)
    }
}

fn xreadgroup(state: &mut State, args: &[Bytes], now: u64) -> Reply {
    if args.len() < 3 || !args[0].eq_ignore_ascii_case(b"GROUP") {
        return Reply::error(ERR_SYNTAX);
    }
    let group_name = text(&args[1]);
    let consumer = text(&args[2]);
    let Some(opts) = parse_read_opts(&args[3..]) else {
        return Reply::error(ERR_SYNTAX);
    };
    let count = opts.count.unwrap_or(usize::MAX);

    for key in &opts.keys {
        let exists = state
            .streams
            .get(key)
            .map(|s| s.groups.contains_key(&group_name))
            .unwrap_or(false);
        if !exists {
            return nogroup(key, &group_name);
        }
    }

    let mut out = Vec::new();
    for (key, id) in opts.keys.iter().zip(&opts.ids) {
        let stream = state.streams.get_mut(key).unwrap();
        let group = stream.groups.get_mut(&group_name).unwrap();
        group.consumers.insert(consumer.clone());

        if id == ">" {
            let fresh: Vec<StreamId> = stream
                .entries
                .range((
                    std::ops::Bound::Excluded(group.last_delivered),
                    std::ops::Bound::Unbounded,
                ))
                .take(count)
                .map(|(id, _)| *id)
                .collect();
            if fresh.is_empty() {
                continue;
            }
            let mut entries = Vec::with_capacity(fresh.len());
            for id in fresh {
                group.last_delivered = id;
                if !opts.no_ack {
                    group.pending.insert(
                        id,
                        PendingMeta {
                            consumer: consumer.clone(),
                            delivered_ms: now,
                            count: 1,
                        },
                    );
                }
                entries.push(entry_reply(&id, &stream.entries[&id]));
            }
            out.push(Reply::Array(vec![key.as_str().into(), Reply::Array(entries)]));
        } else {
            let Ok(after) = StreamId::parse(id) else {
                return Reply::error(ERR_SYNTAX);
            };
            let mut entries = Vec::new();
            for (pid, meta) in group
                .pending
                .range_mut((std::ops::Bound::Excluded(after), std::ops::Bound::Unbounded))
                .filter(|(_, meta)| meta.consumer == consumer)
                .take(count)
            {
                meta.delivered_ms = now;
                meta.count += 1;
                entries.push(match stream.entries.get(pid) {
                    Some(fields) => entry_reply(pid, fields),
                    None => Reply::Array(vec![Reply::from(*pid), Reply::Nil]),
                });
            }
            out.push(Reply::Array(vec![key.as_str().into(), Reply::Array(entries)]));
        }
    }

    if out.is_empty() {
        Reply::Nil
    } else {
        Reply::Array(out)
    }
}

fn xpending(state: &State, args: &[Bytes], now: u64) -> Reply {
    if args.len() < 2 {
        return Reply::error(ERR_SYNTAX);
    }
    let key = text(&args[0]);
    let group_name = text(&args[1]);
    let Some(group) = state
        .streams
        .get(&key)
        .and_then(|s| s.groups.get(&group_name))
    else {
        return nogroup(&key, &group_name);
    };

    if args.len() == 2 {
        if group.pending.is_empty() {
            return Reply::Array(vec![Reply::Integer(0), Reply::Nil, Reply::Nil, Reply::Nil]);
        }
        let mut per_consumer: BTreeMap<&str, u64> = BTreeMap::new();
        for meta in group.pending.values() {
            *per_consumer.entry(meta.consumer.as_str()).or_default() += 1;
        }
        let lowest = *group.pending.keys().next().unwrap();
        let highest = *group.pending.keys().next_back().unwrap();
        return Reply::Array(vec![
            Reply::Integer(group.pending.len() as i64),
            Reply::from(lowest),
            Reply::from(highest),
            Reply::Array(
                per_consumer
                    .into_iter()
                    .map(|(name, n)| Reply::Array(vec![name.into(), n.to_string().as_str().into()]))
                    .collect(),
            ),
        ]);
    }

    if args.len() < 5 {
        return Reply::error(ERR_SYNTAX);
    }
    let range = match RangeSpec::from_tokens(&text(&args[2]), &text(&args[3])) {
        Ok(range) => range,
        Err(_) => return Reply::error(ERR_SYNTAX),
    };
    let Ok(count) = text(&args[4]).parse::<u64>() else {
        return Reply::error(ERR_SYNTAX);
    };
    let consumer = args.get(5).map(text);

    Reply::Array(
        group
            .pending
            .iter()
            .filter(|(id, _)| range.contains(id))
            .filter(|(_, meta)| consumer.as_deref().map_or(true, |c| meta.consumer == c))
            .take(usize::try_from(count).unwrap_or(usize::MAX))
            .map(|(id, meta)| {
                Reply::Array(vec![
                    Reply::from(*id),
                    meta.consumer.as_str().into(),
                    Reply::Integer(now.saturating_sub(meta.delivered_ms) as i64),
                    Reply::Integer(meta.count as i64),
                ])
            })
            .collect(),
    )
}

fn xclaim(state: &mut State, args: &[Bytes], now: u64) -> Reply {
    if args.len() < 5 {
        return Reply::error(ERR_SYNTAX);
    }
    let key = text(&args[0]);
    let group_name = text(&args[1]);
    let consumer = text(&args[2]);
    let Ok(min_idle) = text(&args[3]).parse::<u64>() else {
        return Reply::error(ERR_SYNTAX);
    };

    let mut ids = Vec::new();
    let mut i = 4;
    while i < args.len() {
        match StreamId::parse(&text(&args[i])) {
            Ok(id) => ids.push(id),
            Err(_) => break,
        }
        i += 1;
    }

    let mut idle = None;
    let mut time = None;
    let mut retry_count = None;
    let mut force = false;
    let mut just_id = false;
    while i < args.len() {
        let opt = text(&args[i]).to_ascii_uppercase();
        let value = args.get(i + 1).and_then(|v| text(v).parse::<u64>().ok());
        match opt.as_str() {
            "IDLE" => {
                idle = value;
                i += 2;
            }
            "TIME" => {
                time = value;
                i += 2;
            }
            "RETRYCOUNT" => {
                retry_count = value;
                i += 2;
            }
            "FORCE" => {
                force = true;
                i += 1;
            }
            "JUSTID" => {
                just_id = true;
                i += 1;
            }
            _ => return Reply::error(ERR_SYNTAX),
        }
    }

    let Some(stream) = state.streams.get_mut(&key) else {
        return nogroup(&key, &group_name);
    };
    let Some(group) = stream.groups.get_mut(&group_name) else {
        return nogroup(&key, &group_name);
    };

    let delivered_ms = match (idle, time) {
        (Some(idle), _) => now.saturating_sub(idle),
        (None, Some(time)) => time,
        (None, None) => now,
    };

    let mut out = Vec::new();
    for id in ids {
        if !group.pending.contains_key(&id) {
            if force && stream.entries.contains_key(&id) {
                group.pending.insert(
                    id,
                    PendingMeta {
                        consumer: consumer.clone(),
                        delivered_ms: now,
                        count: 0,
                    },
                );
            } else {
                continue;
            }
        }

        if !stream.entries.contains_key(&id) {
            group.pending.remove(&id);
            continue;
        }

        let meta = group.pending.get_mut(&id).unwrap();
        if now.saturating_sub(meta.delivered_ms) < min_idle {
            continue;
        }

        meta.consumer = consumer.clone();
        meta.delivered_ms = delivered_ms;
        if let Some(n) = retry_count {
            meta.count = n;
        } else if !just_id {
            meta.count += 1;
        }

        out.push(if just_id {
            Reply::from(id)
        } else {
            entry_reply(&id, &stream.entries[&id])
        });
    }
    group.consumers.insert(consumer);

    Reply::Array(out)
}

fn xack(state: &mut State, args: &[Bytes]) -> Reply {
    if args.len() < 3 {
        return Reply::error(ERR_SYNTAX);
    }
    let key = text(&args[0]);
    let group_name = text(&args[1]);
    let Some(group) = state
        .streams
        .get_mut(&key)
        .and_then(|s| s.groups.get_mut(&group_name))
    else {
        return Reply::Integer(0);
    };

    let removed = args[2..]
        .iter()
        .filter_map(|t| StreamId::parse(&text(t)).ok())
        .filter(|id| group.pending.remove(id).is_some())
        .count();
    Reply::Integer(removed as i64)
}
