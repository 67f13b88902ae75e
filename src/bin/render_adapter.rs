//! Render adapter for wire-compatibility checks.
//!
//! Reads one JSON command per line on stdin, renders it through the command
//! builders and writes one JSON result per line on stdout. Nothing is sent
//! anywhere; the output is the exact token list a transport would receive.
//!
//! Logs go to stderr, filtered by `RUST_LOG`.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, Write};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use xstream::command::{self, Request};
use xstream::{
    AddArgs, ClaimArgs, ConsumerRef, Fields, GroupCreateArgs, GroupOffset, GroupStream, Limit,
    Offset, RangeSpec, ReadArgs, StreamError, StreamId, StreamOffset,
};

const ADAPTER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Command {
    #[serde(rename = "type")]
    cmd_type: String,
    op: Option<String>,
    key: Option<String>,
    group: Option<String>,
    consumer: Option<String>,
    // ids and offsets in protocol text
    id: Option<String>,
    ids: Vec<String>,
    offset: Option<String>,
    lower: Option<String>,
    upper: Option<String>,
    streams: Vec<(String, String)>,
    // entry body; values are base64 when `binary` is set
    fields: Vec<(String, String)>,
    binary: bool,
    // options
    count: Option<u64>,
    block_ms: Option<u64>,
    no_ack: bool,
    max_len: Option<u64>,
    approximate: bool,
    min_idle_ms: u64,
    idle_ms: Option<u64>,
    time: Option<u64>,
    retry_count: Option<u64>,
    force: bool,
    just_id: bool,
    mkstream: bool,
    // parse-id
    input: Option<String>,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct Output {
    #[serde(rename = "type")]
    result_type: String,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    adapter_version: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tokens: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    encoding: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<StreamId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sequence: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    command_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

fn main() -> io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let output = match serde_json::from_str::<Command>(&line) {
            Ok(cmd) => handle_command(cmd),
            Err(e) => error_output(
                "unknown",
                "PARSE_ERROR",
                &format!("failed to parse command: {}", e),
            ),
        };

        let encoded = serde_json::to_string(&output).map_err(io::Error::other)?;
        writeln!(stdout, "{}", encoded)?;
        stdout.flush()?;

        if output.result_type == "shutdown" {
            break;
        }
    }

    Ok(())
}

fn handle_command(cmd: Command) -> Output {
    match cmd.cmd_type.as_str() {
        "init" => Output {
            result_type: "init".to_string(),
            success: true,
            adapter_version: Some(ADAPTER_VERSION),
            ..Default::default()
        },
        "render" => {
            let op = cmd.op.clone().unwrap_or_default();
            match render(&cmd) {
                Ok(request) => render_output(&request),
                Err(e) => {
                    tracing::debug!(op = %op, error = %e, "render rejected");
                    stream_error_output(&op, &e)
                }
            }
        }
        "parse-id" => match StreamId::parse(cmd.input.as_deref().unwrap_or_default()) {
            Ok(id) => Output {
                result_type: "parse-id".to_string(),
                success: true,
                id: Some(id),
                timestamp: Some(id.timestamp()),
                sequence: Some(id.sequence()),
                ..Default::default()
            },
            Err(e) => stream_error_output("parse-id", &e),
        },
        "shutdown" => Output {
            result_type: "shutdown".to_string(),
            success: true,
            ..Default::default()
        },
        other => error_output(
            other,
            "NOT_SUPPORTED",
            &format!("unknown command type: {}", other),
        ),
    }
}

fn render(cmd: &Command) -> Result<Request, StreamError> {
    let key = cmd.key.as_deref().unwrap_or_default();
    let group = cmd.group.as_deref().unwrap_or_default();

    match cmd.op.as_deref().unwrap_or_default() {
        "xack" => command::xack(key, group, &parse_ids(&cmd.ids)?),
        "xadd" => {
            let mut args = AddArgs::new().approximate_trimming(cmd.approximate);
            if let Some(id) = &cmd.id {
                args = args.id(StreamId::parse(id)?);
            }
            if let Some(max_len) = cmd.max_len {
                args = args.max_len(max_len);
            }
            command::xadd(key, &args, &fields(cmd)?)
        }
        "xclaim" => {
            let consumer = consumer(cmd)?;
            let args = claim_args(cmd);
            let ids = parse_ids(&cmd.ids)?;
            if cmd.just_id {
                command::xclaim_just_id(key, &consumer, &args, &ids)
            } else {
                command::xclaim(key, &consumer, &args, &ids)
            }
        }
        "xgroup-create" => command::xgroup_create(
            key,
            group,
            offset(cmd.offset.as_deref())?,
            &GroupCreateArgs::new().mkstream(cmd.mkstream),
        ),
        "xgroup-setid" => command::xgroup_setid(key, group, offset(cmd.offset.as_deref())?),
        "xgroup-delconsumer" => Ok(command::xgroup_delconsumer(key, &consumer(cmd)?)),
        "xlen" => Ok(command::xlen(key)),
        "xpending" => {
            let detail = cmd.lower.is_some()
                || cmd.upper.is_some()
                || cmd.count.is_some()
                || cmd.consumer.is_some();
            if !detail {
                command::xpending_summary(key, group)
            } else {
                command::xpending(key, group, cmd.consumer.as_deref(), &range(cmd)?, limit(cmd))
            }
        }
        "xrange" => Ok(command::xrange(key, &range(cmd)?, limit(cmd))),
        "xrevrange" => Ok(command::xrevrange(key, &range(cmd)?, limit(cmd))),
        "xread" => {
            let streams = cmd
                .streams
                .iter()
                .map(|(key, token)| Ok(StreamOffset::new(key.clone(), offset(Some(token.as_str()))?)))
                .collect::<Result<Vec<_>, StreamError>>()?;
            command::xread(&read_args(cmd), &streams)
        }
        "xreadgroup" => {
            let streams = cmd
                .streams
                .iter()
                .map(|(key, token)| Ok(GroupStream::new(key.clone(), group_offset(token)?)))
                .collect::<Result<Vec<_>, StreamError>>()?;
            command::xreadgroup(&consumer(cmd)?, &read_args(cmd), &streams)
        }
        _ => Err(StreamError::Usage("unknown operation")),
    }
}

fn parse_ids(ids: &[String]) -> Result<Vec<StreamId>, StreamError> {
    ids.iter().map(|id| StreamId::parse(id)).collect()
}

fn consumer(cmd: &Command) -> Result<ConsumerRef, StreamError> {
    ConsumerRef::new(
        cmd.group.clone().unwrap_or_default(),
        cmd.consumer.clone().unwrap_or_default(),
    )
}

fn fields(cmd: &Command) -> Result<Fields, StreamError> {
    let mut body = Fields::new();
    for (name, value) in &cmd.fields {
        let value = if cmd.binary {
            Bytes::from(
                BASE64
                    .decode(value)
                    .map_err(|_| StreamError::Usage("field value is not valid base64"))?,
            )
        } else {
            Bytes::from(value.clone())
        };
        body.insert(name.clone(), value)?;
    }
    Ok(body)
}

fn offset(token: Option<&str>) -> Result<Offset, StreamError> {
    match token {
        None => Ok(Offset::Beginning),
        Some("$") => Ok(Offset::Latest),
        Some(id) => Ok(Offset::At(StreamId::parse(id)?)),
    }
}

fn group_offset(token: &str) -> Result<GroupOffset, StreamError> {
    match token {
        ">" => Ok(GroupOffset::Undelivered),
        id => Ok(GroupOffset::Pending(StreamId::parse(id)?)),
    }
}

fn range(cmd: &Command) -> Result<RangeSpec, StreamError> {
    RangeSpec::from_tokens(
        cmd.lower.as_deref().unwrap_or("-"),
        cmd.upper.as_deref().unwrap_or("+"),
    )
}

fn limit(cmd: &Command) -> Limit {
    Limit::from(cmd.count)
}

fn read_args(cmd: &Command) -> ReadArgs {
    let mut args = ReadArgs::new().no_ack(cmd.no_ack);
    if let Some(count) = cmd.count {
        args = args.count(count);
    }
    if let Some(ms) = cmd.block_ms {
        args = args.block(Duration::from_millis(ms));
    }
    args
}

fn claim_args(cmd: &Command) -> ClaimArgs {
    let mut args = ClaimArgs::new()
        .min_idle(Duration::from_millis(cmd.min_idle_ms))
        .force(cmd.force);
    if let Some(ms) = cmd.idle_ms {
        args = args.idle(Duration::from_millis(ms));
    }
    if let Some(time) = cmd.time {
        args = args.time(time);
    }
    if let Some(n) = cmd.retry_count {
        args = args.retry_count(n);
    }
    args
}

fn render_output(request: &Request) -> Output {
    let tokens = request.tokens();
    let as_text: Option<Vec<String>> = tokens
        .iter()
        .map(|t| std::str::from_utf8(t).ok().map(str::to_owned))
        .collect();

    let (tokens, encoding) = match as_text {
        Some(text) => (text, "utf8"),
        None => (tokens.iter().map(|t| BASE64.encode(t)).collect(), "base64"),
    };

    Output {
        result_type: "render".to_string(),
        success: true,
        tokens: Some(tokens),
        encoding: Some(encoding),
        command_type: Some(request.name().to_string()),
        ..Default::default()
    }
}

fn error_output(cmd_type: &str, code: &str, message: &str) -> Output {
    Output {
        result_type: "error".to_string(),
        success: false,
        command_type: Some(cmd_type.to_string()),
        error_code: Some(code.to_string()),
        message: Some(message.to_string()),
        ..Default::default()
    }
}

fn stream_error_output(cmd_type: &str, err: &StreamError) -> Output {
    error_output(cmd_type, err.error_code(), &err.to_string())
}
