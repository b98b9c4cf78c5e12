//! Command registry & handlers (spec.md §4.3, §4.4). The registry is a
//! pure `HashMap` lookup from lowercase name to a zero-sized tag — per
//! spec.md §9's design note, dispatch is "a dispatch table keyed by
//! command name whose values are ... zero-sized tags over a common
//! `(argv, connection, engine) -> Result<Reply>` contract", not the
//! source's inline argv-shape `match` in `RedisEngine::handle_request`.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;

use super::engine::Engine;
use super::protocol::RespFrame;
use super::stream::{parse_range_bound, range_end, range_start};
use super::types::CommandError;

/// One recognized command name (spec.md §4.3's "configuration with
/// recognized entries"). Zero-sized — the registry stores only the tag,
/// never a boxed closure, so `Registry` is cheap to build once and clone
/// via `Arc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Ping,
    Echo,
    Get,
    Set,
    RPush,
    LPush,
    LRange,
    LLen,
    LPop,
    BLPop,
    Type,
    XAdd,
    XRange,
}

pub struct Registry {
    by_name: HashMap<&'static str, Command>,
}

impl Registry {
    pub fn new() -> Registry {
        let mut by_name = HashMap::new();
        by_name.insert("ping", Command::Ping);
        by_name.insert("echo", Command::Echo);
        by_name.insert("get", Command::Get);
        by_name.insert("set", Command::Set);
        by_name.insert("rpush", Command::RPush);
        by_name.insert("lpush", Command::LPush);
        by_name.insert("lrange", Command::LRange);
        by_name.insert("llen", Command::LLen);
        by_name.insert("lpop", Command::LPop);
        by_name.insert("blpop", Command::BLPop);
        by_name.insert("type", Command::Type);
        by_name.insert("xadd", Command::XAdd);
        by_name.insert("xrange", Command::XRange);
        Registry { by_name }
    }

    fn lookup(&self, name: &str) -> Option<Command> {
        self.by_name.get(name.to_ascii_lowercase().as_str()).copied()
    }
}

impl Default for Registry {
    fn default() -> Registry {
        Registry::new()
    }
}

fn require_arity(argv: &[Bytes], name: &str, min: usize, max: Option<usize>) -> Result<(), CommandError> {
    let ok = argv.len() >= min && max.map_or(true, |m| argv.len() <= m);
    if ok {
        Ok(())
    } else {
        Err(CommandError::WrongArity(name.to_string()))
    }
}

fn as_str(b: &Bytes) -> std::borrow::Cow<'_, str> {
    String::from_utf8_lossy(b)
}

/// Top-level entry point called once per decoded frame by the connection
/// pipeline. `None` is reserved for the one case where the command layer
/// must emit no reply at all and let the connection close (spec.md §5's
/// BLPOP cancellation-on-disconnect) — every other path replies, even on
/// error (spec.md §7: per-command errors become reply frames, they never
/// close the connection).
pub async fn dispatch(registry: &Registry, argv: Vec<Bytes>, engine: &Engine) -> Option<RespFrame> {
    if argv.is_empty() {
        return Some(CommandError::InvalidArgument("empty command".into()).into());
    }
    let name = as_str(&argv[0]).into_owned();
    match registry.lookup(&name) {
        None => Some(CommandError::UnknownCommand(name).into()),
        Some(Command::BLPop) => match blpop(argv, engine).await {
            Ok(BlpopOutcome::Found(key, value)) => Some(RespFrame::Array(vec![
                RespFrame::bulk(key),
                RespFrame::bulk(value),
            ])),
            Ok(BlpopOutcome::TimedOut) => Some(RespFrame::NullBulk),
            Err(err) => Some(err.into()),
        },
        Some(cmd) => Some(match run(cmd, argv, engine).await {
            Ok(frame) => frame,
            Err(err) => err.into(),
        }),
    }
}

async fn run(cmd: Command, argv: Vec<Bytes>, engine: &Engine) -> Result<RespFrame, CommandError> {
    match cmd {
        Command::Ping => ping(argv),
        Command::Echo => echo(argv),
        Command::Get => get(argv, engine).await,
        Command::Set => set(argv, engine).await,
        Command::RPush => push(argv, engine, false).await,
        Command::LPush => push(argv, engine, true).await,
        Command::LRange => lrange(argv, engine).await,
        Command::LLen => llen(argv, engine).await,
        Command::LPop => lpop(argv, engine).await,
        Command::Type => type_cmd(argv, engine).await,
        Command::XAdd => xadd(argv, engine).await,
        Command::XRange => xrange(argv, engine).await,
        Command::BLPop => unreachable!("handled in dispatch"),
    }
}

fn ping(argv: Vec<Bytes>) -> Result<RespFrame, CommandError> {
    require_arity(&argv, "ping", 1, Some(1))?;
    Ok(RespFrame::Simple(b"PONG".to_vec()))
}

fn echo(argv: Vec<Bytes>) -> Result<RespFrame, CommandError> {
    require_arity(&argv, "echo", 2, Some(2))?;
    Ok(RespFrame::bulk(argv[1].clone()))
}

async fn get(argv: Vec<Bytes>, engine: &Engine) -> Result<RespFrame, CommandError> {
    require_arity(&argv, "get", 2, Some(2))?;
    match engine.get_string(&argv[1]).await? {
        Some(v) => Ok(RespFrame::bulk(v)),
        None => Ok(RespFrame::NullBulk),
    }
}

/// `SET <k> <v> [EX <sec> | PX <ms>]` (spec.md §4.4). The expiry option,
/// if present, is converted to an absolute deadline and handed to the
/// engine, which owns the write-epoch cancellation scheme (spec.md §4.2).
async fn set(argv: Vec<Bytes>, engine: &Engine) -> Result<RespFrame, CommandError> {
    require_arity(&argv, "set", 3, Some(5))?;
    let key = argv[1].clone();
    if key.is_empty() {
        return Err(CommandError::InvalidArgument("invalid key value".into()));
    }
    let value = argv[2].clone();
    let expire_at_ms = match argv.len() {
        3 => None,
        5 => {
            let opt = as_str(&argv[3]).to_ascii_uppercase();
            let raw: i64 = as_str(&argv[4])
                .parse()
                .map_err(|_| CommandError::InvalidArgument("value is not an integer or out of range".into()))?;
            if raw < 0 {
                return Err(CommandError::InvalidArgument("invalid expire time in 'set' command".into()));
            }
            let now = Engine::now_ms();
            match opt.as_str() {
                "EX" => Some(now + (raw as u64) * 1000),
                "PX" => Some(now + raw as u64),
                _ => return Err(CommandError::InvalidArgument("syntax error".into())),
            }
        }
        _ => return Err(CommandError::WrongArity("set".into())),
    };
    engine.set_string(key, value, expire_at_ms).await?;
    Ok(RespFrame::ok())
}

/// Shared RPUSH/LPUSH body. Wake policy differs by direction (spec.md
/// §4.2, §4.4): RPUSH notifies only when the push transitioned an empty
/// list to non-empty; LPUSH notifies unconditionally after any push,
/// since its new head value always changes.
async fn push(argv: Vec<Bytes>, engine: &Engine, at_head: bool) -> Result<RespFrame, CommandError> {
    let name = if at_head { "lpush" } else { "rpush" };
    require_arity(&argv, name, 3, None)?;
    let key = argv[1].clone();
    let values: Vec<Bytes> = argv[2..].to_vec();
    let pushed = values.len();
    let outcome = if at_head {
        engine.prepend(key.clone(), values).await?
    } else {
        engine.append(key.clone(), values).await?
    };
    let should_notify = if at_head {
        outcome.new_len > outcome.old_len
    } else {
        outcome.old_len == 0 && outcome.new_len == pushed
    };
    if should_notify {
        if let Some(head) = outcome.head_value.clone() {
            engine.notify_first(&key, head).await;
        }
    }
    Ok(RespFrame::Integer(outcome.new_len as i64))
}

async fn lrange(argv: Vec<Bytes>, engine: &Engine) -> Result<RespFrame, CommandError> {
    require_arity(&argv, "lrange", 4, Some(4))?;
    let start: i64 = as_str(&argv[2])
        .parse()
        .map_err(|_| CommandError::InvalidArgument("value is not an integer or out of range".into()))?;
    let stop: i64 = as_str(&argv[3])
        .parse()
        .map_err(|_| CommandError::InvalidArgument("value is not an integer or out of range".into()))?;
    let values = engine.slice(&argv[1], start, stop).await?;
    Ok(RespFrame::Array(values.into_iter().map(RespFrame::bulk).collect()))
}

async fn llen(argv: Vec<Bytes>, engine: &Engine) -> Result<RespFrame, CommandError> {
    require_arity(&argv, "llen", 2, Some(2))?;
    let len = engine.len(&argv[1]).await?;
    Ok(RespFrame::Integer(len as i64))
}

async fn lpop(argv: Vec<Bytes>, engine: &Engine) -> Result<RespFrame, CommandError> {
    require_arity(&argv, "lpop", 2, Some(3))?;
    if argv.len() == 2 {
        match engine.pop_front(&argv[1]).await? {
            Some(v) => Ok(RespFrame::bulk(v)),
            None => Ok(RespFrame::NullBulk),
        }
    } else {
        let count: usize = as_str(&argv[2])
            .parse()
            .map_err(|_| CommandError::InvalidArgument("value is out of range, must be positive".into()))?;
        let values = engine.pop_first_n(&argv[1], count).await?;
        Ok(RespFrame::Array(values.into_iter().map(RespFrame::bulk).collect()))
    }
}

async fn type_cmd(argv: Vec<Bytes>, engine: &Engine) -> Result<RespFrame, CommandError> {
    require_arity(&argv, "type", 2, Some(2))?;
    let kind = engine.check_type(&argv[1]).await;
    Ok(RespFrame::Simple(kind.as_bytes().to_vec()))
}

async fn xadd(argv: Vec<Bytes>, engine: &Engine) -> Result<RespFrame, CommandError> {
    require_arity(&argv, "xadd", 5, None)?;
    let key = argv[1].clone();
    let id = as_str(&argv[2]).into_owned();
    let rest = &argv[3..];
    if rest.len() % 2 != 0 {
        return Err(CommandError::InvalidArgument("Invalid number of arguments".into()));
    }
    let fields: Vec<(Bytes, Bytes)> = rest.chunks(2).map(|c| (c[0].clone(), c[1].clone())).collect();
    let final_id = engine.stream_append(key, &id, fields).await?;
    Ok(RespFrame::bulk(final_id.to_string()))
}

async fn xrange(argv: Vec<Bytes>, engine: &Engine) -> Result<RespFrame, CommandError> {
    require_arity(&argv, "xrange", 4, Some(4))?;
    let start_bound = parse_range_bound(&as_str(&argv[2]))?;
    let end_bound = parse_range_bound(&as_str(&argv[3]))?;
    let start = range_start(&start_bound);
    let end = range_end(&end_bound);
    let entries = engine.stream_range(&argv[1], start, end).await?;
    if entries.is_empty() {
        return Ok(RespFrame::NullBulk);
    }
    let items = entries
        .into_iter()
        .map(|(id, fields)| {
            let pairs = fields
                .into_iter()
                .map(|(f, v)| (RespFrame::bulk(f), RespFrame::bulk(v)))
                .collect();
            RespFrame::Array(vec![RespFrame::bulk(id.to_string()), RespFrame::flatten_pairs(pairs)])
        })
        .collect();
    Ok(RespFrame::Array(items))
}

enum BlpopOutcome {
    Found(Bytes, Bytes),
    TimedOut,
}

/// BLPOP without condition variables (spec.md §4.2, §9): a direct pop
/// attempt first, then register-and-wait. On wake, the handler re-pops
/// rather than trusting the signal payload directly, since a concurrent
/// popper may have raced it away between the push's notify and this
/// handler regaining the keyspace lock — in that case it loops back and
/// waits again rather than returning stale data.
async fn blpop(argv: Vec<Bytes>, engine: &Engine) -> Result<BlpopOutcome, CommandError> {
    require_arity(&argv, "blpop", 2, Some(3))?;
    let key = argv[1].clone();
    let timeout_secs: Option<f64> = match argv.get(2) {
        None => None,
        Some(raw) => {
            let secs: f64 = as_str(raw)
                .parse()
                .map_err(|_| CommandError::InvalidArgument("timeout is not a float or out of range".into()))?;
            if secs < 0.0 {
                return Err(CommandError::InvalidArgument("timeout is negative".into()));
            }
            Some(secs)
        }
    };

    loop {
        if let Some(v) = engine.pop_front(&key).await? {
            return Ok(BlpopOutcome::Found(key, v));
        }

        let (waiter_id, rx) = engine.register_waiter(key.clone()).await;
        let signalled = match timeout_secs {
            None => rx.await.is_ok(),
            Some(secs) if secs <= 0.0 => rx.await.is_ok(),
            Some(secs) => {
                tokio::select! {
                    res = rx => res.is_ok(),
                    _ = tokio::time::sleep(Duration::from_secs_f64(secs)) => {
                        engine.unregister(&key, waiter_id).await;
                        false
                    }
                }
            }
        };
        if !signalled {
            return Ok(BlpopOutcome::TimedOut);
        }
        if let Some(v) = engine.pop_front(&key).await? {
            return Ok(BlpopOutcome::Found(key, v));
        }
        // Woken but the element was stolen by a racing popper; go back to sleep.
    }
}
