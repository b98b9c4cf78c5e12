use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::time::Duration;
use tracing::debug;

use super::stream::{self, EntryId};
use super::types::CommandError;

/// A single polymorphic slot in the keyspace (spec §3). The variant tag is
/// closed and immutable for the key's lifetime — no trait objects, per the
/// "polymorphic values without inheritance" design note.
#[derive(Clone)]
enum TypedValue {
    Str(Bytes),
    List(VecDeque<Bytes>),
    Stream(StreamValue),
}

#[derive(Clone, Default)]
struct StreamValue {
    entries: Vec<(EntryId, Vec<(Bytes, Bytes)>)>,
    last_id: EntryId,
}

struct Entry {
    value: TypedValue,
    /// Bumped on every write to this key; lets a stale scheduled TTL
    /// deletion recognize that it has been superseded (spec §4.2, §5).
    epoch: u64,
    expires_at_ms: Option<u64>,
}

#[derive(Default)]
struct Keyspace {
    map: HashMap<Bytes, Entry>,
}

type WaiterId = u64;

#[derive(Default)]
struct WaiterTable {
    waiters: HashMap<Bytes, VecDeque<(WaiterId, oneshot::Sender<Bytes>)>>,
}

/// Outcome of a list push, giving the caller (a command handler) everything
/// it needs to decide whether to call `notify_first` — the engine itself
/// never wakes a waiter on its own (spec §4.2's wake policy is a handler
/// responsibility).
pub struct PushOutcome {
    pub new_len: usize,
    pub old_len: usize,
    pub head_value: Option<Bytes>,
}

/// The shared, concurrency-safe storage engine. Cheap to clone: every clone
/// points at the same keyspace lock and waiter table (spec §5's "shared by
/// all connection tasks").
#[derive(Clone)]
pub struct Engine(Arc<EngineInner>);

struct EngineInner {
    keyspace: RwLock<Keyspace>,
    waiters: Mutex<WaiterTable>,
    waiter_seq: AtomicU64,
}

impl Engine {
    pub fn new() -> Engine {
        Engine(Arc::new(EngineInner {
            keyspace: RwLock::new(Keyspace::default()),
            waiters: Mutex::new(WaiterTable::default()),
            waiter_seq: AtomicU64::new(0),
        }))
    }

    pub(crate) fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64
    }

    // ---- strings ----------------------------------------------------

    /// Reads under the engine's shared lock first, so concurrent `GET`s
    /// don't serialize on each other (spec §5); only an expired key pays
    /// for a write-lock upgrade to remove itself.
    pub async fn get_string(&self, key: &[u8]) -> Result<Option<Bytes>, CommandError> {
        let now = Self::now_ms();
        {
            let ks = self.0.keyspace.read().await;
            match ks.map.get(key) {
                None => return Ok(None),
                Some(e) if !e.expires_at_ms.map_or(false, |exp| now >= exp) => {
                    return match &e.value {
                        TypedValue::Str(v) => Ok(Some(v.clone())),
                        _ => Err(CommandError::WrongType),
                    };
                }
                Some(_) => {} // expired; fall through to remove it under the write lock
            }
        }
        let mut ks = self.0.keyspace.write().await;
        match ks.map.get(key) {
            None => Ok(None),
            Some(e) if e.expires_at_ms.map_or(false, |exp| now >= exp) => {
                ks.map.remove(key);
                Ok(None)
            }
            Some(Entry { value: TypedValue::Str(v), .. }) => Ok(Some(v.clone())),
            Some(_) => Err(CommandError::WrongType),
        }
    }

    /// `expire_at_ms`, if given, is an absolute deadline. A background task
    /// is spawned to enforce it; the task is a no-op if this write's epoch
    /// has been superseded by a later write by the time it fires.
    pub async fn set_string(
        &self,
        key: Bytes,
        value: Bytes,
        expire_at_ms: Option<u64>,
    ) -> Result<(), CommandError> {
        let epoch = {
            let mut ks = self.0.keyspace.write().await;
            if let Some(existing) = ks.map.get(&key) {
                if !matches!(existing.value, TypedValue::Str(_)) {
                    return Err(CommandError::WrongType);
                }
            }
            let epoch = ks.map.get(&key).map_or(1, |e| e.epoch + 1);
            ks.map.insert(
                key.clone(),
                Entry {
                    value: TypedValue::Str(value),
                    epoch,
                    expires_at_ms: expire_at_ms,
                },
            );
            epoch
        };

        if let Some(deadline_ms) = expire_at_ms {
            let engine = self.clone();
            let key = key.clone();
            tokio::spawn(async move {
                let delay = deadline_ms.saturating_sub(Self::now_ms());
                tokio::time::sleep(Duration::from_millis(delay)).await;
                engine.expire_if_unchanged(&key, epoch).await;
            });
        }
        Ok(())
    }

    async fn expire_if_unchanged(&self, key: &Bytes, epoch: u64) {
        let mut ks = self.0.keyspace.write().await;
        if matches!(ks.map.get(key), Some(e) if e.epoch == epoch) {
            ks.map.remove(key);
            debug!("TTL expired key, epoch={}", epoch);
        }
    }

    pub async fn delete(&self, key: &[u8]) -> bool {
        let mut ks = self.0.keyspace.write().await;
        ks.map.remove(key).is_some()
    }

    // ---- lists --------------------------------------------------------

    pub async fn append(&self, key: Bytes, values: Vec<Bytes>) -> Result<PushOutcome, CommandError> {
        self.push(key, values, false).await
    }

    pub async fn prepend(&self, key: Bytes, values: Vec<Bytes>) -> Result<PushOutcome, CommandError> {
        self.push(key, values, true).await
    }

    async fn push(&self, key: Bytes, values: Vec<Bytes>, at_head: bool) -> Result<PushOutcome, CommandError> {
        let mut ks = self.0.keyspace.write().await;
        if let Some(existing) = ks.map.get(&key) {
            if !matches!(existing.value, TypedValue::List(_)) {
                return Err(CommandError::WrongType);
            }
        }
        let ent = ks.map.entry(key).or_insert_with(|| Entry {
            value: TypedValue::List(VecDeque::new()),
            epoch: 0,
            expires_at_ms: None,
        });
        let list = match &mut ent.value {
            TypedValue::List(l) => l,
            _ => unreachable!("type checked above"),
        };
        let old_len = list.len();
        if at_head {
            for v in values {
                list.push_front(v);
            }
        } else {
            for v in values {
                list.push_back(v);
            }
        }
        ent.epoch += 1;
        let new_len = list.len();
        let head_value = list.front().cloned();
        Ok(PushOutcome { new_len, old_len, head_value })
    }

    pub async fn len(&self, key: &[u8]) -> Result<usize, CommandError> {
        let ks = self.0.keyspace.read().await;
        match ks.map.get(key) {
            None => Ok(0),
            Some(Entry { value: TypedValue::List(l), .. }) => Ok(l.len()),
            Some(_) => Err(CommandError::WrongType),
        }
    }

    pub async fn slice(&self, key: &[u8], start: i64, stop: i64) -> Result<Vec<Bytes>, CommandError> {
        let ks = self.0.keyspace.read().await;
        let list = match ks.map.get(key) {
            None => return Ok(vec![]),
            Some(Entry { value: TypedValue::List(l), .. }) => l,
            Some(_) => return Err(CommandError::WrongType),
        };
        let len = list.len() as i64;
        if len == 0 {
            return Ok(vec![]);
        }
        let mut s = if start < 0 { len + start } else { start };
        let mut e = if stop < 0 { len + stop } else { stop };
        s = s.max(0);
        e = e.min(len - 1);
        if s > e || s >= len {
            return Ok(vec![]);
        }
        Ok(list.iter().skip(s as usize).take((e - s + 1) as usize).cloned().collect())
    }

    /// Pops the front element (spec's `pop_by_index(k, 0)`; no command in
    /// scope removes at any other index, so the narrower, idiomatic name is
    /// used here).
    pub async fn pop_front(&self, key: &[u8]) -> Result<Option<Bytes>, CommandError> {
        let mut ks = self.0.keyspace.write().await;
        let (result, now_empty) = match ks.map.get_mut(key) {
            None => (None, false),
            Some(ent) => match &mut ent.value {
                TypedValue::List(list) => {
                    let v = list.pop_front();
                    ent.epoch += 1;
                    let empty = list.is_empty();
                    (v, empty)
                }
                _ => return Err(CommandError::WrongType),
            },
        };
        if now_empty {
            ks.map.remove(key);
        }
        Ok(result)
    }

    pub async fn pop_first_n(&self, key: &[u8], n: usize) -> Result<Vec<Bytes>, CommandError> {
        let mut ks = self.0.keyspace.write().await;
        let (result, now_empty) = match ks.map.get_mut(key) {
            None => (vec![], false),
            Some(ent) => match &mut ent.value {
                TypedValue::List(list) => {
                    let take = n.min(list.len());
                    let popped: Vec<Bytes> = list.drain(0..take).collect();
                    ent.epoch += 1;
                    let empty = list.is_empty();
                    (popped, empty)
                }
                _ => return Err(CommandError::WrongType),
            },
        };
        if now_empty {
            ks.map.remove(key);
        }
        Ok(result)
    }

    // ---- blocking waiters (BLPOP) --------------------------------------

    pub async fn register_waiter(&self, key: Bytes) -> (WaiterId, oneshot::Receiver<Bytes>) {
        let id = self.0.waiter_seq.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        let mut wt = self.0.waiters.lock().await;
        wt.waiters.entry(key).or_insert_with(VecDeque::new).push_back((id, tx));
        (id, rx)
    }

    /// Hands `value` to the head waiter for `key`, if any, and removes it.
    /// A no-op if there is no waiter. Never called while the keyspace lock
    /// is held (spec §5's deadlock-avoidance rule).
    pub async fn notify_first(&self, key: &[u8], value: Bytes) {
        let mut wt = self.0.waiters.lock().await;
        if let Some(queue) = wt.waiters.get_mut(key) {
            if let Some((_, tx)) = queue.pop_front() {
                let _ = tx.send(value);
            }
            if queue.is_empty() {
                wt.waiters.remove(key);
            }
        }
    }

    pub async fn unregister(&self, key: &[u8], id: WaiterId) {
        let mut wt = self.0.waiters.lock().await;
        if let Some(queue) = wt.waiters.get_mut(key) {
            queue.retain(|(wid, _)| *wid != id);
            if queue.is_empty() {
                wt.waiters.remove(key);
            }
        }
    }

    // ---- streams --------------------------------------------------------

    pub async fn stream_last_id(&self, key: &[u8]) -> (EntryId, usize) {
        let ks = self.0.keyspace.read().await;
        match ks.map.get(key) {
            Some(Entry { value: TypedValue::Stream(s), .. }) => (s.last_id, s.entries.len()),
            _ => (EntryId::ZERO, 0),
        }
    }

    pub async fn stream_append(
        &self,
        key: Bytes,
        proposed_id: &str,
        fields: Vec<(Bytes, Bytes)>,
    ) -> Result<EntryId, CommandError> {
        let mut ks = self.0.keyspace.write().await;
        if let Some(existing) = ks.map.get(&key) {
            if !matches!(existing.value, TypedValue::Stream(_)) {
                return Err(CommandError::WrongType);
            }
        }
        let ent = ks.map.entry(key).or_insert_with(|| Entry {
            value: TypedValue::Stream(StreamValue::default()),
            epoch: 0,
            expires_at_ms: None,
        });
        let stream = match &mut ent.value {
            TypedValue::Stream(s) => s,
            _ => unreachable!("type checked above"),
        };
        let now_ms = Self::now_ms() as i64;
        let final_id = stream::resolve_id(proposed_id, stream.last_id, now_ms)?;
        stream.entries.push((final_id, fields));
        stream.last_id = final_id;
        ent.epoch += 1;
        Ok(final_id)
    }

    pub async fn stream_range(
        &self,
        key: &[u8],
        start: EntryId,
        end: EntryId,
    ) -> Result<Vec<(EntryId, Vec<(Bytes, Bytes)>)>, CommandError> {
        let ks = self.0.keyspace.read().await;
        match ks.map.get(key) {
            None => Ok(vec![]),
            Some(Entry { value: TypedValue::Stream(s), .. }) => Ok(s
                .entries
                .iter()
                .filter(|(id, _)| *id >= start && *id <= end)
                .cloned()
                .collect()),
            Some(_) => Err(CommandError::WrongType),
        }
    }

    // ---- introspection --------------------------------------------------

    pub async fn check_type(&self, key: &[u8]) -> &'static str {
        let ks = self.0.keyspace.read().await;
        match ks.map.get(key).map(|e| &e.value) {
            None => "none",
            Some(TypedValue::Str(_)) => "string",
            Some(TypedValue::List(_)) => "list",
            Some(TypedValue::Stream(_)) => "stream",
        }
    }
}

impl Default for Engine {
    fn default() -> Engine {
        Engine::new()
    }
}
