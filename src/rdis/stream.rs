use std::cmp::Ordering;
use std::fmt;

use super::types::CommandError;

/// A stream entry id: `ms:int64, seq:uint64`, totally ordered lexicographically
/// (spec §3 invariant 4, §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryId {
    pub ms: i64,
    pub seq: u64,
}

impl EntryId {
    pub const ZERO: EntryId = EntryId { ms: 0, seq: 0 };

    pub fn new(ms: i64, seq: u64) -> EntryId {
        EntryId { ms, seq }
    }
}

impl Ord for EntryId {
    fn cmp(&self, other: &EntryId) -> Ordering {
        (self.ms, self.seq).cmp(&(other.ms, other.seq))
    }
}

impl PartialOrd for EntryId {
    fn partial_cmp(&self, other: &EntryId) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Default for EntryId {
    fn default() -> EntryId {
        EntryId::ZERO
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

/// One of the four proposed-id forms accepted by XADD (spec §4.2).
enum ProposedId {
    Auto,
    PartialAuto(i64),
    Explicit(EntryId),
}

fn parse_proposed_id(raw: &str) -> Result<ProposedId, CommandError> {
    if raw == "*" {
        return Ok(ProposedId::Auto);
    }
    if let Some(ms_part) = raw.strip_suffix("-*") {
        return ms_part
            .parse::<i64>()
            .map(ProposedId::PartialAuto)
            .map_err(|_| CommandError::StreamId("Invalid id format".into()));
    }
    if let Some((ms_part, seq_part)) = raw.split_once('-') {
        let ms = ms_part
            .parse::<i64>()
            .map_err(|_| CommandError::StreamId("Invalid id format".into()))?;
        let seq = seq_part
            .parse::<u64>()
            .map_err(|_| CommandError::StreamId("Invalid id format".into()))?;
        return Ok(ProposedId::Explicit(EntryId::new(ms, seq)));
    }
    Err(CommandError::StreamId("Invalid id format".into()))
}

/// Resolves a proposed XADD id against the stream's current last id,
/// applying the allocation rules of spec §4.2. `now_ms` is the wall-clock
/// time used for the fully-auto (`*`) form.
pub fn resolve_id(raw: &str, last: EntryId, now_ms: i64) -> Result<EntryId, CommandError> {
    match parse_proposed_id(raw)? {
        ProposedId::Auto => {
            let candidate = EntryId::new(now_ms, 0);
            if candidate <= last {
                Ok(EntryId::new(last.ms, last.seq + 1))
            } else {
                Ok(candidate)
            }
        }
        ProposedId::PartialAuto(ms) => {
            if ms < last.ms {
                Err(CommandError::StreamId(
                    "The ID specified in XADD is equal or smaller than the target stream top item"
                        .into(),
                ))
            } else if ms == last.ms {
                Ok(EntryId::new(ms, last.seq + 1))
            } else {
                Ok(EntryId::new(ms, 0))
            }
        }
        ProposedId::Explicit(id) => {
            if id == EntryId::ZERO {
                Err(CommandError::StreamId(
                    "The ID specified in XADD must be greater than 0-0".into(),
                ))
            } else if id <= last {
                Err(CommandError::StreamId(
                    "The ID specified in XADD is equal or smaller than the target stream top item"
                        .into(),
                ))
            } else {
                Ok(id)
            }
        }
    }
}

/// An XRANGE endpoint: `<ms>` (seq defaults per side) or `<ms>-<seq>`.
pub enum RangeBound {
    Ms(i64),
    MsSeq(EntryId),
}

pub fn parse_range_bound(raw: &str) -> Result<RangeBound, CommandError> {
    if let Some((ms_part, seq_part)) = raw.split_once('-') {
        let ms = ms_part
            .parse::<i64>()
            .map_err(|_| CommandError::StreamId("Invalid stream ID specified as stream command argument".into()))?;
        let seq = seq_part
            .parse::<u64>()
            .map_err(|_| CommandError::StreamId("Invalid stream ID specified as stream command argument".into()))?;
        Ok(RangeBound::MsSeq(EntryId::new(ms, seq)))
    } else {
        let ms = raw
            .parse::<i64>()
            .map_err(|_| CommandError::StreamId("Invalid stream ID specified as stream command argument".into()))?;
        Ok(RangeBound::Ms(ms))
    }
}

/// Lower bound: a bare `<ms>` implies `seq = 0`.
pub fn range_start(bound: &RangeBound) -> EntryId {
    match bound {
        RangeBound::Ms(ms) => EntryId::new(*ms, 0),
        RangeBound::MsSeq(id) => *id,
    }
}

/// Upper bound: a bare `<ms>` implies an open seq upper bound (every entry
/// with that ms is included), per spec §4.2's XRANGE parsing rule.
pub fn range_end(bound: &RangeBound) -> EntryId {
    match bound {
        RangeBound::Ms(ms) => EntryId::new(*ms, u64::MAX),
        RangeBound::MsSeq(id) => *id,
    }
}
