//! Replication handshake stub (spec.md §1: "named interfaces in §6", out
//! of scope for the core). Mirrors `replica.ReplicaController` from
//! `examples/original_source/replica/replica.go`: PING, REPLCONF
//! listening-port, REPLCONF capa, PSYNC, FULLRESYNC, then an inline
//! base64 empty RDB payload. None of this is implemented; the type exists
//! so the core's external interface list names a concrete collaborator
//! instead of a bare comment.

use super::types::{ErrorT, ResultT};

pub const EMPTY_RDB_BASE64: &str =
    "UkVESVMwMDEx+glyZWRpcy12ZXIFNy4yLjD6CnJlZGlzLWJpdHPAQPoFY3RpbWXCbQi8ZfoIdXNlZC1tZW3CsMQQAPoIYW9mLWJhc2XAAP/wbjv+wP9aog==";

/// A follower's connection to its master. `connect` is never called by
/// `run()` — the replication handshake is a non-goal of this core.
pub struct Replica {
    pub master_addr: String,
}

impl Replica {
    pub fn new(master_addr: String) -> Replica {
        Replica { master_addr }
    }

    pub async fn connect(&self) -> ResultT<()> {
        let err: ErrorT = "replication handshake not implemented".into();
        Err(err)
    }
}
