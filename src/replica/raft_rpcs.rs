//! Messages exchanged between replicas. These are plain data; how they are carried between
//! processes is up to the `PeerTransport` implementation.

use crate::replica::peers::ReplicaId;
use crate::replica::write_ahead_log::{Index, LogEntry};
use crate::replica::Term;

#[derive(Clone, Debug, PartialEq)]
pub struct AppendEntriesRequest {
    pub term: Term,
    pub leader_id: ReplicaId,
    // "Previous log entry" is the log entry immediately preceding `entries`. (0, 0) when
    // `entries` start at the beginning of the log.
    pub prev_log_index: Index,
    pub prev_log_term: Term,
    // Contiguous, possibly empty (heartbeat).
    pub entries: Vec<LogEntry>,
    pub leader_commit: Index,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AppendEntriesReply {
    pub term: Term,
    pub success: bool,
    /// On a log mismatch, the index the leader should retry from.
    pub conflict_hint: Option<Index>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RequestVoteRequest {
    pub term: Term,
    pub candidate_id: ReplicaId,
    pub last_log_index: Index,
    pub last_log_term: Term,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RequestVoteReply {
    pub term: Term,
    pub vote_granted: bool,
}

impl AppendEntriesReply {
    pub(crate) fn accepted(term: Term) -> Self {
        AppendEntriesReply {
            term,
            success: true,
            conflict_hint: None,
        }
    }

    pub(crate) fn rejected(term: Term, conflict_hint: Option<Index>) -> Self {
        AppendEntriesReply {
            term,
            success: false,
            conflict_hint,
        }
    }
}
