use crate::replica::local_state::{PersistenceError, Term};
use crate::replica::peers::ReplicaId;
use crate::replica::raft_rpcs::{AppendEntriesReply, RequestVoteReply};
use crate::replica::write_ahead_log::Index;
use crate::transport::TransportError;
use bytes::Bytes;

#[derive(Debug)]
pub(crate) struct EnqueueForReplicationInput {
    pub(crate) data: Bytes,
}

#[derive(Debug)]
pub(crate) struct EnqueueForReplicationOutput {
    pub(crate) enqueued_term: Term,
    pub(crate) enqueued_index: Index,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum EnqueueForReplicationError {
    #[error("I'm not leader")]
    NotLeader(Option<ReplicaId>),

    #[error("Failed to persist log")]
    Persistence(#[source] PersistenceError),

    #[error("Replica actor is dead RIP")]
    ActorExited,
}

#[derive(thiserror::Error, Debug)]
pub enum RequestVoteError {
    #[error("Requesting candidate {0:?} is not in the cluster")]
    CandidateNotInCluster(ReplicaId),
    #[error("Failed to persist term or vote before replying")]
    Persistence(#[source] PersistenceError),
    #[error("We (server) are unavailable because actor is dead RIP")]
    ActorExited,
}

#[derive(thiserror::Error, Debug)]
pub enum AppendEntriesError {
    #[error("Leader {0:?} is not in the cluster")]
    LeaderNotInCluster(ReplicaId),
    #[error("Malformed entries: {0}")]
    MalformedEntries(String),
    #[error("Failed to persist term or log before replying")]
    Persistence(#[source] PersistenceError),
    #[error("We (server) are unavailable because actor is dead RIP")]
    ActorExited,
}

impl From<PersistenceError> for RequestVoteError {
    fn from(e: PersistenceError) -> Self {
        RequestVoteError::Persistence(e)
    }
}

impl From<PersistenceError> for AppendEntriesError {
    fn from(e: PersistenceError) -> Self {
        AppendEntriesError::Persistence(e)
    }
}

#[derive(Debug)]
pub(crate) struct RequestVoteReplyFromPeer {
    pub(crate) peer_id: ReplicaId,
    // Term we requested the vote for.
    pub(crate) term: Term,
    pub(crate) result: Result<RequestVoteReply, TransportError>,
}

#[derive(Debug)]
pub(crate) struct AppendEntriesReplyFromPeer {
    pub(crate) descriptor: AppendEntriesReplyFromPeerDescriptor,
    pub(crate) result: Result<AppendEntriesReply, TransportError>,
}

// This is basically info about the original request
#[derive(Debug, Clone)]
pub(crate) struct AppendEntriesReplyFromPeerDescriptor {
    pub(crate) peer_id: ReplicaId,
    pub(crate) term: Term,
    pub(crate) seq_no: u64,
    pub(crate) prev_log_index: Index,
    pub(crate) num_entries: usize,
}

/// One firing of a follower/candidate election timer. `timer_id` names the timer that fired and
/// `epoch` counts its resets at the time, so a tick that waited in the queue behind a heartbeat or
/// a role change can be recognized as stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FollowerTimeoutTick {
    pub(crate) timer_id: u64,
    pub(crate) epoch: u64,
}

/// LeaderTimerTick contains info for a single tick of a leader's per-peer timer.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LeaderTimerTick {
    pub(crate) peer_id: ReplicaId,
    pub(crate) term: Term,
}
