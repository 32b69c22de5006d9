mod election;
mod local_state;
mod peers;
mod raft_rpcs;
mod replica;
mod replica_api;
mod storage;
mod write_ahead_log;

pub use election::ElectionStateSnapshot;
pub use local_state::PersistenceError;
pub use local_state::Term;
pub use peers::ReplicaId;
pub use raft_rpcs::AppendEntriesReply;
pub use raft_rpcs::AppendEntriesRequest;
pub use raft_rpcs::RequestVoteReply;
pub use raft_rpcs::RequestVoteRequest;
pub use replica_api::AppendEntriesError;
pub use replica_api::RequestVoteError;
pub use storage::DurableState;
pub use storage::InMemoryStorage;
pub use storage::Storage;
pub use write_ahead_log::Index;
pub use write_ahead_log::LogEntry;

pub(crate) use election::ElectionStateChangeListener;
pub(crate) use local_state::PersistentLocalState;
pub(crate) use peers::ClusterTracker;
pub(crate) use replica::{Replica, ReplicaConfig};
pub(crate) use replica_api::{
    AppendEntriesReplyFromPeer, EnqueueForReplicationError, EnqueueForReplicationInput, EnqueueForReplicationOutput,
    FollowerTimeoutTick, LeaderTimerTick, RequestVoteReplyFromPeer,
};
pub(crate) use write_ahead_log::commit_stream;
pub(crate) use write_ahead_log::CommitStream;
