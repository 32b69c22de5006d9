//! Outbound side of replica-to-replica messaging. The inbound side is `RpcServer`.
mod local;

pub use local::LocalNetwork;
pub use local::LocalTransport;

use crate::replica::{AppendEntriesReply, AppendEntriesRequest, ReplicaId, RequestVoteReply, RequestVoteRequest};

#[derive(Clone, Debug, thiserror::Error, PartialEq)]
pub enum TransportError {
    #[error("peer {0:?} is unreachable")]
    Unreachable(ReplicaId),
    #[error("timed out waiting for reply")]
    Timeout,
    #[error("peer failed to handle request: {0}")]
    Remote(String),
}

/// PeerTransport carries AppendEntries and RequestVote calls to other replicas and brings back
/// their replies. A replica never shares memory with its peers; this is the only channel.
///
/// Implementations don't need to retry. The replica retries on its own schedule.
#[async_trait::async_trait]
pub trait PeerTransport: Send + Sync + 'static {
    async fn append_entries(
        &self,
        peer: &ReplicaId,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesReply, TransportError>;

    async fn request_vote(&self, peer: &ReplicaId, request: RequestVoteRequest)
        -> Result<RequestVoteReply, TransportError>;
}
