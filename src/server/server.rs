use crate::actor::WeakActorClient;
use crate::replica::{
    AppendEntriesError, AppendEntriesReply, AppendEntriesRequest, RequestVoteError, RequestVoteReply,
    RequestVoteRequest,
};

/// RpcServer is the inbound side of the raft RPCs. A transport decodes whatever arrived off the
/// wire and calls into it; the call is queued on the replica's actor and the reply handed back.
///
/// It holds only a weak handle, so a server outliving its `RaftClient` fails calls with
/// `ActorExited` instead of keeping the replica alive.
#[derive(Clone)]
pub struct RpcServer {
    logger: slog::Logger,
    local_replica: WeakActorClient,
}

impl RpcServer {
    pub(crate) fn new(logger: slog::Logger, local_replica: WeakActorClient) -> Self {
        RpcServer { logger, local_replica }
    }

    pub async fn append_entries(&self, request: AppendEntriesRequest) -> Result<AppendEntriesReply, AppendEntriesError> {
        slog::trace!(self.logger, "ServerWire - {:?}", request);
        let result = self.local_replica.append_entries(request).await;
        slog::trace!(self.logger, "ServerWire - {:?}", result);

        if let Err(e) = &result {
            slog::warn!(self.logger, "AppendEntries failed: {}", e);
        }
        result
    }

    pub async fn request_vote(&self, request: RequestVoteRequest) -> Result<RequestVoteReply, RequestVoteError> {
        slog::trace!(self.logger, "ServerWire - {:?}", request);
        let result = self.local_replica.request_vote(request).await;
        slog::trace!(self.logger, "ServerWire - {:?}", result);

        if let Err(e) = &result {
            slog::warn!(self.logger, "RequestVote failed: {}", e);
        }
        result
    }
}
